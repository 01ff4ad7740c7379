//! Loading `.spkg` packages and resolving block ranges against them.

use anyhow::{format_err, Context, Error};
use lazy_static::lazy_static;
use prost::Message;
use regex::Regex;
use semver::Version;

use crate::pb::sf::substreams::v1::{Module, Modules, Package};

lazy_static! {
    static ref MODULE_NAME_REGEXP: Regex = Regex::new(r"^([a-zA-Z][a-zA-Z0-9_-]{0,63})$")
        .expect("module name pattern is a valid regex");
}

const REGISTRY_URL: &str = "https://spkg.io";

/// Read a package from a local path, an http(s) URL or a `name@version`
/// registry reference.
pub async fn read_package(input: &str) -> Result<Package, Error> {
    let mut location = input.to_string();

    if let Ok((name, version)) = parse_standard_package_and_version(input) {
        location = format!("{}/v1/packages/{}/{}", REGISTRY_URL, name, version);
    }

    if location.starts_with("http") {
        read_http_package(&location).await
    } else {
        // Assume it's a local file
        let content = tokio::fs::read(&location)
            .await
            .context(format_err!("read package from file '{}'", location))?;
        Package::decode(content.as_ref()).context("decode package")
    }
}

async fn read_http_package(input: &str) -> Result<Package, Error> {
    let body = reqwest::get(input).await?.error_for_status()?.bytes().await?;

    Package::decode(body).context("decode package")
}

/// Find an output module by name in the package.
pub fn find_module(pkg: &Package, module_name: &str) -> Result<Module, Error> {
    let modules = Modules::decode(pkg.modules.as_slice()).context("decode package modules")?;

    modules
        .modules
        .into_iter()
        .find(|m| m.name == module_name)
        .ok_or_else(|| format_err!("module '{}' not found in package", module_name))
}

/// Resolve a `start[:stop]` range against the module's initial block.
///
/// - empty start means the module's initial block
/// - `+N` start is relative to the initial block, `+N` stop relative to start
/// - empty or `-` stop means stream forever (`0`)
pub fn read_block_range(
    pkg: &Package,
    module_name: &str,
    block_range: Option<&str>,
) -> Result<(i64, u64), Error> {
    let module = find_module(pkg, module_name)?;
    parse_block_range(module.initial_block, block_range.unwrap_or_default())
}

pub fn parse_block_range(initial_block: u64, input: &str) -> Result<(i64, u64), Error> {
    let (prefix, suffix) = match input.split_once(':') {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (input, ""),
    };

    let start: i64 = match prefix {
        "" => initial_block as i64,
        x if x.starts_with('+') => {
            let block_count = x
                .trim_start_matches('+')
                .parse::<u64>()
                .context("argument <start> is not a valid integer")?;

            (initial_block + block_count) as i64
        }
        x => x
            .parse::<i64>()
            .context("argument <start> is not a valid integer")?,
    };

    let stop: u64 = match suffix {
        "" | "-" => 0,
        x if x.starts_with('+') => {
            let block_count = x
                .trim_start_matches('+')
                .parse::<u64>()
                .context("argument <stop> is not a valid integer")?;

            start as u64 + block_count
        }
        x => x
            .parse::<u64>()
            .context("argument <stop> is not a valid integer")?,
    };

    if stop != 0 && start >= 0 && stop <= start as u64 {
        return Err(format_err!(
            "invalid block range: stop {} must be greater than start {}",
            stop,
            start
        ));
    }

    Ok((start, stop))
}

fn parse_standard_package_and_version(input: &str) -> Result<(String, String), Error> {
    let parts: Vec<&str> = input.split('@').collect();
    if parts.len() > 2 {
        return Err(format_err!(
            "package name: {} does not follow the convention of <package>@<version>",
            input
        ));
    }

    let package_name = parts[0].to_string();
    if !MODULE_NAME_REGEXP.is_match(&package_name) {
        return Err(format_err!(
            "package name {} does not match regexp {}",
            package_name,
            MODULE_NAME_REGEXP.as_str()
        ));
    }

    if parts.len() == 1 || parts.get(1).map_or(true, |v| v.is_empty() || *v == "latest") {
        return Ok((package_name, "latest".to_string()));
    }

    let version = parts[1];
    if Version::parse(&version.replace('v', "")).is_err() {
        return Err(format_err!(
            "version '{}' is not valid Semver format",
            version
        ));
    }

    Ok((package_name, version.to_string()))
}
