//! Process configuration, read from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use sink::cursor::{CursorKey, CursorStoreSource};
use sink::driver::DriverConfig;
use sink::publisher::RetryPolicy;
use sink::rollback::CompensationStrategy;

use crate::errors::AppError;

const DEFAULT_TOPIC: &str = "substreams";
const DEFAULT_CURSOR_DIRECTORY: &str = "./cursors";
const DEFAULT_CLIENT_ID: &str = "substreams-sink-kafka";
const DEFAULT_PUBLISH_CONCURRENCY: usize = 16;
const DEFAULT_MAX_RETRIES: usize = 5;
const DEFAULT_BACKOFF_MS: u64 = 250;
const DEFAULT_UNDO_RETENTION: usize = 1000;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LIVE_BLOCK_THRESHOLD_SECS: u64 = 60;
const DEFAULT_MAX_RECONNECTS: usize = 10;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    /// Package path, URL or `name@version`.
    pub package: String,
    pub output_module: String,
    /// `start[:stop]`, resolved against the module's initial block.
    pub block_range: Option<String>,
    /// Topic namespace and Kafka client id.
    pub project: Option<String>,
    pub topic: String,
    pub publish_concurrency: usize,
    pub max_retries: usize,
    pub backoff: Duration,
    pub undo_retention: usize,
    pub cursor_store: CursorStoreSource,
    pub compensation: CompensationStrategy,
    pub shutdown_timeout: Duration,
    pub development_mode: bool,
    pub final_blocks_only: bool,
    pub skip_empty_output: bool,
    pub live_block_threshold: Duration,
    /// `None` keeps reconnecting.
    pub max_reconnects: Option<usize>,
}

impl SinkConfig {
    /// Read the configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SUBSTREAMS_ENDPOINT`, `SUBSTREAMS_PACKAGE`, `SUBSTREAMS_OUTPUT_MODULE` (required)
    /// - `SUBSTREAMS_API_TOKEN`, `BLOCK_RANGE` (optional)
    /// - `SINK_PROJECT`, `SINK_TOPIC` (default: substreams)
    /// - `PUBLISH_CONCURRENCY` (16), `PUBLISH_MAX_RETRIES` (5), `PUBLISH_BACKOFF_MS` (250)
    /// - `UNDO_RETENTION` (1000 blocks)
    /// - `CURSOR_STORE`: a directory, a `postgres://` URL, or `memory` to keep
    ///   cursors in process only (default: ./cursors)
    /// - `COMPENSATION`: `tombstone` or `invalidation` (default: tombstone)
    /// - `SHUTDOWN_TIMEOUT_SECS` (30)
    /// - `DEVELOPMENT_MODE` (true), `FINAL_BLOCKS_ONLY` (false), `SKIP_EMPTY_OUTPUT` (true)
    /// - `LIVE_BLOCK_THRESHOLD_SECS` (60), `MAX_RECONNECTS` (10, 0 for unlimited)
    pub fn from_env() -> Result<Self, AppError> {
        let publish_concurrency = parse_or("PUBLISH_CONCURRENCY", DEFAULT_PUBLISH_CONCURRENCY)?;
        if publish_concurrency == 0 {
            return Err(AppError::invalid_env(
                "PUBLISH_CONCURRENCY",
                "0",
                "must be at least 1",
            ));
        }

        let undo_retention = parse_or("UNDO_RETENTION", DEFAULT_UNDO_RETENTION)?;
        if undo_retention == 0 {
            return Err(AppError::invalid_env(
                "UNDO_RETENTION",
                "0",
                "must be at least 1",
            ));
        }

        let max_reconnects = match parse_or("MAX_RECONNECTS", DEFAULT_MAX_RECONNECTS)? {
            0 => None,
            n => Some(n),
        };

        Ok(Self {
            endpoint: required("SUBSTREAMS_ENDPOINT")?,
            api_token: optional("SUBSTREAMS_API_TOKEN"),
            package: required("SUBSTREAMS_PACKAGE")?,
            output_module: required("SUBSTREAMS_OUTPUT_MODULE")?,
            block_range: optional("BLOCK_RANGE"),
            project: optional("SINK_PROJECT"),
            topic: optional("SINK_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            publish_concurrency,
            max_retries: parse_or("PUBLISH_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            backoff: Duration::from_millis(parse_or("PUBLISH_BACKOFF_MS", DEFAULT_BACKOFF_MS)?),
            undo_retention,
            cursor_store: optional("CURSOR_STORE")
                .map(|value| CursorStoreSource::parse(&value))
                .unwrap_or_else(|| CursorStoreSource::file(DEFAULT_CURSOR_DIRECTORY)),
            compensation: parse_or("COMPENSATION", CompensationStrategy::Tombstone)?,
            shutdown_timeout: Duration::from_secs(parse_or(
                "SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?),
            development_mode: parse_bool_or("DEVELOPMENT_MODE", true)?,
            final_blocks_only: parse_bool_or("FINAL_BLOCKS_ONLY", false)?,
            skip_empty_output: parse_bool_or("SKIP_EMPTY_OUTPUT", true)?,
            live_block_threshold: Duration::from_secs(parse_or(
                "LIVE_BLOCK_THRESHOLD_SECS",
                DEFAULT_LIVE_BLOCK_THRESHOLD_SECS,
            )?),
            max_reconnects,
        })
    }

    /// Kafka topic: `{project}.{topic}`, or the bare topic without a project.
    pub fn full_topic(&self) -> String {
        match &self.project {
            Some(project) => format!("{}.{}", project, self.topic),
            None => self.topic.clone(),
        }
    }

    pub fn client_id(&self) -> String {
        self.project
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
    }

    /// One cursor per endpoint, package and output module.
    pub fn cursor_key(&self) -> CursorKey {
        CursorKey::new(
            format!("{}|{}", self.endpoint, self.package),
            &self.output_module,
        )
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            topic: self.full_topic(),
            compensation: self.compensation,
            publish_concurrency: self.publish_concurrency,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: self.backoff,
                max_delay: MAX_BACKOFF,
            },
            undo_retention: self.undo_retention,
            skip_empty_output: self.skip_empty_output,
            shutdown_timeout: self.shutdown_timeout,
            ..DriverConfig::default()
        }
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, AppError> {
    optional(name).ok_or(AppError::MissingEnv(name))
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: ToString,
{
    match optional(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|err: T::Err| AppError::invalid_env(name, value.clone(), err)),
        None => Ok(default),
    }
}

fn parse_bool_or(name: &'static str, default: bool) -> Result<bool, AppError> {
    match optional(name) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::invalid_env(name, value, "expected a boolean")),
        },
        None => Ok(default),
    }
}
