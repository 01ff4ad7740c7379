use std::{fmt, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Error};
use tonic::{
    codec::CompressionEncoding,
    metadata::{Ascii, MetadataValue},
    transport::{Channel, ClientTlsConfig, Uri},
};

use crate::pb::sf::substreams::rpc::v2::{stream_client::StreamClient, Request, Response};

/// Responses can carry large module outputs.
const MAX_DECODING_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

/// A lazily connected gRPC channel to a Substreams endpoint.
#[derive(Clone)]
pub struct SubstreamsEndpoint {
    pub uri: String,
    pub token: Option<String>,
    channel: Channel,
}

impl fmt::Display for SubstreamsEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.uri.as_str(), f)
    }
}

impl SubstreamsEndpoint {
    /// Build the endpoint. `url` without a scheme is treated as `https://`.
    pub async fn new<S: AsRef<str>>(url: S, token: Option<String>) -> Result<Self, Error> {
        let url = normalize_endpoint_url(url.as_ref());
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("invalid substreams endpoint '{}'", url))?;

        let endpoint = match uri.scheme_str() {
            Some("http") => Channel::builder(uri),
            Some("https") => Channel::builder(uri)
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .context("TLS config on this host is invalid")?,
            other => return Err(anyhow!("unsupported endpoint scheme {:?}", other)),
        }
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Some(Duration::from_secs(30)));

        let uri = endpoint.uri().to_string();
        let channel = endpoint.connect_lazy();

        Ok(SubstreamsEndpoint {
            uri,
            token,
            channel,
        })
    }

    /// Open a server stream of `Response` for the given request.
    pub async fn substreams(
        self: Arc<Self>,
        request: Request,
    ) -> Result<tonic::Streaming<Response>, tonic::Status> {
        let token_metadata: Option<MetadataValue<Ascii>> = match self.token.as_deref() {
            Some(token) => Some(
                format!("Bearer {}", token)
                    .parse()
                    .map_err(|_| tonic::Status::unauthenticated("API token is not valid ASCII"))?,
            ),
            None => None,
        };

        let client = StreamClient::with_interceptor(
            self.channel.clone(),
            move |mut r: tonic::Request<()>| {
                if let Some(ref t) = token_metadata {
                    r.metadata_mut().insert("authorization", t.clone());
                }

                Ok(r)
            },
        );

        let mut client = client
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip)
            .max_decoding_message_size(MAX_DECODING_MESSAGE_SIZE);

        let response_stream = client.blocks(request).await?;
        Ok(response_stream.into_inner())
    }
}

/// Endpoints are commonly given as `host:port`, default those to TLS.
pub fn normalize_endpoint_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_without_scheme_defaults_to_https() {
        assert_eq!(
            normalize_endpoint_url("mainnet.eth.streamingfast.io:443"),
            "https://mainnet.eth.streamingfast.io:443"
        );
    }

    #[test]
    fn endpoint_with_scheme_is_untouched() {
        assert_eq!(
            normalize_endpoint_url("http://localhost:9000"),
            "http://localhost:9000"
        );
    }
}
