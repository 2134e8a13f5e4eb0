//! Upstream sources: where cache misses are answered from.
//!
//! The cache only sees [`UpstreamFetcher::fetch`]: one call, one outcome.
//! Transport concerns (TLS, pooling, connect and request timeouts) stay inside
//! the fetcher; [`HttpCatClient`] delegates all of them to `reqwest`.

use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use reqwest::header;
use serde::Deserialize;
use thiserror::Error;

/// Content type assumed when the upstream does not send one.
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Something that can produce a `V` for a `K`, possibly failing.
///
/// Every call is a single attempt from the caller's point of view. The
/// returned future must own everything it needs, as it is spawned and may
/// outlive the request that triggered it.
pub trait UpstreamFetcher<K, V>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn fetch(&self, key: K) -> BoxFuture<'static, Result<V, Self::Error>>;
}

/// An image as served by the upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatImage {
    pub content_type: String,
    pub body: Bytes,
}

/// Errors produced by [`HttpCatClient`].
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no cat for status code {0}")]
    NotFound(u16),

    #[error("upstream answered {status} for status code {code}")]
    Status { code: u16, status: u16 },

    #[error("request to upstream failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Settings for the upstream HTTP client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL; the status code is appended as the last path segment.
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Transport-level bound on a whole request. The cache applies its own
    /// `load_timeout` on top of this.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://http.cat".to_owned(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("cat-cache/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Fetches `GET {base_url}/{code}` and expects `200 OK`.
#[derive(Clone, Debug)]
pub struct HttpCatClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatClient {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn url_for(&self, code: u16) -> String {
        format!("{}/{code}", self.base_url)
    }
}

impl UpstreamFetcher<u16, CatImage> for HttpCatClient {
    type Error = UpstreamError;

    fn fetch(&self, code: u16) -> BoxFuture<'static, Result<CatImage, UpstreamError>> {
        let url = self.url_for(code);
        let request = self.client.get(&url);

        async move {
            tracing::debug!(code, %url, "fetching cat from upstream");
            let response = request.send().await?;

            match response.status() {
                reqwest::StatusCode::OK => {}
                reqwest::StatusCode::NOT_FOUND => return Err(UpstreamError::NotFound(code)),
                status => {
                    return Err(UpstreamError::Status {
                        code,
                        status: status.as_u16(),
                    });
                }
            }

            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_owned();
            let body = response.bytes().await?;

            tracing::debug!(code, bytes = body.len(), "fetched cat");
            Ok(CatImage { content_type, body })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_ignores_trailing_slash() {
        let client = HttpCatClient::new(&UpstreamConfig {
            base_url: "http://127.0.0.1:9000/".to_owned(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url_for(418), "http://127.0.0.1:9000/418");
    }

    #[test]
    fn config_from_yaml() {
        let config: UpstreamConfig =
            serde_yaml::from_str("base_url: http://localhost:1234\nconnect_timeout: 250ms\n")
                .unwrap();
        assert_eq!(config.base_url, "http://localhost:1234");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let client = HttpCatClient::new(&UpstreamConfig {
            // port 9 (discard) is not expected to be listening
            base_url: "http://127.0.0.1:9".to_owned(),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let err = client.fetch(200).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)), "{err:?}");
    }
}
