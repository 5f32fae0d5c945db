//! Downloading sources from their origin URL.

use std::time::Duration;

use crate::config::LimitsConfig;
use crate::error::{DeriveError, DeriveResult};

/// HTTP client for origin downloads.
#[derive(Clone)]
pub struct OriginFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
}

impl OriginFetcher {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_millis(limits.fetch_timeout_ms),
            max_bytes: limits.max_file_size_mb * 1024 * 1024,
        }
    }

    /// Download `url` in full, refusing bodies over the size limit.
    pub async fn fetch(&self, url: &str) -> DeriveResult<Vec<u8>> {
        let fetch_err = |message: String| DeriveError::Fetch {
            url: url.to_string(),
            message,
        };

        let parsed = reqwest::Url::parse(url).map_err(|e| {
            DeriveError::InvalidParameters(format!("origin href '{url}' is not a URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DeriveError::InvalidParameters(format!(
                "origin href '{url}' must be http or https"
            )));
        }

        let resp = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeriveError::Timeout {
                        stage: "fetch".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    fetch_err(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {status}")));
        }
        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(fetch_err(format!(
                "body exceeds {} bytes",
                self.max_bytes
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| fetch_err(format!("reading body failed: {e}")))?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(fetch_err(format!("body exceeds {} bytes", self.max_bytes)));
        }

        tracing::debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let fetcher = OriginFetcher::new(&LimitsConfig::default());
        let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, DeriveError::InvalidParameters(_)));
        assert!(fetcher.fetch("not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_fetch_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = OriginFetcher::new(&LimitsConfig::default());
        let err = fetcher
            .fetch(&format!("http://{addr}/image.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeriveError::Fetch { .. }));
    }
}
