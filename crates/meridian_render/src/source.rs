//! Where media bytes come from.

use async_trait::async_trait;
use meridian_error::{HttpError, MeridianResult};
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Downloaded media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Body bytes
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
}

/// Fetches the bytes behind a media URL.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Download `url`.
    async fn download(&self, url: &str) -> MeridianResult<Download>;
}

/// Media source over HTTPS, retrying transient failures.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source with a browser-like user agent.
    pub fn new() -> MeridianResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(HttpError::from)?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn attempt(&self, url: &str) -> Result<Download, RetryError<HttpError>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            let err = HttpError::from(e);
            tracing::warn!(error = %err, "Download attempt failed, will retry");
            RetryError::Transient {
                err,
                retry_after: None,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = HttpError::status(status.as_u16(), format!("{} returned {}", url, status));
            return if status.is_server_error() || status.as_u16() == 429 {
                tracing::warn!(status = status.as_u16(), "Transient upstream status");
                Err(RetryError::Transient {
                    err,
                    retry_after: None,
                })
            } else {
                Err(RetryError::Permanent(err))
            };
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RetryError::Transient {
                err: HttpError::from(e),
                retry_after: None,
            })?
            .to_vec();
        Ok(Download {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl MediaSource for HttpSource {
    #[tracing::instrument(skip(self))]
    async fn download(&self, url: &str) -> MeridianResult<Download> {
        let strategy = ExponentialBackoff::from_millis(250)
            .factor(2)
            .max_delay(Duration::from_secs(4))
            .map(jitter)
            .take(2);

        let download = Retry::spawn(strategy, || self.attempt(url)).await?;
        tracing::debug!(size = download.bytes.len(), "Downloaded media");
        Ok(download)
    }
}
