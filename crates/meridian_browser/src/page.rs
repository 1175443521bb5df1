//! Browser abstractions borrowed by fetchers.

use crate::{BrowserAccount, Cookie, StorageState};
use async_trait::async_trait;
use meridian_error::{BrowserError, BrowserErrorKind, MeridianResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A network response captured by an [`Interceptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    /// Response URL
    pub url: String,
    /// HTTP status
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl InterceptedResponse {
    /// Parse the body as JSON.
    pub fn json(&self) -> MeridianResult<serde_json::Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            BrowserError::new(BrowserErrorKind::Evaluation(format!("{}: {}", self.url, e))).into()
        })
    }
}

/// Stream of responses whose URL matched a registered pattern.
///
/// Dropping the interceptor stops the capture.
#[derive(Debug)]
pub struct Interceptor {
    rx: mpsc::Receiver<InterceptedResponse>,
    task: Option<JoinHandle<()>>,
}

impl Interceptor {
    /// Wrap a receiver, optionally owning the task feeding it.
    pub fn new(rx: mpsc::Receiver<InterceptedResponse>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next matching response.
    pub async fn next(&mut self, timeout: Duration) -> MeridianResult<InterceptedResponse> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(BrowserError::new(BrowserErrorKind::Closed(
                "interceptor source ended".into(),
            ))
            .into()),
            Err(_) => Err(BrowserError::new(BrowserErrorKind::Timeout(format!(
                "no intercepted response within {}s",
                timeout.as_secs()
            )))
            .into()),
        }
    }

    /// A response already captured, without waiting.
    pub fn try_next(&mut self) -> Option<InterceptedResponse> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A tab inside a browser context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the load event.
    async fn navigate(&self, url: &str) -> MeridianResult<()>;

    /// URL currently shown.
    async fn current_url(&self) -> MeridianResult<String>;

    /// Serialized DOM.
    async fn content(&self) -> MeridianResult<String>;

    /// Evaluate a script expression and return its JSON value.
    async fn evaluate(&self, expression: &str) -> MeridianResult<serde_json::Value>;

    /// Capture responses whose URL contains `url_pattern`.
    async fn intercept(&self, url_pattern: &str) -> MeridianResult<Interceptor>;

    /// Close the tab.
    async fn close(&self) -> MeridianResult<()>;
}

/// An isolated cookie jar, optionally authenticated and proxied.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open a new tab.
    async fn new_page(&self) -> MeridianResult<Arc<dyn Page>>;

    /// Snapshot the session for persistence.
    async fn storage_state(&self) -> MeridianResult<StorageState>;

    /// Add cookies to the context's jar.
    async fn add_cookies(&self, cookies: &[Cookie]) -> MeridianResult<()>;

    /// Dispose of the context and its tabs.
    async fn close(&self) -> MeridianResult<()>;
}

/// What a new context should look like.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSpec {
    /// Account the context belongs to
    pub account: Option<String>,
    /// Proxy server
    pub proxy: Option<String>,
    /// Session to restore
    pub storage: Option<StorageState>,
}

/// Creates browser contexts.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    /// Create a context.
    async fn create(&self, spec: &ContextSpec) -> MeridianResult<Arc<dyn BrowserContext>>;
}

/// Logs a fresh context into a third-party account.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// Perform the login.
    async fn login(
        &self,
        context: &dyn BrowserContext,
        account: &BrowserAccount,
    ) -> MeridianResult<()>;
}
