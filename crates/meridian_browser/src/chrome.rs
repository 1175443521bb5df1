//! Chrome contexts over the DevTools protocol.

use crate::cdp::CdpConnection;
use crate::{
    BrowserContext, ContextFactory, ContextSpec, Cookie, InterceptedResponse, Interceptor, Page,
    StorageState,
};
use async_trait::async_trait;
use base64::Engine;
use meridian_error::{BrowserError, BrowserErrorKind, HttpError, MeridianResult};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const INTERCEPT_BUFFER: usize = 32;

/// Creates contexts in a running Chrome reached through its DevTools endpoint.
#[derive(Debug, Clone)]
pub struct ChromeFactory {
    browser: Arc<CdpConnection>,
    ws_base: String,
}

impl ChromeFactory {
    /// Connect to `http://host:port`, the browser's remote debugging endpoint.
    #[tracing::instrument]
    pub async fn connect(endpoint: &str) -> MeridianResult<Self> {
        let version: Value = reqwest::get(format!("{}/json/version", endpoint.trim_end_matches('/')))
            .await
            .map_err(HttpError::from)?
            .json()
            .await
            .map_err(HttpError::from)?;
        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::new(BrowserErrorKind::Connection(
                    "endpoint did not report webSocketDebuggerUrl".into(),
                ))
            })?;
        let ws_base = ws_url
            .split("/devtools/")
            .next()
            .unwrap_or(ws_url)
            .to_string();

        let browser = Arc::new(CdpConnection::connect(ws_url).await?);
        tracing::info!(ws_base = %ws_base, "Connected to browser");
        Ok(Self { browser, ws_base })
    }
}

#[async_trait]
impl ContextFactory for ChromeFactory {
    #[tracing::instrument(skip(self, spec), fields(account = ?spec.account, proxy = ?spec.proxy))]
    async fn create(&self, spec: &ContextSpec) -> MeridianResult<Arc<dyn BrowserContext>> {
        let mut params = json!({ "disposeOnDetach": false });
        if let Some(proxy) = &spec.proxy {
            params["proxyServer"] = json!(proxy);
        }
        let created = self.browser.call("Target.createBrowserContext", params).await?;
        let context_id = created
            .get("browserContextId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::new(BrowserErrorKind::Protocol {
                    method: "Target.createBrowserContext".into(),
                    message: "missing browserContextId".into(),
                })
            })?
            .to_string();

        if let Some(storage) = spec.storage.as_ref().filter(|s| !s.is_empty()) {
            self.browser
                .call(
                    "Storage.setCookies",
                    json!({ "cookies": storage.cookies, "browserContextId": context_id }),
                )
                .await?;
            tracing::debug!(cookies = storage.cookies.len(), "Restored session cookies");
        }

        Ok(Arc::new(ChromeContext {
            browser: self.browser.clone(),
            ws_base: self.ws_base.clone(),
            context_id,
        }))
    }
}

/// A Chrome browser context.
#[derive(Debug)]
pub struct ChromeContext {
    browser: Arc<CdpConnection>,
    ws_base: String,
    context_id: String,
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn new_page(&self) -> MeridianResult<Arc<dyn Page>> {
        let target = self
            .browser
            .call(
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": self.context_id }),
            )
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::new(BrowserErrorKind::Protocol {
                    method: "Target.createTarget".into(),
                    message: "missing targetId".into(),
                })
            })?
            .to_string();

        let conn = Arc::new(
            CdpConnection::connect(&format!("{}/devtools/page/{}", self.ws_base, target_id)).await?,
        );
        conn.call("Page.enable", json!({})).await?;
        conn.call("Network.enable", json!({})).await?;

        Ok(Arc::new(ChromePage {
            conn,
            browser: self.browser.clone(),
            target_id,
        }))
    }

    async fn storage_state(&self) -> MeridianResult<StorageState> {
        let result = self
            .browser
            .call(
                "Storage.getCookies",
                json!({ "browserContextId": self.context_id }),
            )
            .await?;
        let state = serde_json::from_value::<StorageState>(result).map_err(|e| {
            BrowserError::new(BrowserErrorKind::Protocol {
                method: "Storage.getCookies".into(),
                message: e.to_string(),
            })
        })?;
        Ok(state)
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> MeridianResult<()> {
        self.browser
            .call(
                "Storage.setCookies",
                json!({ "cookies": cookies, "browserContextId": self.context_id }),
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> MeridianResult<()> {
        self.browser
            .call(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.context_id }),
            )
            .await?;
        Ok(())
    }
}

/// A Chrome tab.
#[derive(Debug)]
pub struct ChromePage {
    conn: Arc<CdpConnection>,
    browser: Arc<CdpConnection>,
    target_id: String,
}

#[async_trait]
impl Page for ChromePage {
    #[tracing::instrument(skip(self))]
    async fn navigate(&self, url: &str) -> MeridianResult<()> {
        let mut events = self.conn.subscribe();
        let result = self.conn.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(BrowserError::new(BrowserErrorKind::Navigation(format!(
                "{}: {}",
                url, error
            )))
            .into());
        }

        let loaded = tokio::time::timeout(LOAD_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(event) if event.method == "Page.loadEventFired" => return true,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;
        match loaded {
            Ok(true) => Ok(()),
            Ok(false) => Err(BrowserError::new(BrowserErrorKind::Closed(url.to_string())).into()),
            Err(_) => {
                tracing::warn!("Load event not fired, continuing with partial page");
                Ok(())
            }
        }
    }

    async fn current_url(&self) -> MeridianResult<String> {
        let value = self.evaluate("location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self) -> MeridianResult<String> {
        let value = self.evaluate("document.documentElement.outerHTML").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, expression: &str) -> MeridianResult<Value> {
        let result = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(BrowserError::new(BrowserErrorKind::Evaluation(details.to_string())).into());
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn intercept(&self, url_pattern: &str) -> MeridianResult<Interceptor> {
        let (tx, rx) = mpsc::channel(INTERCEPT_BUFFER);
        let mut events = self.conn.subscribe();
        let conn = self.conn.clone();
        let pattern = url_pattern.to_string();

        let task = tokio::spawn(async move {
            let mut matched: HashMap<String, (String, u16)> = HashMap::new();
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Interceptor lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let request_id = event
                    .params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match event.method.as_str() {
                    "Network.responseReceived" => {
                        let response = &event.params["response"];
                        let url = response["url"].as_str().unwrap_or_default();
                        if url.contains(&pattern) {
                            let status = response["status"].as_u64().unwrap_or(0) as u16;
                            matched.insert(request_id, (url.to_string(), status));
                        }
                    }
                    "Network.loadingFinished" => {
                        let Some((url, status)) = matched.remove(&request_id) else {
                            continue;
                        };
                        let body = match conn
                            .call("Network.getResponseBody", json!({ "requestId": request_id }))
                            .await
                        {
                            Ok(body) => decode_body(&body),
                            Err(e) => {
                                tracing::debug!(error = %e, url = %url, "Response body unavailable");
                                continue;
                            }
                        };
                        if tx.send(InterceptedResponse { url, status, body }).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(Interceptor::new(rx, Some(task)))
    }

    async fn close(&self) -> MeridianResult<()> {
        self.browser
            .call("Target.closeTarget", json!({ "targetId": self.target_id }))
            .await?;
        Ok(())
    }
}

fn decode_body(result: &Value) -> String {
    let body = result["body"].as_str().unwrap_or_default();
    if result["base64Encoded"].as_bool().unwrap_or(false) {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    } else {
        body.to_string()
    }
}
