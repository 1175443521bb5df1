//! In-process browser that replays scripted pages.
//!
//! Routes are matched by URL prefix (longest wins). A route supplies the DOM,
//! the URL the page ends up on, script values keyed by expression, and the
//! network responses the page "loads", which are fed to interceptors
//! registered before navigation.

use crate::{
    BrowserAccount, BrowserContext, ContextFactory, ContextSpec, Cookie, InterceptedResponse,
    Interceptor, LoginFlow, Page, StorageState,
};
use async_trait::async_trait;
use meridian_error::{BrowserError, BrowserErrorKind, MeridianResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// What a scripted URL serves.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoute {
    /// Serialized DOM
    pub html: String,
    /// URL after redirects; the requested URL when `None`
    pub final_url: Option<String>,
    /// Network responses observed while loading
    pub responses: Vec<InterceptedResponse>,
    /// Values returned for exact script expressions
    pub evaluations: HashMap<String, Value>,
}

impl ScriptedRoute {
    /// Route serving `html`.
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    /// Add a network response.
    pub fn with_response(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses.push(InterceptedResponse {
            url: url.into(),
            status: 200,
            body: body.into(),
        });
        self
    }

    /// Set the landing URL.
    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }

    /// Answer a script expression.
    pub fn with_evaluation(mut self, expression: impl Into<String>, value: Value) -> Self {
        self.evaluations.insert(expression.into(), value);
        self
    }
}

#[derive(Debug, Default)]
struct Site {
    routes: Mutex<HashMap<String, ScriptedRoute>>,
    navigations: Mutex<Vec<String>>,
    contexts: AtomicUsize,
    logins: AtomicUsize,
}

impl Site {
    fn route(&self, url: &str) -> Option<ScriptedRoute> {
        let routes = self.routes.lock();
        routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, route)| route.clone())
    }
}

/// Factory of scripted contexts.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    site: Arc<Site>,
}

impl ScriptedFactory {
    /// Empty site.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `route` for URLs starting with `prefix`.
    pub fn route(&self, prefix: impl Into<String>, route: ScriptedRoute) -> &Self {
        self.site.routes.lock().insert(prefix.into(), route);
        self
    }

    /// URLs navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.site.navigations.lock().clone()
    }

    /// Contexts created so far.
    pub fn contexts_created(&self) -> usize {
        self.site.contexts.load(Ordering::SeqCst)
    }

    /// Logins performed by [`ScriptedLogin`].
    pub fn logins(&self) -> usize {
        self.site.logins.load(Ordering::SeqCst)
    }

    /// A login flow that records itself on this site.
    pub fn login_flow(&self) -> ScriptedLogin {
        ScriptedLogin {
            site: self.site.clone(),
        }
    }
}

#[async_trait]
impl ContextFactory for ScriptedFactory {
    async fn create(&self, spec: &ContextSpec) -> MeridianResult<Arc<dyn BrowserContext>> {
        self.site.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedContext {
            site: self.site.clone(),
            state: Mutex::new(spec.storage.clone().unwrap_or_default()),
        }))
    }
}

/// A scripted context; its session is whatever was restored or logged in.
#[derive(Debug)]
pub struct ScriptedContext {
    site: Arc<Site>,
    state: Mutex<StorageState>,
}

#[async_trait]
impl BrowserContext for ScriptedContext {
    async fn new_page(&self) -> MeridianResult<Arc<dyn Page>> {
        Ok(Arc::new(ScriptedPage {
            site: self.site.clone(),
            current: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }))
    }

    async fn storage_state(&self) -> MeridianResult<StorageState> {
        Ok(self.state.lock().clone())
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> MeridianResult<()> {
        self.state.lock().cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn close(&self) -> MeridianResult<()> {
        Ok(())
    }
}

/// A scripted tab.
#[derive(Debug)]
pub struct ScriptedPage {
    site: Arc<Site>,
    current: Mutex<Option<(String, ScriptedRoute)>>,
    listeners: Mutex<Vec<(String, mpsc::Sender<InterceptedResponse>)>>,
}

#[async_trait]
impl Page for ScriptedPage {
    async fn navigate(&self, url: &str) -> MeridianResult<()> {
        self.site.navigations.lock().push(url.to_string());
        let route = self.site.route(url).ok_or_else(|| {
            BrowserError::new(BrowserErrorKind::Navigation(format!("no route for {}", url)))
        })?;

        let listeners = self.listeners.lock().clone();
        for response in &route.responses {
            for (pattern, tx) in &listeners {
                if response.url.contains(pattern.as_str()) {
                    let _ = tx.try_send(response.clone());
                }
            }
        }

        let landed = route.final_url.clone().unwrap_or_else(|| url.to_string());
        *self.current.lock() = Some((landed, route));
        Ok(())
    }

    async fn current_url(&self) -> MeridianResult<String> {
        Ok(self
            .current
            .lock()
            .as_ref()
            .map(|(url, _)| url.clone())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&self) -> MeridianResult<String> {
        Ok(self
            .current
            .lock()
            .as_ref()
            .map(|(_, route)| route.html.clone())
            .unwrap_or_default())
    }

    async fn evaluate(&self, expression: &str) -> MeridianResult<Value> {
        let current = self.current.lock();
        let Some((url, route)) = current.as_ref() else {
            return Ok(Value::Null);
        };
        if expression == "location.href" {
            return Ok(Value::String(url.clone()));
        }
        Ok(route.evaluations.get(expression).cloned().unwrap_or(Value::Null))
    }

    async fn intercept(&self, url_pattern: &str) -> MeridianResult<Interceptor> {
        let (tx, rx) = mpsc::channel(64);
        self.listeners.lock().push((url_pattern.to_string(), tx));
        Ok(Interceptor::new(rx, None))
    }

    async fn close(&self) -> MeridianResult<()> {
        self.listeners.lock().clear();
        Ok(())
    }
}

/// Login flow that "authenticates" by writing a session cookie.
#[derive(Debug, Clone)]
pub struct ScriptedLogin {
    site: Arc<Site>,
}

#[async_trait]
impl LoginFlow for ScriptedLogin {
    async fn login(
        &self,
        context: &dyn BrowserContext,
        account: &BrowserAccount,
    ) -> MeridianResult<()> {
        self.site.logins.fetch_add(1, Ordering::SeqCst);
        context
            .add_cookies(&[Cookie {
                name: "sessionid".into(),
                value: account.username().clone(),
                domain: ".scripted".into(),
                path: "/".into(),
                expires: None,
                http_only: true,
                secure: true,
            }])
            .await
    }
}
