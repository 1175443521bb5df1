//! Direct HTTPS access for fetchers that do not need a browser.

use async_trait::async_trait;
use meridian_error::{FetchError, FetchErrorKind, HttpError, MeridianResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Desktop browser user agent sent by default.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A text field
    Text(String, String),
    /// A file field: name, filename, mime, bytes
    File(String, String, String, Vec<u8>),
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// JSON document
    Json(serde_json::Value),
    /// Multipart form
    Multipart(Vec<FormPart>),
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: Body,
    /// Whether redirects are followed
    pub follow_redirects: bool,
}

impl HttpRequest {
    /// A GET following redirects.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
            follow_redirects: true,
        }
    }

    /// A POST with a body.
    pub fn post(url: impl Into<String>, body: Body) -> Self {
        Self {
            method: Method::Post,
            body,
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Stop at the first redirect.
    pub fn no_redirect(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// `Location` header, if any
    pub location: Option<String>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    /// A redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 302,
            location: Some(location.into()),
            body: Vec::new(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> MeridianResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| FetchError::new(FetchErrorKind::Parse(e.to_string())).into())
    }
}

/// Issues HTTP requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: HttpRequest) -> MeridianResult<HttpResponse>;
}

/// Shared HTTP client handle.
pub type SharedHttp = Arc<dyn HttpClient>;

/// [`HttpClient`] over reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    follow: reqwest::Client,
    manual: reqwest::Client,
}

impl ReqwestClient {
    /// Create clients with a desktop user agent and a 30s timeout.
    pub fn new() -> MeridianResult<Self> {
        let build = |policy| {
            reqwest::Client::builder()
                .user_agent(DESKTOP_USER_AGENT)
                .timeout(Duration::from_secs(30))
                .redirect(policy)
                .build()
                .map_err(HttpError::from)
        };
        Ok(Self {
            follow: build(reqwest::redirect::Policy::limited(10))?,
            manual: build(reqwest::redirect::Policy::none())?,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[tracing::instrument(skip(self, request), fields(url = %request.url, method = ?request.method))]
    async fn send(&self, request: HttpRequest) -> MeridianResult<HttpResponse> {
        let client = if request.follow_redirects {
            &self.follow
        } else {
            &self.manual
        };
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(fields) => builder.form(&fields),
            Body::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = match part {
                        FormPart::Text(name, value) => form.text(name, value),
                        FormPart::File(name, filename, mime, bytes) => {
                            let file = reqwest::multipart::Part::bytes(bytes)
                                .file_name(filename)
                                .mime_str(&mime)
                                .map_err(HttpError::from)?;
                            form.part(name, file)
                        }
                    };
                }
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(HttpError::from)?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(HttpError::from)?.to_vec();
        tracing::debug!(status, size = body.len(), "HTTP response");
        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}

/// [`HttpClient`] answering from canned responses, for tests and offline runs.
///
/// The longest registered prefix of the request URL wins; unmatched requests
/// get a 404.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHttp {
    routes: Arc<Mutex<Vec<(String, HttpResponse)>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedHttp {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests starting with `prefix`.
    pub fn route(&self, prefix: impl Into<String>, response: HttpResponse) -> &Self {
        self.routes.lock().push((prefix.into(), response));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// How many requests started with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> MeridianResult<HttpResponse> {
        let response = self
            .routes
            .lock()
            .iter()
            .filter(|(prefix, _)| request.url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| HttpResponse::new(404, "not found"));
        self.requests.lock().push(request);
        Ok(response)
    }
}
