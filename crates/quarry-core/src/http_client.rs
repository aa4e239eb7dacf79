use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Minimal HTTP method set needed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP request envelope handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 10_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_cookie(self, cookie: impl Into<String>) -> Self {
        self.with_header("cookie", cookie)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// HTTP response envelope returned by a transport.
///
/// Header names are lowercased; repeated headers (`set-cookie`) keep one
/// entry per occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HttpError {
    message: String,
    retryable: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Transport contract used by the fetch client and the credential manager.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// Production HTTP client using reqwest.
///
/// Cookies are not stored by the client; the credential manager owns the
/// session cookie and attaches it explicitly.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new(user_agent: &str) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(user_agent)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    /// Create a ReqwestHttpClient with a custom reqwest::Client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_USER_AGENT)
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            builder = builder.timeout(Duration::from_millis(request.timeout_ms));

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::new(format!("request timeout: {}", e))
                } else if e.is_connect() {
                    HttpError::new(format!("connection failed: {}", e))
                } else if e.is_builder() {
                    HttpError::non_retryable(format!("invalid request: {}", e))
                } else {
                    HttpError::new(format!("request failed: {}", e))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_owned(), value.to_owned()))
                })
                .collect();
            let body = response
                .text()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {}", e)))?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

type Reply = Result<HttpResponse, HttpError>;

#[derive(Debug)]
struct Route {
    url_prefix: String,
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
}

#[derive(Debug, Default)]
struct ScriptState {
    routes: Vec<Route>,
    requests: Vec<HttpRequest>,
}

/// In-process transport that replays scripted replies by URL prefix and
/// records every request it receives. Intended for offline tests.
///
/// The longest matching prefix wins. Queued replies are consumed in order;
/// once a route's queue is empty its fallback (if any) repeats.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHttpClient {
    state: Arc<Mutex<ScriptState>>,
    latency: Duration,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue one reply for URLs starting with `url_prefix`.
    pub fn push(&self, url_prefix: &str, reply: Reply) -> &Self {
        self.with_route(url_prefix, |route| route.queued.push_back(reply));
        self
    }

    /// Reply used for `url_prefix` whenever its queue is empty.
    pub fn always(&self, url_prefix: &str, reply: Reply) -> &Self {
        self.with_route(url_prefix, |route| route.fallback = Some(reply));
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, url_prefix: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.url.starts_with(url_prefix))
            .count()
    }

    fn with_route(&self, url_prefix: &str, apply: impl FnOnce(&mut Route)) {
        let mut state = self.lock();
        let index = match state
            .routes
            .iter()
            .position(|route| route.url_prefix == url_prefix)
        {
            Some(index) => index,
            None => {
                state.routes.push(Route {
                    url_prefix: url_prefix.to_owned(),
                    queued: VecDeque::new(),
                    fallback: None,
                });
                state.routes.len() - 1
            }
        };
        apply(&mut state.routes[index]);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, request: HttpRequest) -> Reply {
        let mut state = self.lock();
        let url = request.url.clone();
        state.requests.push(request);

        let route = state
            .routes
            .iter_mut()
            .filter(|route| url.starts_with(&route.url_prefix))
            .max_by_key(|route| route.url_prefix.len());

        match route {
            Some(route) => match route.queued.pop_front() {
                Some(reply) => reply,
                None => route.fallback.clone().unwrap_or_else(|| {
                    Err(HttpError::non_retryable(format!(
                        "no scripted reply left for {}",
                        route.url_prefix
                    )))
                }),
            },
            None => Err(HttpError::non_retryable(format!(
                "no scripted route for {url}"
            ))),
        }
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let reply = self.next_reply(request);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            reply
        })
    }
}
