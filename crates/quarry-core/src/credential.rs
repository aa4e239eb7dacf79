//! Session cookie and crumb acquisition.
//!
//! The chart API wants a session cookie (handed out by `fc.yahoo.com`) and a
//! crumb derived from it (`/v1/test/getcrumb`). One [`CredentialManager`]
//! owns the pair for the whole pipeline and refreshes it when it expires or
//! the provider rejects it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::rate_limiter::RateLimiter;
use crate::retry::{AttemptBudget, RetryConfig, RetryState};
use crate::FetchError;

const REFERER: &str = "https://finance.yahoo.com/";
const MAX_CRUMB_LEN: usize = 100;

/// Where and how often credentials are refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialConfig {
    pub ttl: Duration,
    /// Unauthenticated page whose `Set-Cookie` headers carry the session.
    pub warmup_url: String,
    /// Crumb endpoints, tried in order within one refresh attempt.
    pub crumb_urls: Vec<String>,
    /// Budget for whole refresh attempts (warm-up plus crumb).
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            warmup_url: String::from("https://fc.yahoo.com"),
            crumb_urls: vec![
                String::from("https://query1.finance.yahoo.com/v1/test/getcrumb"),
                String::from("https://query2.finance.yahoo.com/v1/test/getcrumb"),
            ],
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Session cookie plus crumb, valid until `expires_at`.
///
/// The secret values are only readable inside the crate.
pub struct Credential {
    cookie: String,
    crumb: String,
    issued_at: Instant,
    expires_at: Instant,
}

impl Credential {
    pub(crate) fn new(cookie: String, crumb: String, ttl: Duration) -> Self {
        let issued_at = Instant::now();
        Self {
            cookie,
            crumb,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub(crate) fn cookie(&self) -> &str {
        &self.cookie
    }

    pub(crate) fn crumb(&self) -> &str {
        &self.crumb
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("cookie", &"<redacted>")
            .field("crumb", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

enum RefreshFailure {
    Cancelled,
    Failed(String),
}

/// Owns the active credential and coalesces refreshes.
///
/// Concurrent [`current`](Self::current) calls that find no usable
/// credential queue on one async lock; the first performs the refresh and
/// the rest reuse its result.
pub struct CredentialManager {
    http: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    config: CredentialConfig,
    slot: Mutex<Option<Arc<Credential>>>,
    refreshes: AtomicU64,
}

impl CredentialManager {
    pub fn new(http: Arc<dyn HttpClient>, limiter: RateLimiter, config: CredentialConfig) -> Self {
        Self {
            http,
            limiter,
            config,
            slot: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// A credential valid at the instant of return, refreshing if needed.
    pub async fn current(&self, cancel: &Cancellation) -> Result<Arc<Credential>, FetchError> {
        let mut slot = cancel
            .run(self.slot.lock())
            .await
            .map_err(|_| FetchError::cancelled(0))?;

        if let Some(credential) = slot.as_ref() {
            if credential.is_fresh(Instant::now()) {
                return Ok(Arc::clone(credential));
            }
            debug!("credential expired");
        }

        *slot = None;
        let credential = Arc::new(self.refresh(cancel).await?);
        *slot = Some(Arc::clone(&credential));
        Ok(credential)
    }

    /// Drop the active credential so the next `current()` refreshes.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    /// Drop `credential` only if it is still the active one.
    ///
    /// Returns whether it was dropped. Callers that were rejected with an
    /// older credential leave a newer one alone.
    pub async fn invalidate_stale(&self, credential: &Arc<Credential>) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(active) if Arc::ptr_eq(active, credential) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Number of completed refreshes since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn refresh(&self, cancel: &Cancellation) -> Result<Credential, FetchError> {
        let mut budget = AttemptBudget::new(self.config.retry);

        loop {
            let attempt = budget.begin();
            let reason = match self.try_refresh(cancel).await {
                Ok(credential) => {
                    budget.record_success();
                    self.refreshes.fetch_add(1, Ordering::Relaxed);
                    info!(attempt, "credential refreshed");
                    return Ok(credential);
                }
                Err(RefreshFailure::Cancelled) => {
                    return Err(FetchError::cancelled(budget.attempts()));
                }
                Err(RefreshFailure::Failed(reason)) => reason,
            };

            match budget.record_failure() {
                RetryState::Backoff { delay, .. } => {
                    warn!(attempt, ?delay, %reason, "credential refresh failed, backing off");
                    cancel
                        .run(tokio::time::sleep(delay))
                        .await
                        .map_err(|_| FetchError::cancelled(budget.attempts()))?;
                }
                _ => {
                    warn!(attempt, %reason, "credential refresh exhausted its attempts");
                    return Err(FetchError::auth_unavailable(
                        format!("credential refresh failed: {reason}"),
                        budget.attempts(),
                    ));
                }
            }
        }
    }

    async fn try_refresh(&self, cancel: &Cancellation) -> Result<Credential, RefreshFailure> {
        let warmup = self
            .send(
                HttpRequest::get(self.config.warmup_url.as_str()).with_header("referer", REFERER),
                cancel,
            )
            .await?
            .map_err(RefreshFailure::Failed)?;

        let cookie = session_cookie(&warmup).ok_or_else(|| {
            RefreshFailure::Failed(format!(
                "warm-up response (status {}) carried no session cookie",
                warmup.status
            ))
        })?;

        let mut last_failure = String::from("no crumb endpoint configured");
        for url in &self.config.crumb_urls {
            let request = HttpRequest::get(url.as_str())
                .with_header("referer", REFERER)
                .with_cookie(cookie.as_str());

            match self.send(request, cancel).await? {
                Ok(response) if response.is_success() => match parse_crumb(&response.body) {
                    Some(crumb) => {
                        return Ok(Credential::new(cookie, crumb.to_owned(), self.config.ttl));
                    }
                    None => last_failure = format!("{url} returned an unusable crumb"),
                },
                Ok(response) => {
                    last_failure = format!("{url} returned status {}", response.status);
                }
                Err(message) => last_failure = message,
            }
        }

        Err(RefreshFailure::Failed(last_failure))
    }

    /// Acquire a rate-limiter slot and execute `request`. The outer error is
    /// cancellation; the inner one a transport failure message.
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &Cancellation,
    ) -> Result<Result<HttpResponse, String>, RefreshFailure> {
        let host = host_of(&request.url);
        self.limiter
            .acquire(&host, cancel)
            .await
            .map_err(|_| RefreshFailure::Cancelled)?;

        let request = request.with_timeout(self.config.request_timeout);
        let outcome = cancel
            .run(self.http.execute(request))
            .await
            .map_err(|_| RefreshFailure::Cancelled)?;
        Ok(outcome.map_err(|error| error.message().to_owned()))
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("config", &self.config)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

pub(crate) fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}

/// `name=value` pairs from every `Set-Cookie` header, joined for a `Cookie`
/// request header.
fn session_cookie(response: &HttpResponse) -> Option<String> {
    let pairs: Vec<&str> = response
        .header_values("set-cookie")
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.starts_with('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn parse_crumb(body: &str) -> Option<&str> {
    let crumb = body.trim();
    let usable = !crumb.is_empty()
        && crumb.len() < MAX_CRUMB_LEN
        && !crumb.chars().any(char::is_whitespace)
        && !crumb.contains('<');
    usable.then_some(crumb)
}
