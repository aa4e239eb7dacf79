//! The single point of contact with the provider for data requests.
//!
//! One logical fetch is:
//!
//! 1. cache lookup (unless the mode skips reads)
//! 2. current credential
//! 3. rate-limiter slot for the descriptor host
//! 4. HTTP call with cookie header and `crumb` query parameter
//! 5. classification of the outcome
//!
//! An authentication rejection replays steps 2-5 once without spending
//! budget. Throttling and transient failures back off and spend budget.
//! A body is cached only after it decodes: callers with a richer payload
//! format pass their decoder to [`FetchClient::fetch_decoded`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheMode, CacheStore};
use crate::cancel::Cancellation;
use crate::credential::CredentialManager;
use crate::http_client::{HttpClient, HttpRequest};
use crate::rate_limiter::RateLimiter;
use crate::retry::{classify_status, AttemptBudget, RetryConfig, RetryState, StatusClass};
use crate::{FetchError, FetchErrorKind, RequestDescriptor};

enum RetryableFailure {
    Throttled(String),
    Network(String),
}

/// Orchestrates cache, credentials, rate limiting and retries.
#[derive(Clone)]
pub struct FetchClient {
    http: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    credentials: Arc<CredentialManager>,
    cache: CacheStore,
    retry: RetryConfig,
    default_ttl: Duration,
    request_timeout: Duration,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("limiter", &self.limiter)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        limiter: RateLimiter,
        credentials: Arc<CredentialManager>,
        cache: CacheStore,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            limiter,
            credentials,
            cache,
            retry,
            default_ttl: Duration::from_secs(15 * 60),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// TTL used by [`fetch`](Self::fetch).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch the raw body for `descriptor` using the cache normally.
    pub async fn fetch(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &Cancellation,
    ) -> Result<String, FetchError> {
        self.fetch_with_mode(descriptor, self.default_ttl, CacheMode::Use, cancel)
            .await
    }

    pub async fn fetch_with_mode(
        &self,
        descriptor: &RequestDescriptor,
        ttl: Duration,
        mode: CacheMode,
        cancel: &Cancellation,
    ) -> Result<String, FetchError> {
        self.fetch_decoded(descriptor, ttl, mode, cancel, |body| {
            serde_json::from_str::<serde_json::Value>(body)
                .map(|_| body.to_owned())
                .map_err(|error| {
                    FetchError::malformed(
                        format!("{} returned an unparsable body: {error}", descriptor.path()),
                        0,
                    )
                })
        })
        .await
    }

    /// Fetch `descriptor` and run `decode` on the body.
    ///
    /// A fresh body is cached only when `decode` accepts it. A cached body
    /// that `decode` rejects is evicted and fetched again.
    pub async fn fetch_decoded<T, F>(
        &self,
        descriptor: &RequestDescriptor,
        ttl: Duration,
        mode: CacheMode,
        cancel: &Cancellation,
        decode: F,
    ) -> Result<T, FetchError>
    where
        F: Fn(&str) -> Result<T, FetchError>,
    {
        if mode.reads() {
            if let Some(payload) = self.cache.get(descriptor).await {
                match decode(&payload) {
                    Ok(decoded) => return Ok(decoded),
                    Err(error) => {
                        warn!(path = descriptor.path(), %error, "evicting undecodable cached body");
                        self.cache.invalidate(descriptor).await;
                    }
                }
            }
        }

        let mut budget = AttemptBudget::new(self.retry);
        let mut calls = 0_u32;
        let mut auth_replayed = false;
        budget.begin();

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::cancelled(calls));
            }

            let credential = self.credentials.current(cancel).await.map_err(|error| {
                if error.kind() == FetchErrorKind::Cancelled {
                    error.with_attempts(calls)
                } else {
                    error
                }
            })?;

            self.limiter
                .acquire(descriptor.host(), cancel)
                .await
                .map_err(|_| FetchError::cancelled(calls))?;

            let mut request = HttpRequest::new(
                descriptor.method(),
                descriptor.url_with(&[("crumb", credential.crumb())]),
            )
            .with_cookie(credential.cookie())
            .with_timeout(self.request_timeout);
            if let Some(body) = descriptor.body() {
                request = request
                    .with_header("content-type", "application/json")
                    .with_body(body);
            }

            calls += 1;
            debug!(
                host = descriptor.host(),
                path = descriptor.path(),
                attempt = budget.attempts(),
                "sending request"
            );
            let outcome = cancel
                .run(self.http.execute(request))
                .await
                .map_err(|_| FetchError::cancelled(calls))?;

            let failure = match outcome {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        let decoded = decode(&response.body)
                            .map_err(|error| error.with_attempts(calls))?;
                        budget.record_success();
                        if mode.writes() {
                            self.cache.put(descriptor, &response.body, ttl).await;
                        }
                        return Ok(decoded);
                    }
                    StatusClass::AuthRejected => {
                        if auth_replayed {
                            return Err(FetchError::auth_unavailable(
                                "provider rejected a freshly refreshed credential",
                                calls,
                            ));
                        }
                        auth_replayed = true;
                        warn!(path = descriptor.path(), "credential rejected, refreshing once");
                        self.credentials.invalidate_stale(&credential).await;
                        budget.replay();
                        continue;
                    }
                    StatusClass::Throttled => RetryableFailure::Throttled(format!(
                        "{} kept answering 429 Too Many Requests",
                        descriptor.host()
                    )),
                    StatusClass::Transient => RetryableFailure::Network(format!(
                        "{} answered status {}",
                        descriptor.host(),
                        response.status
                    )),
                    StatusClass::Rejected => {
                        return Err(FetchError::new(
                            FetchErrorKind::InvalidRequest,
                            rejection_message(response.status, &response.body),
                            calls,
                        ));
                    }
                },
                Err(error) if error.retryable() => {
                    RetryableFailure::Network(error.message().to_owned())
                }
                Err(error) => {
                    return Err(FetchError::network(error.message(), calls));
                }
            };

            match budget.record_failure() {
                RetryState::Backoff { attempt, delay } => {
                    let reason = match &failure {
                        RetryableFailure::Throttled(message) | RetryableFailure::Network(message) => {
                            message.as_str()
                        }
                    };
                    warn!(attempt, ?delay, reason, "request failed, backing off");
                    cancel
                        .run(tokio::time::sleep(delay))
                        .await
                        .map_err(|_| FetchError::cancelled(calls))?;
                    budget.begin();
                }
                _ => {
                    return Err(match failure {
                        RetryableFailure::Throttled(message) => {
                            FetchError::rate_limited(message, calls)
                        }
                        RetryableFailure::Network(message) => FetchError::network(message, calls),
                    });
                }
            }
        }
    }
}

/// Provider error description from a rejected response, falling back to
/// the status code.
fn rejection_message(status: u16, body: &str) -> String {
    let description = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["/chart/error/description", "/finance/error/description"]
                .iter()
                .find_map(|pointer| value.pointer(pointer).and_then(|v| v.as_str()).map(str::to_owned))
        });

    match description {
        Some(description) => format!("provider rejected the request ({status}): {description}"),
        None => format!("provider rejected the request with status {status}"),
    }
}
