//! Bounded retry with exponential backoff and jitter.
//!
//! Retries are driven by an explicit state machine:
//!
//! ```text
//! Attempting -> Backoff -> Attempting -> ... -> Exhausted | Success
//! ```
//!
//! [`AttemptBudget`] owns the transitions; callers perform the I/O and the
//! sleeps.

use std::time::Duration;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ retry)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    let jitter_ms = millis / 2;
                    let offset = fastrand::u64(0..=jitter_ms.saturating_mul(2));
                    delay = Duration::from_millis((millis - jitter_ms).saturating_add(offset));
                }

                delay
            }
        }
    }
}

/// Attempt budget and backoff shared by data requests and credential refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the default base and cap.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

/// How an HTTP status participates in the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401: the credential was rejected.
    AuthRejected,
    /// 429: the provider is throttling.
    Throttled,
    /// 408 or 5xx.
    Transient,
    /// Any other non-success status; retrying cannot help.
    Rejected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::AuthRejected,
        429 => StatusClass::Throttled,
        408 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}

/// Position in the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `attempt` (1-based) is in flight.
    Attempting { attempt: u32 },
    /// Waiting `delay` before the next attempt.
    Backoff { attempt: u32, delay: Duration },
    /// No attempts left; `attempts` were made.
    Exhausted { attempts: u32 },
    Success { attempts: u32 },
}

/// Counts attempts against a [`RetryConfig`] and yields the next state.
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    config: RetryConfig,
    attempts: u32,
    state: RetryState,
}

impl AttemptBudget {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            state: RetryState::Attempting { attempt: 0 },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Counted attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Start the next counted attempt and return its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.state = RetryState::Attempting {
            attempt: self.attempts,
        };
        self.attempts
    }

    /// Re-run the current attempt without spending budget.
    pub fn replay(&mut self) {
        self.state = RetryState::Attempting {
            attempt: self.attempts,
        };
    }

    /// Record a retryable failure of the current attempt.
    ///
    /// Returns `Backoff` with the delay to wait, or `Exhausted` when the
    /// budget is spent.
    pub fn record_failure(&mut self) -> RetryState {
        self.state = if self.attempts >= self.max_attempts() {
            RetryState::Exhausted {
                attempts: self.attempts,
            }
        } else {
            let retry = self.attempts.saturating_sub(1);
            RetryState::Backoff {
                attempt: self.attempts,
                delay: self.config.delay_for_retry(retry),
            }
        };
        self.state
    }

    pub fn record_success(&mut self) -> RetryState {
        self.state = RetryState::Success {
            attempts: self.attempts,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(200),
                factor: 2.0,
                max: Duration::from_secs(3),
                jitter: false,
            },
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1)); // capped
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for retry in 0..5 {
                let delay_ms = backoff.delay(retry).as_millis() as f64;
                let expected = (100.0 * 2_f64.powi(retry as i32)).min(1000.0);
                assert!(delay_ms >= expected * 0.49, "retry={retry}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.51, "retry={retry}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn default_budget_is_three_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(401), StatusClass::AuthRejected);
        assert_eq!(classify_status(429), StatusClass::Throttled);
        assert_eq!(classify_status(408), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(404), StatusClass::Rejected);
        assert_eq!(classify_status(403), StatusClass::Rejected);
    }

    #[test]
    fn budget_walks_backoff_then_exhausts() {
        let mut budget = AttemptBudget::new(no_jitter(3));

        assert_eq!(budget.begin(), 1);
        assert_eq!(
            budget.record_failure(),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(budget.begin(), 2);
        assert_eq!(
            budget.record_failure(),
            RetryState::Backoff {
                attempt: 2,
                delay: Duration::from_millis(400)
            }
        );
        assert_eq!(budget.begin(), 3);
        assert_eq!(budget.record_failure(), RetryState::Exhausted { attempts: 3 });
    }

    #[test]
    fn replay_does_not_spend_budget() {
        let mut budget = AttemptBudget::new(no_jitter(1));
        budget.begin();
        budget.replay();
        assert_eq!(budget.state(), RetryState::Attempting { attempt: 1 });
        assert_eq!(budget.record_success(), RetryState::Success { attempts: 1 });
    }

    #[test]
    fn zero_attempt_budget_still_allows_one_attempt() {
        let mut budget = AttemptBudget::new(no_jitter(0));
        assert_eq!(budget.max_attempts(), 1);
        budget.begin();
        assert_eq!(budget.record_failure(), RetryState::Exhausted { attempts: 1 });
    }
}
