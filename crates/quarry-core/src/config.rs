//! Pipeline configuration with `QUARRY_*` environment overrides.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `QUARRY_RATE_LIMIT` | requests allowed per window |
//! | `QUARRY_RATE_WINDOW_MS` | window length |
//! | `QUARRY_BURST` | back-to-back requests allowed |
//! | `QUARRY_MAX_ATTEMPTS` | attempts per request, first included |
//! | `QUARRY_BACKOFF_BASE_MS` | first retry delay |
//! | `QUARRY_BACKOFF_MAX_MS` | retry delay cap |
//! | `QUARRY_SPLIT_TOLERANCE` | split ratio match band, in `(0, 1)` |
//! | `QUARRY_CACHE_TTL_INTRADAY_SECS` | intraday chart TTL |
//! | `QUARRY_CACHE_TTL_DAILY_SECS` | daily chart TTL |
//! | `QUARRY_CACHE_TTL_METADATA_SECS` | metadata TTL |
//! | `QUARRY_HOME` | durable cache root |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use quarry_warehouse::WarehouseConfig;

use crate::cache::CacheTtls;
use crate::credential::CredentialConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::repair::RepairConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::ConfigError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Everything needed to assemble a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub credential: CredentialConfig,
    pub cache: CacheTtls,
    pub repair: RepairConfig,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Root of the durable cache. `None` keeps the cache in memory.
    pub quarry_home: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            credential: CredentialConfig::default(),
            cache: CacheTtls::default(),
            repair: RepairConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            request_timeout: Duration::from_secs(10),
            quarry_home: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by `lookup(name)` for each `QUARRY_*` variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let vars = EnvVars { lookup: &lookup };

        if let Some(limit) = vars.positive::<u32>("QUARRY_RATE_LIMIT")? {
            config.rate_limit.quota_limit = limit;
        }
        if let Some(window) = vars.positive::<u64>("QUARRY_RATE_WINDOW_MS")? {
            config.rate_limit.quota_window = Duration::from_millis(window);
        }
        if let Some(burst) = vars.positive::<u32>("QUARRY_BURST")? {
            config.rate_limit.burst = burst;
        }

        if let Some(attempts) = vars.positive::<u32>("QUARRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        let base = vars.parsed::<u64>("QUARRY_BACKOFF_BASE_MS")?;
        let max = vars.parsed::<u64>("QUARRY_BACKOFF_MAX_MS")?;
        if base.is_some() || max.is_some() {
            config.retry.backoff = override_backoff(config.retry.backoff, base, max);
        }
        config.credential.retry = config.retry;

        if let Some(tolerance) = vars.parsed::<f64>("QUARRY_SPLIT_TOLERANCE")? {
            if !(tolerance > 0.0 && tolerance < 1.0) {
                return Err(ConfigError::InvalidEnv {
                    name: "QUARRY_SPLIT_TOLERANCE",
                    value: tolerance.to_string(),
                    reason: String::from("must be between 0 and 1"),
                });
            }
            config.repair.split_tolerance = tolerance;
        }

        if let Some(secs) = vars.parsed::<u64>("QUARRY_CACHE_TTL_INTRADAY_SECS")? {
            config.cache.intraday_chart = Duration::from_secs(secs);
        }
        if let Some(secs) = vars.parsed::<u64>("QUARRY_CACHE_TTL_DAILY_SECS")? {
            config.cache.daily_chart = Duration::from_secs(secs);
        }
        if let Some(secs) = vars.parsed::<u64>("QUARRY_CACHE_TTL_METADATA_SECS")? {
            config.cache.metadata = Duration::from_secs(secs);
        }

        if let Some(home) = lookup("QUARRY_HOME").filter(|home| !home.trim().is_empty()) {
            config.quarry_home = Some(PathBuf::from(home));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations no single variable check catches.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let repair = &self.repair;
        if !(repair.split_tolerance > 0.0 && repair.split_tolerance < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "split tolerance {} must be between 0 and 1",
                repair.split_tolerance
            )));
        }
        if !(repair.jump_ratio > 1.0) || !(repair.outlier_ratio > 1.0) {
            return Err(ConfigError::Invalid(String::from(
                "jump and outlier ratios must be greater than 1",
            )));
        }
        if let Backoff::Exponential { base, max, .. } = self.retry.backoff {
            if base > max {
                return Err(ConfigError::Invalid(format!(
                    "backoff base {base:?} exceeds cap {max:?}"
                )));
            }
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("user agent cannot be empty")));
        }
        Ok(())
    }

    /// Durable cache location, when one is configured.
    pub fn warehouse(&self) -> Option<WarehouseConfig> {
        self.quarry_home.as_ref().map(WarehouseConfig::at_home)
    }
}

fn override_backoff(current: Backoff, base_ms: Option<u64>, max_ms: Option<u64>) -> Backoff {
    let (default_base, factor, default_max, jitter) = match current {
        Backoff::Exponential {
            base,
            factor,
            max,
            jitter,
        } => (base, factor, max, jitter),
        Backoff::Fixed { delay } => (delay, 2.0, delay, false),
    };
    Backoff::Exponential {
        base: base_ms.map_or(default_base, Duration::from_millis),
        factor,
        max: max_ms.map_or(default_max, Duration::from_millis),
        jitter,
    }
}

struct EnvVars<'a, F> {
    lookup: &'a F,
}

impl<F> EnvVars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(name) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|error| ConfigError::InvalidEnv {
                name,
                value: raw.clone(),
                reason: error.to_string(),
            })
    }

    fn positive<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: std::fmt::Display,
    {
        match self.parsed::<T>(name)? {
            Some(value) if value == T::default() => Err(ConfigError::InvalidEnv {
                name,
                value: String::from("0"),
                reason: String::from("must be greater than zero"),
            }),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(from_pairs(&[]).expect("config"), PipelineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("QUARRY_RATE_LIMIT", "30"),
            ("QUARRY_RATE_WINDOW_MS", "1000"),
            ("QUARRY_BURST", "2"),
            ("QUARRY_MAX_ATTEMPTS", "5"),
            ("QUARRY_BACKOFF_BASE_MS", "50"),
            ("QUARRY_SPLIT_TOLERANCE", "0.05"),
            ("QUARRY_CACHE_TTL_DAILY_SECS", "0"),
            ("QUARRY_HOME", "/tmp/quarry"),
        ])
        .expect("config");

        assert_eq!(config.rate_limit.quota_limit, 30);
        assert_eq!(config.rate_limit.quota_window, Duration::from_secs(1));
        assert_eq!(config.rate_limit.burst, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.credential.retry.max_attempts, 5);
        assert!(matches!(
            config.retry.backoff,
            Backoff::Exponential { base, .. } if base == Duration::from_millis(50)
        ));
        assert_eq!(config.repair.split_tolerance, 0.05);
        assert_eq!(config.cache.daily_chart, Duration::ZERO);
        assert_eq!(
            config.warehouse().map(|warehouse| warehouse.quarry_home),
            Some(PathBuf::from("/tmp/quarry"))
        );
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let error = from_pairs(&[("QUARRY_BURST", "lots")]).expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidEnv { name: "QUARRY_BURST", .. }));

        let error = from_pairs(&[("QUARRY_RATE_LIMIT", "0")]).expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidEnv { name: "QUARRY_RATE_LIMIT", .. }));

        let error = from_pairs(&[("QUARRY_SPLIT_TOLERANCE", "1.5")]).expect_err("must fail");
        assert!(matches!(
            error,
            ConfigError::InvalidEnv { name: "QUARRY_SPLIT_TOLERANCE", .. }
        ));
    }

    #[test]
    fn backoff_base_above_cap_is_rejected() {
        let error = from_pairs(&[("QUARRY_BACKOFF_BASE_MS", "5000"), ("QUARRY_BACKOFF_MAX_MS", "100")])
            .expect_err("must fail");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }
}
