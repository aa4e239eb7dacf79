use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an alphanumeric character or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1m, 2m, 5m, 15m, 30m, 60m, 90m, 1h, 1d, 5d, 1wk, 1mo, 3mo")]
    InvalidInterval { value: String },
    #[error("invalid period '{value}', expected one of 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max")]
    InvalidPeriod { value: String },
    #[error("date range start {start} must be before end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("timestamp must be RFC3339 with an explicit offset: '{value}'")]
    InvalidTimestamp { value: String },
    #[error("utc offset of {seconds}s is out of range")]
    InvalidUtcOffset { seconds: i64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,

    #[error("split ratio terms must be positive integers: {numerator}:{denominator}")]
    InvalidSplitRatio { numerator: u32, denominator: u32 },
}

/// Errors raised while resolving pipeline configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Classification of pipeline failures surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Credential acquisition failed permanently, or a fresh credential was
    /// rejected again.
    AuthUnavailable,
    /// The attempt budget ran out while the provider kept throttling.
    RateLimited,
    /// The attempt budget ran out on transport or server failures.
    NetworkError,
    /// A success status carried a body that could not be parsed.
    MalformedResponse,
    /// The provider rejected the request itself (unknown symbol, bad range).
    InvalidRequest,
    /// The caller cancelled the operation.
    Cancelled,
}

impl FetchErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::AuthUnavailable => "fetch.auth_unavailable",
            Self::RateLimited => "fetch.rate_limited",
            Self::NetworkError => "fetch.network_error",
            Self::MalformedResponse => "fetch.malformed_response",
            Self::InvalidRequest => "fetch.invalid_request",
            Self::Cancelled => "fetch.cancelled",
        }
    }
}

/// Structured pipeline error carrying the number of HTTP attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    attempts: u32,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    pub fn auth_unavailable(message: impl Into<String>, attempts: u32) -> Self {
        Self::new(FetchErrorKind::AuthUnavailable, message, attempts)
    }

    pub fn rate_limited(message: impl Into<String>, attempts: u32) -> Self {
        Self::new(FetchErrorKind::RateLimited, message, attempts)
    }

    pub fn network(message: impl Into<String>, attempts: u32) -> Self {
        Self::new(FetchErrorKind::NetworkError, message, attempts)
    }

    pub fn malformed(message: impl Into<String>, attempts: u32) -> Self {
        Self::new(FetchErrorKind::MalformedResponse, message, attempts)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidRequest, message, 0)
    }

    pub fn cancelled(attempts: u32) -> Self {
        Self::new(FetchErrorKind::Cancelled, "operation cancelled by caller", attempts)
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// True when the error reports a spent retry budget.
    pub const fn is_exhausted(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::RateLimited | FetchErrorKind::NetworkError
        )
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, attempts={})",
            self.message,
            self.code(),
            self.attempts
        )
    }
}

impl std::error::Error for FetchError {}

impl From<ValidationError> for FetchError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}
