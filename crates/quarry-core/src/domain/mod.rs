//! # Domain Models
//!
//! Validated value types shared by the fetch pipeline and the repair engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Normalized ticker |
//! | [`Interval`] | Bar granularity (1m .. 3mo) |
//! | [`Period`] | Relative range (1d .. max) |
//! | [`HistorySpan`] | Period or explicit half-open date range |
//! | [`ExchangeDateTime`] | Offset-aware timestamp at the listing exchange |
//! | [`PriceBar`] | OHLCV bar with adjusted close |
//! | [`CorporateAction`] | Declared split or dividend |
//!
//! ```rust
//! use quarry_core::{ExchangeDateTime, PriceBar, ValidationError};
//!
//! let ts = ExchangeDateTime::parse("2024-01-02T09:30:00-05:00").unwrap();
//! let bar = PriceBar::new(ts, 100.0, 105.0, 95.0, 102.0, 102.0, 1_000);
//! assert!(bar.is_ok());
//!
//! let invalid = PriceBar::new(ts, 100.0, 95.0, 105.0, 102.0, 102.0, 1_000);
//! assert!(matches!(invalid, Err(ValidationError::InvalidBarRange)));
//! ```

mod action;
mod bar;
mod interval;
mod period;
mod symbol;
mod timestamp;

pub use action::{CorporateAction, SplitRatio};
pub use bar::PriceBar;
pub(crate) use bar::validate_positive;
pub use interval::Interval;
pub use period::{HistorySpan, Period};
pub use symbol::Symbol;
pub use timestamp::ExchangeDateTime;
