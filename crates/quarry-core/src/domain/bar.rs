use serde::{Deserialize, Serialize};

use crate::{ExchangeDateTime, ValidationError};

/// OHLCV bar for one interval, timestamped at the exchange.
///
/// Fields are public so provider decoders can carry raw values that the
/// repair engine later sanitizes. Use [`PriceBar::new`] when the bar must be
/// valid on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ts: ExchangeDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

impl PriceBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: ExchangeDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        adj_close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        let bar = Self {
            ts,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Check every price is finite and positive and that open/close sit
    /// inside the high/low range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_positive("open", self.open)?;
        validate_positive("high", self.high)?;
        validate_positive("low", self.low)?;
        validate_positive("close", self.close)?;
        validate_positive("adj_close", self.adj_close)?;

        if self.high < self.low {
            return Err(ValidationError::InvalidBarRange);
        }

        if self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(())
    }

    /// Multiply open, high, low and close by `factor`. Volume and adjusted
    /// close are left alone.
    pub fn scale_prices(&mut self, factor: f64) {
        self.open *= factor;
        self.high *= factor;
        self.low *= factor;
        self.close *= factor;
    }
}

pub(crate) fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> ExchangeDateTime {
        ExchangeDateTime::parse("2024-01-02T09:30:00-05:00").expect("timestamp")
    }

    #[test]
    fn rejects_invalid_bar_bounds() {
        let err = PriceBar::new(ts(), 10.0, 12.0, 9.0, 12.5, 12.5, 10).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidBarBounds));
    }

    #[test]
    fn rejects_non_positive_and_non_finite_prices() {
        let err = PriceBar::new(ts(), 0.0, 12.0, 9.0, 10.0, 10.0, 10).expect_err("must fail");
        assert!(matches!(err, ValidationError::NonPositiveValue { field: "open" }));

        let err =
            PriceBar::new(ts(), 10.0, f64::NAN, 9.0, 10.0, 10.0, 10).expect_err("must fail");
        assert!(matches!(err, ValidationError::NonFiniteValue { field: "high" }));
    }

    #[test]
    fn scaling_leaves_volume_and_adjusted_close() {
        let mut bar = PriceBar::new(ts(), 10.0, 12.0, 9.0, 11.0, 5.5, 400).expect("bar");
        bar.scale_prices(0.5);
        assert_eq!(bar.close, 5.5);
        assert_eq!(bar.high, 6.0);
        assert_eq!(bar.adj_close, 5.5);
        assert_eq!(bar.volume, 400);
    }
}
