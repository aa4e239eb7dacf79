use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::bar::validate_positive;
use crate::ValidationError;

/// Split ratio `numerator:denominator`; a 2:1 split doubles the share count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitRatio {
    pub numerator: NonZeroU32,
    pub denominator: NonZeroU32,
}

impl SplitRatio {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, ValidationError> {
        match (NonZeroU32::new(numerator), NonZeroU32::new(denominator)) {
            (Some(numerator), Some(denominator)) => Ok(Self {
                numerator,
                denominator,
            }),
            _ => Err(ValidationError::InvalidSplitRatio {
                numerator,
                denominator,
            }),
        }
    }

    /// Price divisor implied by the split: the pre-split close over the
    /// post-split close for an unchanged market value.
    pub fn factor(self) -> f64 {
        f64::from(self.numerator.get()) / f64::from(self.denominator.get())
    }
}

impl Display for SplitRatio {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

/// Provider-declared corporate action.
///
/// Existence is trusted; placement relative to the price series is not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorporateAction {
    Split { effective: Date, ratio: SplitRatio },
    Dividend { ex_date: Date, amount: f64 },
}

impl CorporateAction {
    pub fn split(effective: Date, numerator: u32, denominator: u32) -> Result<Self, ValidationError> {
        Ok(Self::Split {
            effective,
            ratio: SplitRatio::new(numerator, denominator)?,
        })
    }

    pub fn dividend(ex_date: Date, amount: f64) -> Result<Self, ValidationError> {
        validate_positive("amount", amount)?;
        Ok(Self::Dividend { ex_date, amount })
    }

    /// Effective date for splits, ex-date for dividends.
    pub fn date(&self) -> Date {
        match self {
            Self::Split { effective, .. } => *effective,
            Self::Dividend { ex_date, .. } => *ex_date,
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn split_factor_is_numerator_over_denominator() {
        let ratio = SplitRatio::new(3, 2).expect("ratio");
        assert_eq!(ratio.factor(), 1.5);
        assert_eq!(ratio.to_string(), "3:2");
    }

    #[test]
    fn rejects_zero_ratio_terms_and_bad_dividends() {
        assert!(matches!(
            SplitRatio::new(0, 1),
            Err(ValidationError::InvalidSplitRatio { .. })
        ));
        assert!(CorporateAction::dividend(date!(2024 - 02 - 09), -0.24).is_err());
        assert!(CorporateAction::dividend(date!(2024 - 02 - 09), f64::INFINITY).is_err());
    }

    #[test]
    fn serializes_with_type_tag() {
        let action = CorporateAction::split(date!(2024 - 06 - 10), 10, 1).expect("split");
        let json = serde_json::to_value(action).expect("serialize");
        assert_eq!(json["type"], "split");
        assert_eq!(json["ratio"]["numerator"], 10);
        assert_eq!(action.date(), date!(2024 - 06 - 10));
    }
}
