use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::ValidationError;

/// Provider-side relative range (`range=` on the chart endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const ALL: [Self; 11] = [
        Self::OneDay,
        Self::FiveDays,
        Self::OneMonth,
        Self::ThreeMonths,
        Self::SixMonths,
        Self::OneYear,
        Self::TwoYears,
        Self::FiveYears,
        Self::TenYears,
        Self::YearToDate,
        Self::Max,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::TenYears => "10y",
            Self::YearToDate => "ytd",
            Self::Max => "max",
        }
    }

    /// Upper bound on how far back the period reaches; `None` for `max`.
    pub fn approximate_span(self) -> Option<Duration> {
        match self {
            Self::OneDay => Some(Duration::days(1)),
            Self::FiveDays => Some(Duration::days(5)),
            Self::OneMonth => Some(Duration::days(31)),
            Self::ThreeMonths => Some(Duration::days(92)),
            Self::SixMonths => Some(Duration::days(183)),
            Self::OneYear | Self::YearToDate => Some(Duration::days(366)),
            Self::TwoYears => Some(Duration::days(731)),
            Self::FiveYears => Some(Duration::days(1_827)),
            Self::TenYears => Some(Duration::days(3_653)),
            Self::Max => None,
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|period| period.as_str() == normalized)
            .ok_or(ValidationError::InvalidPeriod { value: normalized })
    }
}

/// Time span of a history request: a relative period or explicit dates.
///
/// `Between` is half-open: bars on `start` are included, bars on `end` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistorySpan {
    Period(Period),
    Between { start: Date, end: Date },
}

impl HistorySpan {
    pub fn between(start: Date, end: Date) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self::Between { start, end })
    }

    /// Whether a bar dated `date` (exchange-local) belongs to the span.
    /// Relative periods are bounded by the provider and accept every date.
    pub fn contains(self, date: Date) -> bool {
        match self {
            Self::Period(_) => true,
            Self::Between { start, end } => start <= date && date < end,
        }
    }

    /// How far before `today` the span starts, if bounded.
    pub fn lookback_from(self, today: Date) -> Option<Duration> {
        match self {
            Self::Period(period) => period.approximate_span(),
            Self::Between { start, .. } => Some(today - start),
        }
    }
}

impl Default for HistorySpan {
    fn default() -> Self {
        Self::Period(Period::OneMonth)
    }
}
