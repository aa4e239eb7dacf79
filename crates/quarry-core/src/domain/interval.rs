use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::ValidationError;

/// Bar granularity accepted by the chart endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "60m")]
    SixtyMinutes,
    #[serde(rename = "90m")]
    NinetyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
}

impl Interval {
    pub const ALL: [Self; 13] = [
        Self::OneMinute,
        Self::TwoMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::SixtyMinutes,
        Self::NinetyMinutes,
        Self::OneHour,
        Self::OneDay,
        Self::FiveDays,
        Self::OneWeek,
        Self::OneMonth,
        Self::ThreeMonths,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::TwoMinutes => "2m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::SixtyMinutes => "60m",
            Self::NinetyMinutes => "90m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneWeek => "1wk",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
        }
    }

    pub const fn is_intraday(self) -> bool {
        matches!(
            self,
            Self::OneMinute
                | Self::TwoMinutes
                | Self::FiveMinutes
                | Self::FifteenMinutes
                | Self::ThirtyMinutes
                | Self::SixtyMinutes
                | Self::NinetyMinutes
                | Self::OneHour
        )
    }

    /// How far back the provider serves this granularity, if limited.
    pub fn max_lookback(self) -> Option<Duration> {
        match self {
            Self::OneMinute => Some(Duration::days(30)),
            Self::TwoMinutes
            | Self::FiveMinutes
            | Self::FifteenMinutes
            | Self::ThirtyMinutes
            | Self::NinetyMinutes => Some(Duration::days(60)),
            Self::SixtyMinutes | Self::OneHour => Some(Duration::days(730)),
            Self::OneDay | Self::FiveDays | Self::OneWeek | Self::OneMonth | Self::ThreeMonths => {
                None
            }
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == normalized)
            .ok_or(ValidationError::InvalidInterval { value: normalized })
    }
}
