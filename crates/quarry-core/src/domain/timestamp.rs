use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Bar timestamp localized to the listing exchange's UTC offset.
///
/// Equality and ordering compare instants, so two values with different
/// offsets describing the same moment are equal. [`date`](Self::date) is the
/// exchange-local calendar date used for corporate-action boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeDateTime(OffsetDateTime);

impl ExchangeDateTime {
    /// Build from unix seconds and the exchange offset reported by the provider.
    pub fn from_unix(seconds: i64, gmtoffset: i64) -> Result<Self, ValidationError> {
        let offset = i32::try_from(gmtoffset)
            .ok()
            .and_then(|offset| UtcOffset::from_whole_seconds(offset).ok())
            .ok_or(ValidationError::InvalidUtcOffset { seconds: gmtoffset })?;
        let instant = OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| {
            ValidationError::InvalidTimestamp {
                value: seconds.to_string(),
            }
        })?;
        Ok(Self(instant.to_offset(offset)))
    }

    /// Midnight at the exchange on `date`. Mostly useful for building daily bars.
    pub fn at_midnight(date: Date, offset: UtcOffset) -> Self {
        Self(date.midnight().assume_offset(offset))
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        OffsetDateTime::parse(input, &Rfc3339)
            .map(Self)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    pub fn date(self) -> Date {
        self.0.date()
    }

    pub fn offset(self) -> UtcOffset {
        self.0.offset()
    }

    pub fn unix_timestamp(self) -> i64 {
        self.0.unix_timestamp()
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }
}

impl From<OffsetDateTime> for ExchangeDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

impl Display for ExchangeDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let formatted = self.0.format(&Rfc3339).map_err(|_| std::fmt::Error)?;
        f.write_str(&formatted)
    }
}

impl Serialize for ExchangeDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExchangeDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn localizes_unix_seconds_to_exchange_offset() {
        // 2024-01-02T04:30:00Z is still Jan 1 in New York.
        let ts = ExchangeDateTime::from_unix(1_704_169_800, -18_000).expect("timestamp");
        assert_eq!(ts.date(), date!(2024 - 01 - 01));
        assert_eq!(ts.to_string(), "2024-01-01T23:30:00-05:00");
    }

    #[test]
    fn rejects_out_of_range_offsets() {
        let err = ExchangeDateTime::from_unix(0, 200_000).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidUtcOffset { .. }));
    }

    #[test]
    fn serializes_as_rfc3339_with_offset() {
        let ts = ExchangeDateTime::parse("2024-03-15T09:30:00-04:00").expect("parse");
        let json = serde_json::to_string(&ts).expect("serialize");
        assert_eq!(json, "\"2024-03-15T09:30:00-04:00\"");
        let back: ExchangeDateTime = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ts);
    }
}
