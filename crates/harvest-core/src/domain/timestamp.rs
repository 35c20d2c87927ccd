use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// UTC instant, serialized as RFC3339 (`2024-01-01T00:00:00Z`).
///
/// Stamps artifacts (`collected_at`), transcription jobs and item creation
/// times converted from platform epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Accepts RFC3339 input with a `Z` or `+00:00` offset only.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        match OffsetDateTime::parse(input, &Rfc3339) {
            Ok(value) if value.offset() == UtcOffset::UTC => Ok(Self(value)),
            _ => Err(ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }),
        }
    }

    /// Converts fractional unix seconds, as returned by the Reddit API.
    pub fn from_unix_seconds(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1_000_000_000.0).round() as i64;
        OffsetDateTime::from_unix_timestamp(whole as i64)
            .ok()
            .map(|value| Self(value + time::Duration::nanoseconds(nanos)))
    }

    pub fn unix_seconds(self) -> i64 {
        self.0.unix_timestamp()
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let parsed = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("utc");

        let json = serde_json::to_string(&parsed).expect("serializes");
        let back: UtcDateTime = serde_json::from_str(&json).expect("deserializes");

        assert_eq!(json, "\"2024-01-01T00:00:00Z\"");
        assert_eq!(back, parsed);
    }

    #[test]
    fn rejects_offsets_other_than_utc() {
        let error = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect_err("not utc");

        assert!(matches!(error, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn converts_reddit_epoch_seconds() {
        let whole = UtcDateTime::from_unix_seconds(1_704_067_200.0).expect("finite");
        let fractional = UtcDateTime::from_unix_seconds(1_704_067_200.5).expect("finite");

        assert_eq!(whole.format_rfc3339(), "2024-01-01T00:00:00Z");
        assert_eq!(fractional.unix_seconds(), 1_704_067_200);
        assert!(fractional > whole);
        assert!(UtcDateTime::from_unix_seconds(f64::NAN).is_none());
    }
}
