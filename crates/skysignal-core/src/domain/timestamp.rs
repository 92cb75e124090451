use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ValidationError;

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        Self::from_offset_datetime(parsed).map_err(|_| ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        })
    }

    /// Parse the zone-less forms upstream APIs emit and treat them as UTC:
    /// `YYYY-MM-DDTHH:MM`, `YYYY-MM-DD HH:MM:SS(.fff)` and `YYYY-MM-DD`.
    pub fn parse_naive_utc(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let invalid = || ValidationError::InvalidTimestamp {
            value: input.to_owned(),
        };

        if let Ok(parsed) = Self::parse(trimmed) {
            return Ok(parsed);
        }

        let without_fraction = trimmed.split('.').next().unwrap_or(trimmed);
        let with_seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let iso_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        let iso_minutes = format_description!("[year]-[month]-[day]T[hour]:[minute]");

        for description in [with_seconds, iso_seconds, iso_minutes] {
            if let Ok(value) = PrimitiveDateTime::parse(without_fraction, description) {
                return Ok(Self(value.assume_utc()));
            }
        }

        let date_only = format_description!("[year]-[month]-[day]");
        Date::parse(trimmed, date_only)
            .map(|date| Self(date.midnight().assume_utc()))
            .map_err(|_| invalid())
    }

    pub fn from_unix_seconds(seconds: f64) -> Result<Self, ValidationError> {
        if !seconds.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "timestamp" });
        }
        let nanos = (seconds * 1_000_000_000.0).round() as i128;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map(Self)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: seconds.to_string(),
            })
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if value.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: value
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| String::from("<unformattable>")),
            });
        }

        Ok(Self(value))
    }

    /// Converts any offset to UTC instead of rejecting it.
    pub fn from_any_offset(value: OffsetDateTime) -> Self {
        Self(value.to_offset(UtcOffset::UTC))
    }

    /// RFC 3339 with any offset, converted to UTC.
    pub fn parse_with_offset(input: &str) -> Result<Self, ValidationError> {
        OffsetDateTime::parse(input.trim(), &Rfc3339)
            .map(Self::from_any_offset)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    /// Elapsed time from `self` until `now`; zero when `self` lies in the future.
    pub fn age_at(self, now: Self) -> Duration {
        let delta = now.0 - self.0;
        if delta.is_negative() {
            return Duration::ZERO;
        }
        Duration::try_from(delta).unwrap_or(Duration::ZERO)
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let delta = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(self.0.checked_sub(delta).unwrap_or(self.0))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let delta = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(self.0.checked_add(delta).unwrap_or(self.0))
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl From<UtcDateTime> for OffsetDateTime {
    fn from(value: UtcDateTime) -> Self {
        value.0
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
