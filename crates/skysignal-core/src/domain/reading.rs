use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::trend::Trend;
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime, ValidationError};

/// Origin of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Provider(ProviderId),
    History,
}

impl Provenance {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Provider(provider) => provider.as_str(),
            Self::History => "history",
        }
    }

    pub const fn provider(self) -> Option<ProviderId> {
        match self {
            Self::Provider(provider) => Some(provider),
            Self::History => None,
        }
    }
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalized observation produced by a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub signal_kind: SignalKind,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<f64>,
    pub observed_at: UtcDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub provenance: Provenance,
    pub is_cached: bool,
    pub trend: Trend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl Reading {
    /// Reading fetched from a provider during the current resolution.
    pub fn live(
        signal_kind: SignalKind,
        provider: ProviderId,
        value: f64,
        observed_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_value(value)?;
        Ok(Self {
            signal_kind,
            value,
            secondary: None,
            observed_at,
            location: None,
            provenance: Provenance::Provider(provider),
            is_cached: false,
            trend: Trend::Unknown,
            distance_km: None,
        })
    }

    /// Reading served from stored data.
    ///
    /// `observed_at` must be strictly older than `resolved_at`.
    pub fn cached(
        signal_kind: SignalKind,
        provenance: Provenance,
        value: f64,
        observed_at: UtcDateTime,
        resolved_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_value(value)?;
        if observed_at >= resolved_at {
            return Err(ValidationError::CachedReadingNotInPast {
                observed_at: observed_at.format_rfc3339(),
                resolved_at: resolved_at.format_rfc3339(),
            });
        }
        Ok(Self {
            signal_kind,
            value,
            secondary: None,
            observed_at,
            location: None,
            provenance,
            is_cached: true,
            trend: Trend::Unknown,
            distance_km: None,
        })
    }

    pub fn with_secondary(mut self, secondary: Option<f64>) -> Result<Self, ValidationError> {
        if let Some(value) = secondary {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field: "secondary" });
            }
        }
        self.secondary = secondary;
        Ok(self)
    }

    pub fn with_location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }

    pub fn with_distance_km(mut self, distance_km: Option<f64>) -> Self {
        self.distance_km = distance_km.filter(|value| value.is_finite());
        self
    }

    pub fn with_trend(mut self, trend: Trend) -> Self {
        self.trend = trend;
        self
    }

    pub fn unit(&self) -> &'static str {
        self.signal_kind.unit()
    }
}

fn validate_value(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteValue { field: "value" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("timestamp")
    }

    #[test]
    fn cached_reading_must_predate_resolution() {
        let observed = ts("2024-05-01T10:00:00Z");

        let err = Reading::cached(
            SignalKind::Radiation,
            Provenance::History,
            0.11,
            observed,
            observed,
        )
        .expect_err("same instant is not in the past");
        assert!(matches!(err, ValidationError::CachedReadingNotInPast { .. }));

        let reading = Reading::cached(
            SignalKind::Radiation,
            Provenance::History,
            0.11,
            observed,
            ts("2024-05-01T12:00:00Z"),
        )
        .expect("older observation");
        assert!(reading.is_cached);
        assert_eq!(reading.trend, Trend::Unknown);
    }

    #[test]
    fn live_reading_rejects_non_finite_values() {
        let now = ts("2024-05-01T10:00:00Z");
        assert!(Reading::live(SignalKind::Schumann, ProviderId::Gci, f64::NAN, now).is_err());

        let reading = Reading::live(SignalKind::Schumann, ProviderId::Gci, 7.83, now)
            .expect("finite")
            .with_secondary(Some(f64::INFINITY));
        assert!(reading.is_err());
    }

    #[test]
    fn serializes_provenance_compactly() {
        let reading = Reading::live(
            SignalKind::KIndex,
            ProviderId::NoaaSwpc,
            3.33,
            ts("2024-05-10T21:00:00Z"),
        )
        .expect("reading");
        let json = serde_json::to_value(&reading).expect("serialize");

        assert_eq!(json["provenance"]["provider"], "noaa_swpc");
        assert_eq!(json["trend"], "unknown");
        assert!(json.get("location").is_none());
        assert_eq!(
            serde_json::to_value(Provenance::History).expect("serialize"),
            "history"
        );
    }
}
