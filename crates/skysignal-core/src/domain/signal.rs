use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Kind of environmental or astronomical signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Radiation,
    Schumann,
    AirQuality,
    Pollen,
    SeaTemperature,
    KIndex,
    FxRate,
}

impl SignalKind {
    pub const ALL: [Self; 7] = [
        Self::Radiation,
        Self::Schumann,
        Self::AirQuality,
        Self::Pollen,
        Self::SeaTemperature,
        Self::KIndex,
        Self::FxRate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Radiation => "radiation",
            Self::Schumann => "schumann",
            Self::AirQuality => "air_quality",
            Self::Pollen => "pollen",
            Self::SeaTemperature => "sea_temperature",
            Self::KIndex => "k_index",
            Self::FxRate => "fx_rate",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::Radiation => "uSv/h",
            Self::Schumann => "Hz",
            Self::AirQuality => "AQI",
            Self::Pollen => "level",
            Self::SeaTemperature => "degC",
            Self::KIndex => "Kp",
            Self::FxRate => "rate",
        }
    }

    /// Whether readings of this kind depend on the requested location.
    pub const fn is_geo_scoped(self) -> bool {
        matches!(
            self,
            Self::Radiation | Self::AirQuality | Self::Pollen | Self::SeaTemperature
        )
    }
}

impl Display for SignalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "radiation" => Ok(Self::Radiation),
            "schumann" => Ok(Self::Schumann),
            "air_quality" | "air" => Ok(Self::AirQuality),
            "pollen" => Ok(Self::Pollen),
            "sea_temperature" | "sst" => Ok(Self::SeaTemperature),
            "k_index" | "kp" => Ok(Self::KIndex),
            "fx_rate" | "fx" => Ok(Self::FxRate),
            _ => Err(ValidationError::InvalidSignalKind {
                value: value.trim().to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        for kind in SignalKind::ALL {
            assert_eq!(kind.as_str().parse::<SignalKind>(), Ok(kind));
        }
        assert_eq!("air-quality".parse::<SignalKind>(), Ok(SignalKind::AirQuality));
        assert_eq!(" KP ".parse::<SignalKind>(), Ok(SignalKind::KIndex));
        assert!(matches!(
            "weather".parse::<SignalKind>(),
            Err(ValidationError::InvalidSignalKind { .. })
        ));
    }

    #[test]
    fn geo_scope_and_units() {
        assert!(SignalKind::Radiation.is_geo_scoped());
        assert!(!SignalKind::Schumann.is_geo_scoped());
        assert!(!SignalKind::FxRate.is_geo_scoped());
        assert_eq!(SignalKind::Schumann.unit(), "Hz");
        assert_eq!(
            serde_json::to_string(&SignalKind::SeaTemperature).expect("serialize"),
            "\"sea_temperature\""
        );
    }
}
