use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SignalKind, ValidationError};

/// Canonical identifiers of upstream signal providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Radmon,
    Eurdep,
    Safecast,
    Gci,
    Ucsd,
    ExchangerateHost,
    Frankfurter,
    OpenErapi,
    Ecb,
    Cbr,
    Airvisual,
    OpenMeteoAir,
    OpenMeteoPollen,
    OpenMeteoMarine,
    NoaaSwpc,
}

impl ProviderId {
    pub const ALL: [Self; 15] = [
        Self::Radmon,
        Self::Eurdep,
        Self::Safecast,
        Self::Gci,
        Self::Ucsd,
        Self::ExchangerateHost,
        Self::Frankfurter,
        Self::OpenErapi,
        Self::Ecb,
        Self::Cbr,
        Self::Airvisual,
        Self::OpenMeteoAir,
        Self::OpenMeteoPollen,
        Self::OpenMeteoMarine,
        Self::NoaaSwpc,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Radmon => "radmon",
            Self::Eurdep => "eurdep",
            Self::Safecast => "safecast",
            Self::Gci => "gci",
            Self::Ucsd => "ucsd",
            Self::ExchangerateHost => "exchangerate_host",
            Self::Frankfurter => "frankfurter",
            Self::OpenErapi => "open_erapi",
            Self::Ecb => "ecb",
            Self::Cbr => "cbr",
            Self::Airvisual => "airvisual",
            Self::OpenMeteoAir => "open_meteo_air",
            Self::OpenMeteoPollen => "open_meteo_pollen",
            Self::OpenMeteoMarine => "open_meteo_marine",
            Self::NoaaSwpc => "noaa_swpc",
        }
    }

    /// The signal kind this provider serves.
    pub const fn signal_kind(self) -> SignalKind {
        match self {
            Self::Radmon | Self::Eurdep | Self::Safecast => SignalKind::Radiation,
            Self::Gci | Self::Ucsd => SignalKind::Schumann,
            Self::ExchangerateHost
            | Self::Frankfurter
            | Self::OpenErapi
            | Self::Ecb
            | Self::Cbr => SignalKind::FxRate,
            Self::Airvisual | Self::OpenMeteoAir => SignalKind::AirQuality,
            Self::OpenMeteoPollen => SignalKind::Pollen,
            Self::OpenMeteoMarine => SignalKind::SeaTemperature,
            Self::NoaaSwpc => SignalKind::KIndex,
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidProvider {
                value: value.trim().to_owned(),
            })
    }
}
