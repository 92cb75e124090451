use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::AirQuality];
const DEFAULT_KEY_ENV: &str = "AIRVISUAL_KEY";

/// IQAir "nearest city" air quality (US AQI, PM2.5 as secondary).
///
/// The API key is read from the environment variable named by the provider
/// param `key_env` (default `AIRVISUAL_KEY`) at fetch time.
#[derive(Clone)]
pub struct AirVisualAdapter {
    fetcher: HttpFetcher,
}

impl AirVisualAdapter {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.airvisual.com/v2/nearest_city";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Airvisual, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher: fetcher.with_secret_params(&["key"]),
        }
    }
}

impl SignalSource for AirVisualAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Airvisual
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let provider = ProviderId::Airvisual;
            let Some(location) = request.location else {
                return Err(ProviderError::misconfigured(
                    provider,
                    "airvisual needs a location",
                ));
            };
            let key_env = request.param("key_env").unwrap_or(DEFAULT_KEY_ENV);
            let key = std::env::var(key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    ProviderError::misconfigured(provider, format!("{key_env} is not set"))
                })?;

            let http_request = HttpRequest::get(request.endpoint_or(Self::DEFAULT_ENDPOINT))
                .with_query("lat", location.lat().to_string())
                .with_query("lon", location.lon().to_string())
                .with_query("key", key);
            let payload: NearestCityPayload = self
                .fetcher
                .get_json(http_request, request.timeout, cancel)
                .await?;
            normalize(payload)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

#[derive(Debug, Deserialize)]
struct NearestCityPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<CityData>,
}

#[derive(Debug, Deserialize)]
struct CityData {
    #[serde(default)]
    location: Option<CityLocation>,
    #[serde(default)]
    current: Option<CurrentConditions>,
}

/// GeoJSON order: `[lon, lat]`.
#[derive(Debug, Deserialize)]
struct CityLocation {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    #[serde(default)]
    pollution: Option<Pollution>,
}

#[derive(Debug, Deserialize)]
struct Pollution {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    aqius: Option<f64>,
    #[serde(default)]
    p2: Option<Concentration>,
}

/// The free tier sends a bare number, paid tiers an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Concentration {
    Plain(f64),
    Detailed {
        #[serde(default, deserialize_with = "lenient_f64")]
        conc: Option<f64>,
    },
}

impl Concentration {
    fn value(&self) -> Option<f64> {
        match self {
            Self::Plain(value) => Some(*value).filter(|value| value.is_finite()),
            Self::Detailed { conc } => *conc,
        }
    }
}

fn normalize(payload: NearestCityPayload) -> Result<RawPayload, ProviderError> {
    let provider = ProviderId::Airvisual;
    if let Some(status) = payload.status.as_deref() {
        if status != "success" {
            return Err(ProviderError::malformed(
                provider,
                format!("airvisual reported status '{status}'"),
            ));
        }
    }

    let Some(data) = payload.data else {
        return Ok(RawPayload::default());
    };
    let Some(pollution) = data.current.and_then(|current| current.pollution) else {
        return Ok(RawPayload::default());
    };
    let Some(aqi) = pollution.aqius else {
        return Ok(RawPayload::default());
    };

    let mut point = RawPoint::new(aqi).with_secondary(pollution.p2.as_ref().and_then(Concentration::value));
    if let Some(observed_at) = pollution
        .ts
        .as_deref()
        .and_then(|ts| UtcDateTime::parse_naive_utc(ts).ok())
    {
        point = point.observed_at(observed_at);
    }
    if let Some(location) = data.location.and_then(|location| match location.coordinates[..] {
        [lon, lat, ..] => GeoPoint::new(lat, lon).ok(),
        _ => None,
    }) {
        point = point.at(location);
    }
    Ok(RawPayload::single(point))
}
