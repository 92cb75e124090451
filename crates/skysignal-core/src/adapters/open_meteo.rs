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

const POLLEN_FIELDS: [&str; 3] = ["pollen_level_tree", "pollen_level_grass", "pollen_level_weed"];

/// Open-Meteo grid models: air quality, pollen levels and sea surface temperature.
///
/// Every product needs a location; the reading is placed at the model grid
/// cell Open-Meteo snapped the query to.
#[derive(Clone)]
pub struct OpenMeteoAdapter {
    provider: ProviderId,
    kinds: &'static [SignalKind],
    fetcher: HttpFetcher,
}

impl OpenMeteoAdapter {
    pub const AIR_QUALITY_ENDPOINT: &'static str =
        "https://air-quality-api.open-meteo.com/v1/air-quality";
    pub const MARINE_ENDPOINT: &'static str = "https://marine-api.open-meteo.com/v1/marine";

    pub fn air(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::OpenMeteoAir, http_client))
    }

    pub fn pollen(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::OpenMeteoPollen, http_client))
    }

    pub fn marine(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::OpenMeteoMarine, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        let provider = fetcher.provider();
        let kinds: &'static [SignalKind] = match provider {
            ProviderId::OpenMeteoPollen => &[SignalKind::Pollen],
            ProviderId::OpenMeteoMarine => &[SignalKind::SeaTemperature],
            _ => &[SignalKind::AirQuality],
        };
        Self {
            provider,
            kinds,
            fetcher,
        }
    }

    fn build_request(&self, request: &FetchRequest, location: GeoPoint) -> HttpRequest {
        let base = match self.provider {
            ProviderId::OpenMeteoMarine => request.endpoint_or(Self::MARINE_ENDPOINT),
            _ => request.endpoint_or(Self::AIR_QUALITY_ENDPOINT),
        };
        let http_request = HttpRequest::get(base)
            .with_query("latitude", location.lat().to_string())
            .with_query("longitude", location.lon().to_string())
            .with_query("timezone", "UTC");

        match self.provider {
            ProviderId::OpenMeteoPollen => http_request
                .with_query("hourly", POLLEN_FIELDS.join(","))
                .with_query("forecast_days", "1"),
            ProviderId::OpenMeteoMarine => {
                http_request.with_query("current", "sea_surface_temperature")
            }
            _ => http_request.with_query("current", "us_aqi,pm2_5"),
        }
    }
}

impl SignalSource for OpenMeteoAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn kinds(&self) -> &[SignalKind] {
        self.kinds
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let Some(location) = request.location else {
                return Err(ProviderError::misconfigured(
                    self.provider,
                    format!("{} needs a location", self.provider),
                ));
            };
            let payload: GridPayload = self
                .fetcher
                .get_json(self.build_request(request, location), request.timeout, cancel)
                .await?;
            Ok(normalize(self.provider, payload))
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

#[derive(Debug, Deserialize)]
struct GridPayload {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default)]
    current: Option<CurrentBlock>,
    #[serde(default)]
    hourly: Option<HourlyPollen>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    #[serde(default)]
    time: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    us_aqi: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pm2_5: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    sea_surface_temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyPollen {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    pollen_level_tree: Vec<Option<f64>>,
    #[serde(default)]
    pollen_level_grass: Vec<Option<f64>>,
    #[serde(default)]
    pollen_level_weed: Vec<Option<f64>>,
}

impl HourlyPollen {
    /// Highest of the three levels in the first hour that reports any.
    fn first_reported_hour(&self) -> Option<(usize, f64)> {
        (0..self.time.len()).find_map(|hour| {
            [
                &self.pollen_level_tree,
                &self.pollen_level_grass,
                &self.pollen_level_weed,
            ]
            .into_iter()
            .filter_map(|series| series.get(hour).copied().flatten())
            .filter(|level| level.is_finite())
            .reduce(f64::max)
            .map(|level| (hour, level))
        })
    }
}

fn normalize(provider: ProviderId, payload: GridPayload) -> RawPayload {
    let grid = payload
        .latitude
        .zip(payload.longitude)
        .and_then(|(lat, lon)| GeoPoint::new(lat, lon).ok());

    let reading = match provider {
        ProviderId::OpenMeteoPollen => payload.hourly.as_ref().and_then(|hourly| {
            let (hour, level) = hourly.first_reported_hour()?;
            Some((level, None, hourly.time.get(hour).cloned()))
        }),
        ProviderId::OpenMeteoMarine => payload.current.and_then(|current| {
            Some((current.sea_surface_temperature?, None, current.time))
        }),
        _ => payload
            .current
            .and_then(|current| Some((current.us_aqi?, current.pm2_5, current.time))),
    };

    let Some((value, secondary, time)) = reading else {
        return RawPayload::default();
    };

    let mut point = RawPoint::new(value).with_secondary(secondary);
    if let Some(observed_at) = time
        .as_deref()
        .and_then(|time| UtcDateTime::parse_naive_utc(time).ok())
    {
        point = point.observed_at(observed_at);
    }
    if let Some(grid) = grid {
        point = point.at(grid);
    }
    RawPayload::single(point)
}
