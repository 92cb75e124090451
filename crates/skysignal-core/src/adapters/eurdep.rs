use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{decode_entries, lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{FetchFuture, FetchRequest, RawPayload, RawPoint, SignalSource};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::Radiation];

/// European radiological data exchange platform (gamma dose rate, µSv/h).
#[derive(Clone)]
pub struct EurdepAdapter {
    fetcher: HttpFetcher,
}

impl Default for EurdepAdapter {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::default()))
    }
}

impl EurdepAdapter {
    pub const DEFAULT_ENDPOINT: &'static str = "https://eurdep.jrc.ec.europa.eu/eurdep/json/";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Eurdep, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl SignalSource for EurdepAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Eurdep
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let payload: EurdepPayload = self
                .fetcher
                .get_json(
                    HttpRequest::get(request.endpoint_or(Self::DEFAULT_ENDPOINT)),
                    request.timeout,
                    cancel,
                )
                .await?;
            Ok(normalize(payload))
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

#[derive(Debug, Deserialize)]
struct EurdepPayload {
    #[serde(default)]
    measurements: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EurdepMeasurement {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    utctime: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    value: Option<f64>,
}

fn normalize(payload: EurdepPayload) -> RawPayload {
    let points = decode_entries::<EurdepMeasurement>(ProviderId::Eurdep, payload.measurements)
        .into_iter()
        .filter_map(|measurement| {
            let location = GeoPoint::new(measurement.lat?, measurement.lon?).ok()?;
            let observed_at = UtcDateTime::from_unix_seconds(measurement.utctime?).ok()?;
            Some(
                RawPoint::new(measurement.value?)
                    .observed_at(observed_at)
                    .at(location),
            )
        })
        .collect();
    RawPayload::new(points)
}
