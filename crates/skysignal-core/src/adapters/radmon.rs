use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{decode_entries, lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{FetchFuture, FetchRequest, RawPayload, RawPoint, SignalSource};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime};

/// Rough CPM to µSv/h factor for the common SBM-20/M4011 tubes.
pub const CPM_TO_USV_H: f64 = 0.0065;

const KINDS: &[SignalKind] = &[SignalKind::Radiation];

/// Community Geiger counter network.
#[derive(Clone)]
pub struct RadmonAdapter {
    fetcher: HttpFetcher,
}

impl Default for RadmonAdapter {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::default()))
    }
}

impl RadmonAdapter {
    pub const DEFAULT_ENDPOINT: &'static str = "https://radmon.org/radmon.php?format=json";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Radmon, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl SignalSource for RadmonAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Radmon
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let payload: RadmonPayload = self
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
struct RadmonPayload {
    #[serde(default)]
    users: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RadmonStation {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    /// Unix seconds of the station's last report.
    #[serde(default, deserialize_with = "lenient_f64")]
    last_seen: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cpm_avg: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cpm: Option<f64>,
}

impl RadmonStation {
    fn into_point(self) -> Option<RawPoint> {
        let location = GeoPoint::new(self.lat?, self.lon?).ok()?;
        // Stations without a report time are treated as offline.
        let observed_at = UtcDateTime::from_unix_seconds(self.last_seen?).ok()?;
        // The averaged count is steadier than the instantaneous one.
        let cpm = self.cpm_avg.or(self.cpm)?;
        Some(
            RawPoint::new(cpm * CPM_TO_USV_H)
                .with_secondary(Some(cpm))
                .observed_at(observed_at)
                .at(location),
        )
    }
}

fn normalize(payload: RadmonPayload) -> RawPayload {
    RawPayload::new(
        decode_entries::<RadmonStation>(ProviderId::Radmon, payload.users)
            .into_iter()
            .filter_map(RadmonStation::into_point)
            .collect(),
    )
}
