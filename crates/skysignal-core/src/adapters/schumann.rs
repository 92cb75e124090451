use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{ProviderId, SignalKind};

const KINDS: &[SignalKind] = &[SignalKind::Schumann];

/// Schumann resonance fundamental (Hz) with its amplitude as secondary value.
///
/// The two upstreams share a field vocabulary but not a layout: GCI answers
/// with a flat object, UCSD nests it under `data.sr1`.
#[derive(Clone)]
pub struct SchumannAdapter {
    provider: ProviderId,
    fetcher: HttpFetcher,
}

impl SchumannAdapter {
    pub const GCI_ENDPOINT: &'static str = "https://api.glcoherence.org/v1/earth";
    pub const UCSD_ENDPOINT: &'static str = "https://gci-api.ucsd.edu/data/latest";

    pub fn gci(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Gci, http_client))
    }

    pub fn ucsd(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Ucsd, http_client))
    }

    /// The fetcher's provider decides the payload layout.
    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self {
            provider: fetcher.provider(),
            fetcher,
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self.provider {
            ProviderId::Ucsd => Self::UCSD_ENDPOINT,
            _ => Self::GCI_ENDPOINT,
        }
    }
}

impl SignalSource for SchumannAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let http_request = HttpRequest::get(request.endpoint_or(self.default_endpoint()));
            let resonance = match self.provider {
                ProviderId::Ucsd => {
                    let payload: UcsdPayload = self
                        .fetcher
                        .get_json(http_request, request.timeout, cancel)
                        .await?;
                    payload.data.sr1
                }
                _ => {
                    self.fetcher
                        .get_json::<Resonance>(http_request, request.timeout, cancel)
                        .await?
                }
            };
            normalize(self.provider, resonance)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

/// The numbered fields take precedence over the plain ones.
#[derive(Debug, Deserialize)]
struct Resonance {
    #[serde(default, deserialize_with = "lenient_f64")]
    frequency_1: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    frequency: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    amplitude_1: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    amplitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UcsdPayload {
    data: UcsdData,
}

#[derive(Debug, Deserialize)]
struct UcsdData {
    sr1: Resonance,
}

fn normalize(provider: ProviderId, resonance: Resonance) -> Result<RawPayload, ProviderError> {
    let frequency = resonance
        .frequency_1
        .or(resonance.frequency)
        .ok_or_else(|| ProviderError::malformed(provider, format!("{provider} payload has no frequency")))?;
    let amplitude = resonance.amplitude_1.or(resonance.amplitude);
    Ok(RawPayload::single(
        RawPoint::new(frequency).with_secondary(amplitude),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::StaticHttpClient;

    #[tokio::test]
    async fn gci_prefers_numbered_fields() {
        let client = Arc::new(StaticHttpClient::new().with_json(
            SchumannAdapter::GCI_ENDPOINT,
            r#"{"frequency_1": 7.91, "frequency": 7.5, "amplitude": "12.5"}"#,
        ));
        let adapter = SchumannAdapter::gci(client);

        let raw = adapter
            .fetch(
                &FetchRequest::new(SignalKind::Schumann, None),
                &CancellationToken::new(),
            )
            .await
            .expect("payload");
        assert_eq!(raw.points[0].value, 7.91);
        assert_eq!(raw.points[0].secondary, Some(12.5));
        assert_eq!(raw.points[0].observed_at, None);
    }

    #[tokio::test]
    async fn ucsd_reads_nested_sr1() {
        let client = Arc::new(StaticHttpClient::new().with_json(
            SchumannAdapter::UCSD_ENDPOINT,
            r#"{"data": {"sr1": {"frequency": 7.83, "amplitude": 3.1}}}"#,
        ));
        let adapter = SchumannAdapter::ucsd(client);
        assert_eq!(adapter.id(), ProviderId::Ucsd);

        let raw = adapter
            .fetch(
                &FetchRequest::new(SignalKind::Schumann, None),
                &CancellationToken::new(),
            )
            .await
            .expect("payload");
        assert_eq!(raw.points[0].value, 7.83);
    }

    #[test]
    fn missing_frequency_is_malformed() {
        let resonance: Resonance = serde_json::from_str(r#"{"amplitude": 1.0}"#).expect("json");
        let err = normalize(ProviderId::Gci, resonance).expect_err("malformed");
        assert_eq!(err.code(), "provider.malformed");
    }
}
