//! Concrete provider adapters.
//!
//! Every HTTP adapter delegates transport to [`HttpFetcher`], which owns the
//! circuit breaker, the per-attempt timeout, cancellation and the retry loop.
//! Adapters themselves only describe the request and map the typed payload
//! into [`RawPoint`](crate::data_source::RawPoint)s.
//!
//! | Adapter | Providers | Kind |
//! |---------|-----------|------|
//! | [`RadmonAdapter`] | radmon | radiation |
//! | [`EurdepAdapter`] | eurdep | radiation |
//! | [`SafecastSnapshotAdapter`] | safecast (local file) | radiation |
//! | [`SchumannAdapter`] | gci, ucsd | schumann |
//! | [`FxRateAdapter`] | exchangerate_host, frankfurter, open_erapi | fx_rate |
//! | [`EcbRatesAdapter`] | ecb | fx_rate |
//! | [`CbrRatesAdapter`] | cbr | fx_rate |
//! | [`AirVisualAdapter`] | airvisual | air_quality |
//! | [`OpenMeteoAdapter`] | open_meteo_air, open_meteo_pollen, open_meteo_marine | air_quality, pollen, sea_temperature |
//! | [`NoaaKpAdapter`] | noaa_swpc | k_index |

mod airvisual;
mod central_bank;
mod eurdep;
mod fx;
mod noaa;
mod open_meteo;
mod radmon;
mod safecast;
mod schumann;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::data_source::{ProviderError, SignalSource};
use crate::http_client::{HttpClient, HttpErrorKind, HttpRequest};
use crate::retry::RetryConfig;
use crate::ProviderId;

pub use airvisual::AirVisualAdapter;
pub use central_bank::{CbrRatesAdapter, EcbRatesAdapter};
pub use eurdep::EurdepAdapter;
pub use fx::FxRateAdapter;
pub use noaa::NoaaKpAdapter;
pub use open_meteo::OpenMeteoAdapter;
pub use radmon::RadmonAdapter;
pub use safecast::SafecastSnapshotAdapter;
pub use schumann::SchumannAdapter;

/// One adapter per provider, sharing `http_client`.
pub fn default_sources(http_client: Arc<dyn HttpClient>) -> Vec<Arc<dyn SignalSource>> {
    vec![
        Arc::new(RadmonAdapter::new(Arc::clone(&http_client))),
        Arc::new(EurdepAdapter::new(Arc::clone(&http_client))),
        Arc::new(SafecastSnapshotAdapter::new()),
        Arc::new(SchumannAdapter::gci(Arc::clone(&http_client))),
        Arc::new(SchumannAdapter::ucsd(Arc::clone(&http_client))),
        Arc::new(FxRateAdapter::exchangerate_host(Arc::clone(&http_client))),
        Arc::new(FxRateAdapter::frankfurter(Arc::clone(&http_client))),
        Arc::new(FxRateAdapter::open_erapi(Arc::clone(&http_client))),
        Arc::new(EcbRatesAdapter::new(Arc::clone(&http_client))),
        Arc::new(CbrRatesAdapter::new(Arc::clone(&http_client))),
        Arc::new(AirVisualAdapter::new(Arc::clone(&http_client))),
        Arc::new(OpenMeteoAdapter::air(Arc::clone(&http_client))),
        Arc::new(OpenMeteoAdapter::pollen(Arc::clone(&http_client))),
        Arc::new(OpenMeteoAdapter::marine(Arc::clone(&http_client))),
        Arc::new(NoaaKpAdapter::new(http_client)),
    ]
}

/// Transport shared by the HTTP adapters.
#[derive(Clone)]
pub struct HttpFetcher {
    provider: ProviderId,
    http_client: Arc<dyn HttpClient>,
    retry: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
    secret_params: &'static [&'static str],
}

impl HttpFetcher {
    pub fn new(provider: ProviderId, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            provider,
            http_client,
            retry: RetryConfig::default(),
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            secret_params: &[],
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Query parameters masked in log output.
    pub fn with_secret_params(mut self, names: &'static [&'static str]) -> Self {
        self.secret_params = names;
        self
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// GET `request` and decode the body as `T`.
    pub async fn get_json<T>(
        &self,
        request: HttpRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let body = self.get_text(request, timeout, cancel).await?;
        serde_json::from_str(&body).map_err(|error| {
            ProviderError::malformed(
                self.provider,
                format!("{} payload does not match: {error}", self.provider),
            )
        })
    }

    /// GET `request` with the retry policy, returning the body of the first 2xx answer.
    pub async fn get_text(
        &self,
        request: HttpRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled(self.provider));
        }
        if !self.circuit_breaker.allow_request() {
            debug!(
                provider = %self.provider,
                retry_after_secs = ?self.circuit_breaker.retry_after().map(|after| after.as_secs()),
                "circuit open, skipping upstream"
            );
            return Err(ProviderError::circuit_open(self.provider));
        }

        let request = request.with_timeout(timeout);
        let url = request.redacted_url(self.secret_params);
        let mut attempt: u32 = 0;

        loop {
            debug!(provider = %self.provider, attempt, url = %url, "upstream request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(self.provider)),
                outcome = tokio::time::timeout(timeout, self.http_client.execute(request.clone())) => outcome,
            };

            let error = match outcome {
                Ok(Ok(response)) if response.is_success() => {
                    self.circuit_breaker.record_success();
                    return Ok(response.body);
                }
                Ok(Ok(response)) => ProviderError::status(
                    self.provider,
                    response.status,
                    self.retry.should_retry_status(response.status),
                ),
                Ok(Err(error)) => match error.kind() {
                    HttpErrorKind::Timeout => ProviderError::timeout(self.provider, timeout)
                        .with_retryable(self.retry.retry_on_timeout),
                    HttpErrorKind::Connect | HttpErrorKind::Other => {
                        ProviderError::transport(self.provider, error.message())
                            .with_retryable(self.retry.retry_on_transport)
                    }
                },
                Err(_elapsed) => ProviderError::timeout(self.provider, timeout)
                    .with_retryable(self.retry.retry_on_timeout),
            };

            if !error.retryable() || attempt >= self.retry.max_retries {
                if error.trips_breaker() {
                    self.circuit_breaker.record_failure();
                }
                return Err(error);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            attempt += 1;
            debug!(
                provider = %self.provider,
                code = error.code(),
                delay_ms = delay.as_millis() as u64,
                "retrying upstream request"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(self.provider)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Decode each element on its own and drop the ones that do not fit.
pub(crate) fn decode_entries<T>(provider: ProviderId, values: Vec<serde_json::Value>) -> Vec<T>
where
    T: DeserializeOwned,
{
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(error) => {
                debug!(%provider, index, %error, "skipping undecodable entry");
                None
            }
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accepts `1.5`, `"1.5"` or null; unparsable text becomes `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrText>::deserialize(deserializer)?;
    let parsed = value.and_then(|value| match value {
        NumberOrText::Number(number) => Some(number),
        NumberOrText::Text(text) => text.trim().parse::<f64>().ok(),
    });
    Ok(parsed.filter(|number| number.is_finite()))
}
