use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::FxRate];

/// Currency pair rate (`quote` per one `base`) from one of three free APIs.
///
/// The pair comes from the provider params `base` and `quote` (default
/// EUR/USD).
#[derive(Clone)]
pub struct FxRateAdapter {
    provider: ProviderId,
    fetcher: HttpFetcher,
}

impl FxRateAdapter {
    pub const EXCHANGERATE_HOST_ENDPOINT: &'static str = "https://api.exchangerate.host/latest";
    pub const FRANKFURTER_ENDPOINT: &'static str = "https://api.frankfurter.app/latest";
    /// The base currency is appended as the last path segment.
    pub const OPEN_ERAPI_ENDPOINT: &'static str = "https://open.er-api.com/v6/latest";

    pub fn exchangerate_host(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::ExchangerateHost, http_client))
    }

    pub fn frankfurter(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Frankfurter, http_client))
    }

    pub fn open_erapi(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::OpenErapi, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self {
            provider: fetcher.provider(),
            fetcher,
        }
    }

    fn build_request(&self, request: &FetchRequest, pair: &CurrencyPair) -> HttpRequest {
        match self.provider {
            ProviderId::Frankfurter => {
                HttpRequest::get(request.endpoint_or(Self::FRANKFURTER_ENDPOINT))
                    .with_query("from", pair.base.as_str())
                    .with_query("to", pair.quote.as_str())
            }
            ProviderId::OpenErapi => {
                let root = request.endpoint_or(Self::OPEN_ERAPI_ENDPOINT);
                HttpRequest::get(format!("{}/{}", root.trim_end_matches('/'), pair.base))
            }
            _ => HttpRequest::get(request.endpoint_or(Self::EXCHANGERATE_HOST_ENDPOINT))
                .with_query("base", pair.base.as_str())
                .with_query("symbols", pair.quote.as_str()),
        }
    }
}

impl SignalSource for FxRateAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let pair = CurrencyPair::from_request(self.provider, request)?;
            let http_request = self.build_request(request, &pair);
            let payload: RatesPayload = self
                .fetcher
                .get_json(http_request, request.timeout, cancel)
                .await?;
            normalize(self.provider, &pair, payload)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CurrencyPair {
    pub(super) base: String,
    pub(super) quote: String,
}

impl CurrencyPair {
    pub(super) fn from_request(provider: ProviderId, request: &FetchRequest) -> Result<Self, ProviderError> {
        let base = currency_code(provider, request.param("base").unwrap_or("EUR"))?;
        let quote = currency_code(provider, request.param("quote").unwrap_or("USD"))?;
        Ok(Self { base, quote })
    }
}

fn currency_code(provider: ProviderId, value: &str) -> Result<String, ProviderError> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ProviderError::misconfigured(
            provider,
            format!("'{value}' is not a three-letter currency code"),
        ))
    }
}

/// Union of the three payload shapes; each provider fills a subset.
#[derive(Debug, Deserialize)]
struct RatesPayload {
    #[serde(default)]
    rates: BTreeMap<String, LenientRate>,
    /// `YYYY-MM-DD` (exchangerate.host, frankfurter).
    #[serde(default)]
    date: Option<String>,
    /// `"success"` or `"error"` (open.er-api).
    #[serde(default)]
    result: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    time_last_update_unix: Option<f64>,
    /// exchangerate.host answers 200 with `success: false` on failures.
    #[serde(default)]
    success: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct LenientRate(#[serde(deserialize_with = "lenient_f64")] Option<f64>);

fn normalize(
    provider: ProviderId,
    pair: &CurrencyPair,
    payload: RatesPayload,
) -> Result<RawPayload, ProviderError> {
    if payload.success == Some(false) {
        return Err(ProviderError::malformed(provider, format!("{provider} reported failure")));
    }
    if let Some(result) = payload.result.as_deref() {
        if result != "success" {
            return Err(ProviderError::malformed(
                provider,
                format!("{provider} reported result '{result}'"),
            ));
        }
    }

    let rate = payload
        .rates
        .get(&pair.quote)
        .and_then(|rate| rate.0)
        .ok_or_else(|| {
            ProviderError::malformed(
                provider,
                format!("{provider} rates have no {} for base {}", pair.quote, pair.base),
            )
        })?;

    let observed_at = match provider {
        ProviderId::OpenErapi => payload
            .time_last_update_unix
            .and_then(|seconds| UtcDateTime::from_unix_seconds(seconds).ok()),
        _ => payload
            .date
            .as_deref()
            .and_then(|date| UtcDateTime::parse_naive_utc(date).ok()),
    };

    let mut point = RawPoint::new(rate);
    if let Some(observed_at) = observed_at {
        point = point.observed_at(observed_at);
    }
    Ok(RawPayload::single(point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::ProviderErrorKind;
    use crate::http_client::StaticHttpClient;

    fn eur_usd() -> FetchRequest {
        FetchRequest::new(SignalKind::FxRate, None)
            .with_param("base", "eur")
            .with_param("quote", "usd")
    }

    #[tokio::test]
    async fn frankfurter_builds_query_and_reads_date() {
        let client = Arc::new(StaticHttpClient::new().with_json(
            FxRateAdapter::FRANKFURTER_ENDPOINT,
            r#"{"amount": 1.0, "base": "EUR", "date": "2024-05-01", "rates": {"USD": 1.0706}}"#,
        ));
        let adapter = FxRateAdapter::frankfurter(client.clone());

        let raw = adapter
            .fetch(&eur_usd(), &CancellationToken::new())
            .await
            .expect("rate");
        assert_eq!(raw.points[0].value, 1.0706);
        assert_eq!(
            raw.points[0].observed_at.map(UtcDateTime::format_rfc3339).as_deref(),
            Some("2024-05-01T00:00:00Z")
        );
        assert_eq!(
            client.requests()[0].full_url(),
            "https://api.frankfurter.app/latest?from=EUR&to=USD"
        );
    }

    #[tokio::test]
    async fn open_erapi_uses_base_path_and_unix_update_time() {
        let client = Arc::new(StaticHttpClient::new().with_json(
            "https://open.er-api.com/v6/latest/EUR",
            r#"{"result": "success", "time_last_update_unix": 1714521600, "rates": {"USD": "1.07"}}"#,
        ));
        let adapter = FxRateAdapter::open_erapi(client);

        let raw = adapter
            .fetch(&eur_usd(), &CancellationToken::new())
            .await
            .expect("rate");
        assert_eq!(raw.points[0].value, 1.07);
        assert!(raw.points[0].observed_at.is_some());
    }

    #[test]
    fn error_results_and_missing_quotes_are_malformed() {
        let pair = CurrencyPair {
            base: String::from("EUR"),
            quote: String::from("USD"),
        };
        let failed: RatesPayload =
            serde_json::from_str(r#"{"result": "error", "error-type": "unsupported-code"}"#)
                .expect("json");
        let err = normalize(ProviderId::OpenErapi, &pair, failed).expect_err("error result");
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);

        let missing: RatesPayload =
            serde_json::from_str(r#"{"rates": {"RUB": 99.1}}"#).expect("json");
        assert!(normalize(ProviderId::ExchangerateHost, &pair, missing).is_err());

        let unsuccessful: RatesPayload =
            serde_json::from_str(r#"{"success": false, "rates": {"USD": 1.0}}"#).expect("json");
        assert!(normalize(ProviderId::ExchangerateHost, &pair, unsuccessful).is_err());
    }

    #[tokio::test]
    async fn invalid_currency_param_is_misconfigured() {
        let adapter = FxRateAdapter::exchangerate_host(Arc::new(StaticHttpClient::new()));
        let request = FetchRequest::new(SignalKind::FxRate, None).with_param("quote", "US$");

        let err = adapter
            .fetch(&request, &CancellationToken::new())
            .await
            .expect_err("bad code");
        assert_eq!(err.kind(), ProviderErrorKind::Misconfigured);
    }
}
