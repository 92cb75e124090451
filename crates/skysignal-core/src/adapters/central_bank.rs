//! Official daily reference rates from the Bank of Russia and the ECB.
//!
//! Both publish one table of rates against their home currency; any pair is
//! derived as a cross rate through that currency.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::fx::CurrencyPair;
use crate::adapters::{lenient_f64, HttpFetcher};
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::FxRate];

/// Home-currency value of one unit of each listed currency.
#[derive(Debug, Default)]
struct ReferenceTable {
    home: &'static str,
    current: BTreeMap<String, f64>,
    previous: BTreeMap<String, f64>,
}

impl ReferenceTable {
    fn new(home: &'static str) -> Self {
        Self {
            home,
            ..Self::default()
        }
    }

    fn unit_value(table: &BTreeMap<String, f64>, home: &str, code: &str) -> Option<f64> {
        if code == home {
            return Some(1.0);
        }
        table.get(code).copied()
    }

    /// `quote` per one `base`.
    fn cross(&self, table: &BTreeMap<String, f64>, pair: &CurrencyPair) -> Option<f64> {
        let base = Self::unit_value(table, self.home, &pair.base)?;
        let quote = Self::unit_value(table, self.home, &pair.quote)?;
        let rate = base / quote;
        rate.is_finite().then_some(rate)
    }

    fn into_point(
        self,
        provider: ProviderId,
        pair: &CurrencyPair,
        observed_at: Option<UtcDateTime>,
    ) -> Result<RawPayload, ProviderError> {
        let rate = self.cross(&self.current, pair).ok_or_else(|| {
            ProviderError::malformed(
                provider,
                format!("{provider} table has no {} or {}", pair.base, pair.quote),
            )
        })?;

        let mut point = RawPoint::new(rate).with_secondary(self.cross(&self.previous, pair));
        if let Some(observed_at) = observed_at {
            point = point.observed_at(observed_at);
        }
        Ok(RawPayload::single(point))
    }
}

// =============================================================================
// Bank of Russia
// =============================================================================

/// Bank of Russia daily rates (RUB home currency) via the cbr-xml-daily
/// mirror. `secondary` carries the previous business day's rate.
#[derive(Clone)]
pub struct CbrRatesAdapter {
    fetcher: HttpFetcher,
}

impl CbrRatesAdapter {
    pub const ENDPOINT: &'static str = "https://www.cbr-xml-daily.ru/daily_json.js";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Cbr, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl SignalSource for CbrRatesAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Cbr
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let pair = CurrencyPair::from_request(ProviderId::Cbr, request)?;
            let payload: CbrPayload = self
                .fetcher
                .get_json(
                    HttpRequest::get(request.endpoint_or(Self::ENDPOINT)),
                    request.timeout,
                    cancel,
                )
                .await?;
            normalize_cbr(&pair, payload)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

#[derive(Debug, Deserialize)]
struct CbrPayload {
    /// RFC 3339 with the Moscow offset.
    #[serde(rename = "Date", default)]
    date: Option<String>,
    #[serde(rename = "Valute", default)]
    valute: BTreeMap<String, CbrValute>,
}

/// `value` and `previous` are roubles per `nominal` units.
#[derive(Debug, Deserialize)]
struct CbrValute {
    #[serde(rename = "Nominal", default, deserialize_with = "lenient_f64")]
    nominal: Option<f64>,
    #[serde(rename = "Value", default, deserialize_with = "lenient_f64")]
    value: Option<f64>,
    #[serde(rename = "Previous", default, deserialize_with = "lenient_f64")]
    previous: Option<f64>,
}

fn normalize_cbr(pair: &CurrencyPair, payload: CbrPayload) -> Result<RawPayload, ProviderError> {
    let mut table = ReferenceTable::new("RUB");
    for (code, valute) in payload.valute {
        let nominal = valute.nominal.filter(|nominal| *nominal > 0.0).unwrap_or(1.0);
        if let Some(value) = valute.value {
            table.current.insert(code.clone(), value / nominal);
        }
        if let Some(previous) = valute.previous {
            table.previous.insert(code, previous / nominal);
        }
    }

    let observed_at = payload
        .date
        .as_deref()
        .and_then(|date| UtcDateTime::parse_with_offset(date).ok());
    table.into_point(ProviderId::Cbr, pair, observed_at)
}

// =============================================================================
// European Central Bank
// =============================================================================

/// ECB euro foreign exchange reference rates (EUR home currency).
#[derive(Clone)]
pub struct EcbRatesAdapter {
    fetcher: HttpFetcher,
}

impl EcbRatesAdapter {
    pub const ENDPOINT: &'static str =
        "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::Ecb, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl SignalSource for EcbRatesAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Ecb
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let pair = CurrencyPair::from_request(ProviderId::Ecb, request)?;
            let http_request = HttpRequest::get(request.endpoint_or(Self::ENDPOINT))
                .with_header("Accept", "application/xml,text/xml;q=0.9,*/*;q=0.8");
            let body = self
                .fetcher
                .get_text(http_request, request.timeout, cancel)
                .await?;
            parse_ecb(&pair, &body)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

/// `<gesmes:Envelope><Cube><Cube time=".."><Cube currency=".." rate=".."/>`
#[derive(Debug, Deserialize)]
struct EcbEnvelope {
    #[serde(rename = "Cube")]
    cube: EcbCubes,
}

#[derive(Debug, Deserialize)]
struct EcbCubes {
    #[serde(rename = "Cube", default)]
    days: Vec<EcbDay>,
}

#[derive(Debug, Deserialize)]
struct EcbDay {
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "Cube", default)]
    rates: Vec<EcbRate>,
}

#[derive(Debug, Deserialize)]
struct EcbRate {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

fn parse_ecb(pair: &CurrencyPair, body: &str) -> Result<RawPayload, ProviderError> {
    let provider = ProviderId::Ecb;
    let envelope: EcbEnvelope = quick_xml::de::from_str(body)
        .map_err(|error| ProviderError::malformed(provider, format!("ecb feed: {error}")))?;
    let day = envelope
        .cube
        .days
        .into_iter()
        .last()
        .ok_or_else(|| ProviderError::malformed(provider, "ecb feed has no dated cube"))?;

    let mut table = ReferenceTable::new("EUR");
    for rate in day.rates {
        // The feed lists foreign units per euro.
        let per_euro = rate.rate.trim().parse::<f64>().ok().filter(|rate| *rate > 0.0);
        if let Some(per_euro) = per_euro {
            table.current.insert(rate.currency, 1.0 / per_euro);
        }
    }

    let observed_at = UtcDateTime::parse_naive_utc(&day.time).ok();
    table.into_point(provider, pair, observed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::ProviderErrorKind;
    use crate::http_client::StaticHttpClient;

    const CBR_DAILY: &str = r#"{
        "Date": "2024-05-01T11:30:00+03:00",
        "PreviousDate": "2024-04-30T11:30:00+03:00",
        "Valute": {
            "USD": {"CharCode": "USD", "Nominal": 1, "Value": 93.4409, "Previous": 92.0},
            "EUR": {"CharCode": "EUR", "Nominal": 1, "Value": 99.8, "Previous": 98.9},
            "JPY": {"CharCode": "JPY", "Nominal": 100, "Value": 59.5, "Previous": 59.1}
        }
    }"#;

    const ECB_DAILY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gesmes:Envelope xmlns:gesmes="http://www.gesmes.org/xml/2002-08-01" xmlns="http://www.ecb.int/vocabulary/2002-08-01/eurofxref">
    <gesmes:subject>Reference rates</gesmes:subject>
    <gesmes:Sender>
        <gesmes:name>European Central Bank</gesmes:name>
    </gesmes:Sender>
    <Cube>
        <Cube time='2024-05-02'>
            <Cube currency='USD' rate='1.0712'/>
            <Cube currency='GBP' rate='0.85525'/>
            <Cube currency='TRY' rate='34.6353'/>
        </Cube>
    </Cube>
</gesmes:Envelope>"#;

    fn pair(base: &str, quote: &str) -> CurrencyPair {
        CurrencyPair {
            base: base.to_owned(),
            quote: quote.to_owned(),
        }
    }

    #[test]
    fn cbr_rouble_quotes_carry_the_previous_rate() {
        let payload: CbrPayload = serde_json::from_str(CBR_DAILY).expect("json");
        let raw = normalize_cbr(&pair("USD", "RUB"), payload).expect("rate");

        let point = &raw.points[0];
        assert_eq!(point.value, 93.4409);
        assert_eq!(point.secondary, Some(92.0));
        assert_eq!(
            point.observed_at.map(UtcDateTime::format_rfc3339).as_deref(),
            Some("2024-05-01T08:30:00Z")
        );
    }

    #[test]
    fn cbr_cross_rates_respect_nominal() {
        let payload: CbrPayload = serde_json::from_str(CBR_DAILY).expect("json");
        let raw = normalize_cbr(&pair("EUR", "JPY"), payload).expect("rate");
        assert!((raw.points[0].value - 99.8 / 0.595).abs() < 1e-9);

        let payload: CbrPayload = serde_json::from_str(CBR_DAILY).expect("json");
        let raw = normalize_cbr(&pair("EUR", "USD"), payload).expect("rate");
        assert!((raw.points[0].value - 99.8 / 93.4409).abs() < 1e-12);
    }

    #[test]
    fn cbr_missing_currency_is_malformed() {
        let payload: CbrPayload = serde_json::from_str(CBR_DAILY).expect("json");
        let err = normalize_cbr(&pair("CNY", "RUB"), payload).expect_err("no CNY");
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);
    }

    #[test]
    fn ecb_feed_gives_euro_quotes_and_crosses() {
        let raw = parse_ecb(&pair("EUR", "USD"), ECB_DAILY).expect("rate");
        let point = &raw.points[0];
        assert!((point.value - 1.0712).abs() < 1e-12);
        assert_eq!(point.secondary, None);
        assert_eq!(
            point.observed_at.map(UtcDateTime::format_rfc3339).as_deref(),
            Some("2024-05-02T00:00:00Z")
        );

        let cross = parse_ecb(&pair("GBP", "USD"), ECB_DAILY).expect("cross");
        assert!((cross.points[0].value - 1.0712 / 0.85525).abs() < 1e-9);
    }

    #[test]
    fn ecb_feed_without_rates_is_malformed() {
        let err = parse_ecb(&pair("EUR", "USD"), "<Envelope><Cube></Cube></Envelope>")
            .expect_err("empty");
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);

        let err = parse_ecb(&pair("EUR", "USD"), "not xml at all").expect_err("garbage");
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);
    }

    #[tokio::test]
    async fn adapters_fetch_their_default_endpoints() {
        let client = Arc::new(
            StaticHttpClient::new()
                .with_json(CbrRatesAdapter::ENDPOINT, CBR_DAILY)
                .with_json(EcbRatesAdapter::ENDPOINT, ECB_DAILY),
        );
        let request = FetchRequest::new(SignalKind::FxRate, None)
            .with_param("base", "usd")
            .with_param("quote", "rub");

        let cbr = CbrRatesAdapter::new(client.clone())
            .fetch(&request, &CancellationToken::new())
            .await
            .expect("cbr");
        assert_eq!(cbr.points[0].value, 93.4409);

        let ecb = EcbRatesAdapter::new(client.clone())
            .fetch(&request, &CancellationToken::new())
            .await
            .expect_err("ecb has no RUB");
        assert_eq!(ecb.kind(), ProviderErrorKind::Malformed);
        assert_eq!(client.request_count(), 2);
    }
}
