//! Provider adapters driven by canned upstream payloads, end to end through
//! the cascade resolver.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use skysignal_core::{
    AttemptOutcome, CascadeResolver, CascadeState, CircuitBreaker, CircuitBreakerConfig,
    CbrRatesAdapter, CircuitState, EcbRatesAdapter, FxRateAdapter, GeoPoint, HistorySettings, HttpFetcher, HttpClient,
    ManualClock, NoaaKpAdapter, ProviderErrorKind, ProviderId, ProviderSpec, Provenance,
    RadmonAdapter, ResolverConfig, RetryConfig, SignalConfig, SignalKind, SignalSource,
    StaticHttpClient, UtcDateTime,
};

// =============================================================================
// Fixtures
// =============================================================================

/// 2024-05-01T12:00:00Z
const NOON_UNIX: i64 = 1_714_564_800;

fn noon() -> UtcDateTime {
    UtcDateTime::parse("2024-05-01T12:00:00Z").expect("timestamp")
}

fn fast_fetcher(provider: ProviderId, client: &Arc<StaticHttpClient>) -> HttpFetcher {
    HttpFetcher::new(provider, Arc::clone(client) as Arc<dyn HttpClient>)
        .with_retry(RetryConfig::fixed(Duration::from_millis(1), 2))
}

fn resolver_for(
    kind: SignalKind,
    signal: SignalConfig,
    sources: Vec<Arc<dyn SignalSource>>,
) -> CascadeResolver {
    let config = ResolverConfig::for_home(Path::new("/nonexistent"))
        .with_history(HistorySettings::memory())
        .with_signal(kind, signal);
    CascadeResolver::builder()
        .with_config(config)
        .with_sources(sources)
        .with_clock(Arc::new(ManualClock::new(noon())))
        .build()
        .expect("resolver")
}

fn kaliningrad() -> GeoPoint {
    GeoPoint::new(54.71, 20.51).expect("point")
}

// =============================================================================
// Radiation
// =============================================================================

#[tokio::test]
async fn radmon_counts_are_converted_and_nearest_station_is_used() {
    // Given: one station next to the target and one ~290 km away
    let body = format!(
        r#"{{"users": [
            {{"lat": "54.72", "lon": "20.52", "last_seen": {near}, "cpm_avg": "20"}},
            {{"lat": 54.69, "lon": 25.28, "last_seen": {near}, "cpm_avg": 10}}
        ]}}"#,
        near = NOON_UNIX - 1_800
    );
    let client = Arc::new(StaticHttpClient::new().with_json(RadmonAdapter::DEFAULT_ENDPOINT, body));
    let radmon = RadmonAdapter::with_fetcher(fast_fetcher(ProviderId::Radmon, &client));
    let resolver = resolver_for(
        SignalKind::Radiation,
        SignalConfig::new(vec![ProviderSpec::new(ProviderId::Radmon)
            .within_km(100.0)
            .max_age(Duration::from_secs(3 * 3_600))]),
        vec![Arc::new(radmon) as Arc<dyn SignalSource>],
    );

    // When: radiation is resolved for the target
    let resolution = resolver
        .resolve(SignalKind::Radiation, Some(kaliningrad()))
        .await;

    // Then: the close station's averaged CPM becomes µSv/h
    let reading = resolution.reading().expect("reading");
    assert!((reading.value - 0.13).abs() < 1e-9);
    assert_eq!(reading.secondary, Some(20.0));
    assert_eq!(reading.provenance, Provenance::Provider(ProviderId::Radmon));
    assert_eq!(reading.observed_at.format_rfc3339(), "2024-05-01T11:30:00Z");
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn default_radiation_cascade_reaches_the_safecast_snapshot() {
    // Given: live radiation upstreams are unreachable and a snapshot exists
    let home = tempfile::tempdir().expect("home");
    let snapshot = format!(
        r#"{{"history": [{{"lat": 54.70, "lon": 20.50, "ts": {ts}, "uSv_h": 0.095}}]}}"#,
        ts = NOON_UNIX - 20 * 3_600
    );
    std::fs::write(home.path().join("safecast_radiation.json"), snapshot).expect("snapshot");

    let client = Arc::new(StaticHttpClient::new());
    let resolver = CascadeResolver::builder()
        .with_config(ResolverConfig::for_home(home.path()))
        .with_http_client(client.clone())
        .with_clock(Arc::new(ManualClock::new(noon())))
        .build()
        .expect("resolver");

    // When: radiation is resolved
    let resolution = resolver
        .resolve(SignalKind::Radiation, Some(kaliningrad()))
        .await;

    // Then: both live providers fail with 404 and the snapshot answers
    let providers: Vec<ProviderId> = resolution
        .attempts
        .iter()
        .map(|attempt| attempt.provider)
        .collect();
    assert_eq!(
        providers,
        [ProviderId::Radmon, ProviderId::Eurdep, ProviderId::Safecast]
    );
    assert!(matches!(
        resolution.attempts[0].outcome,
        AttemptOutcome::Unavailable { kind: ProviderErrorKind::Status, retryable: false, .. }
    ));
    let reading = resolution.reading().expect("snapshot reading");
    assert!(reading.is_cached);
    assert_eq!(reading.value, 0.095);
    assert_eq!(resolution.state, CascadeState::Succeeded);
}

// =============================================================================
// FX rates
// =============================================================================

#[tokio::test]
async fn official_rate_tiers_fall_back_from_ecb_to_cbr_with_previous_rate() {
    // Given: the ECB feed is down and the Bank of Russia table answers
    let client = Arc::new(
        StaticHttpClient::new()
            .with_status(EcbRatesAdapter::ENDPOINT, 503, "maintenance")
            .with_json(
                CbrRatesAdapter::ENDPOINT,
                r#"{"Date": "2024-05-01T11:30:00+03:00",
                    "Valute": {"USD": {"Nominal": 1, "Value": 93.4409, "Previous": 92.0}}}"#,
            ),
    );
    let sources: Vec<Arc<dyn SignalSource>> = vec![
        Arc::new(EcbRatesAdapter::with_fetcher(fast_fetcher(ProviderId::Ecb, &client))),
        Arc::new(CbrRatesAdapter::with_fetcher(fast_fetcher(ProviderId::Cbr, &client))),
    ];
    let chain = SignalConfig::new(
        [ProviderId::Ecb, ProviderId::Cbr]
            .into_iter()
            .map(|provider| {
                ProviderSpec::new(provider)
                    .param("base", "USD")
                    .param("quote", "RUB")
            })
            .collect(),
    );
    let resolver = resolver_for(SignalKind::FxRate, chain, sources);

    // When: the rate is resolved
    let resolution = resolver.resolve(SignalKind::FxRate, None).await;

    // Then: the CBR rate is served with the previous day's rate alongside
    assert_eq!(resolution.selected_provider(), Some(ProviderId::Cbr));
    let reading = resolution.reading().expect("rate");
    assert_eq!(reading.value, 93.4409);
    assert_eq!(reading.secondary, Some(92.0));
    assert_eq!(reading.observed_at.format_rfc3339(), "2024-05-01T08:30:00Z");
    assert!(matches!(
        resolution.attempts[0].outcome,
        AttemptOutcome::Unavailable { kind: ProviderErrorKind::Status, .. }
    ));
}

#[tokio::test]
async fn fx_chain_falls_through_to_the_third_provider() {
    // Given: exchangerate.host reports failure in a 200 body,
    // frankfurter keeps answering 503 and open.er-api works
    let client = Arc::new(
        StaticHttpClient::new()
            .with_json(
                FxRateAdapter::EXCHANGERATE_HOST_ENDPOINT,
                r#"{"success": false, "error": {"code": 101}}"#,
            )
            .with_status(FxRateAdapter::FRANKFURTER_ENDPOINT, 503, "busy")
            .with_json(
                FxRateAdapter::OPEN_ERAPI_ENDPOINT,
                r#"{"result": "success", "time_last_update_unix": 1714521601,
                    "base_code": "EUR", "rates": {"USD": "1.0712", "RUB": 99.1}}"#,
            ),
    );
    let sources: Vec<Arc<dyn SignalSource>> = vec![
        Arc::new(FxRateAdapter::with_fetcher(fast_fetcher(
            ProviderId::ExchangerateHost,
            &client,
        ))),
        Arc::new(FxRateAdapter::with_fetcher(fast_fetcher(ProviderId::Frankfurter, &client))),
        Arc::new(FxRateAdapter::with_fetcher(fast_fetcher(ProviderId::OpenErapi, &client))),
    ];
    let chain = SignalConfig::new(
        [
            ProviderId::ExchangerateHost,
            ProviderId::Frankfurter,
            ProviderId::OpenErapi,
        ]
        .into_iter()
        .map(|provider| {
            ProviderSpec::new(provider)
                .param("base", "EUR")
                .param("quote", "USD")
        })
        .collect(),
    );
    let resolver = resolver_for(SignalKind::FxRate, chain, sources);

    // When: the rate is resolved
    let resolution = resolver.resolve(SignalKind::FxRate, None).await;

    // Then: the third provider's rate is served
    let reading = resolution.reading().expect("rate");
    assert_eq!(reading.value, 1.0712);
    assert_eq!(resolution.selected_provider(), Some(ProviderId::OpenErapi));
    assert_eq!(reading.observed_at.format_rfc3339(), "2024-05-01T00:00:01Z");

    // And: the 200-with-failure body is not retried, the 503 is retried twice
    assert!(matches!(
        resolution.attempts[0].outcome,
        AttemptOutcome::Unavailable { kind: ProviderErrorKind::Malformed, .. }
    ));
    assert!(matches!(
        resolution.attempts[1].outcome,
        AttemptOutcome::Unavailable { kind: ProviderErrorKind::Status, retryable: true, .. }
    ));
    let urls: Vec<String> = client
        .requests()
        .iter()
        .map(|request| request.full_url())
        .collect();
    assert_eq!(urls.len(), 5);
    assert_eq!(
        urls[0],
        "https://api.exchangerate.host/latest?base=EUR&symbols=USD"
    );
    assert_eq!(urls[1], "https://api.frankfurter.app/latest?from=EUR&to=USD");
    assert_eq!(urls[4], "https://open.er-api.com/v6/latest/EUR");
}

#[tokio::test]
async fn transient_status_is_retried_until_success() {
    let client = Arc::new(
        StaticHttpClient::new()
            .with_status(FxRateAdapter::FRANKFURTER_ENDPOINT, 502, "bad gateway")
            .with_json(
                FxRateAdapter::FRANKFURTER_ENDPOINT,
                r#"{"amount": 1.0, "base": "EUR", "date": "2024-05-01", "rates": {"USD": 1.07}}"#,
            ),
    );
    let frankfurter =
        FxRateAdapter::with_fetcher(fast_fetcher(ProviderId::Frankfurter, &client));
    let resolver = resolver_for(
        SignalKind::FxRate,
        SignalConfig::new(vec![ProviderSpec::new(ProviderId::Frankfurter)]),
        vec![Arc::new(frankfurter) as Arc<dyn SignalSource>],
    );

    let resolution = resolver.resolve(SignalKind::FxRate, None).await;

    assert_eq!(resolution.reading().map(|reading| reading.value), Some(1.07));
    assert_eq!(client.request_count(), 2);
}

#[tokio::test]
async fn open_circuit_skips_the_upstream_entirely() {
    let client = Arc::new(StaticHttpClient::new().with_status(
        FxRateAdapter::FRANKFURTER_ENDPOINT,
        500,
        "down",
    ));
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        open_timeout: Duration::from_secs(3_600),
    }));
    let frankfurter = Arc::new(FxRateAdapter::with_fetcher(
        fast_fetcher(ProviderId::Frankfurter, &client).with_circuit_breaker(Arc::clone(&breaker)),
    ));
    let resolver = resolver_for(
        SignalKind::FxRate,
        SignalConfig::new(vec![ProviderSpec::new(ProviderId::Frankfurter)]),
        vec![frankfurter.clone() as Arc<dyn SignalSource>],
    );

    let first = resolver.resolve(SignalKind::FxRate, None).await;
    let second = resolver.resolve(SignalKind::FxRate, None).await;

    // One failed fetch (three requests) opens the breaker.
    assert!(first.is_absent());
    assert_eq!(frankfurter.circuit_state(), CircuitState::Open);
    assert_eq!(client.request_count(), 3);
    assert!(matches!(
        second.attempts[0].outcome,
        AttemptOutcome::Unavailable { kind: ProviderErrorKind::CircuitOpen, .. }
    ));
    let chain = resolver.provider_chain(SignalKind::FxRate);
    assert_eq!(chain[0].circuit, Some(CircuitState::Open));
}

// =============================================================================
// Geomagnetic index
// =============================================================================

#[tokio::test]
async fn noaa_table_yields_latest_fresh_kp() {
    let client = Arc::new(StaticHttpClient::new().with_json(
        NoaaKpAdapter::DEFAULT_ENDPOINT,
        r#"[
            ["time_tag", "Kp", "a_running", "station_count"],
            ["2024-05-01 03:00:00.000", "2.33", "9", "8"],
            ["2024-05-01 06:00:00.000", "3.67", "18", "8"],
            ["2024-05-01 09:00:00.000", "5.00", "48", "8"]
        ]"#,
    ));
    let noaa = NoaaKpAdapter::with_fetcher(fast_fetcher(ProviderId::NoaaSwpc, &client));
    let resolver = resolver_for(
        SignalKind::KIndex,
        SignalConfig::new(vec![ProviderSpec::new(ProviderId::NoaaSwpc)
            .max_age(Duration::from_secs(6 * 3_600))])
        .threshold(1.0),
        vec![Arc::new(noaa) as Arc<dyn SignalSource>],
    );

    let resolution = resolver.resolve(SignalKind::KIndex, None).await;

    // Without a target every row is at distance zero, so the newest wins.
    let reading = resolution.reading().expect("kp");
    assert_eq!(reading.value, 5.0);
    assert_eq!(reading.unit(), "Kp");
    assert_eq!(reading.observed_at.format_rfc3339(), "2024-05-01T09:00:00Z");
}
