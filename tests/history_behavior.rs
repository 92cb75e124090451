//! Behavior-driven tests for signal history: retention, ordering,
//! persistence across restarts and spatial filtering.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use skysignal_core::{
    CacheOutcome, CascadeResolver, Clock, GeoPoint, HistoryBackendKind, HistorySettings,
    ManualClock, Nearby, ProviderId, ProviderSpec, ResolverConfig, SignalConfig, SignalHistory,
    SignalKind, StoredSample, UtcDateTime,
};
use skysignal_history::{DuckDbBackend, HistoryConfig, HistoryPoint, HistoryStore, JsonFileBackend};

// =============================================================================
// Fixtures
// =============================================================================

fn start() -> UtcDateTime {
    UtcDateTime::parse("2024-05-01T00:00:00Z").expect("timestamp")
}

fn hours(count: u64) -> Duration {
    Duration::from_secs(count * 3_600)
}

fn sample(observed_at: UtcDateTime, value: f64) -> StoredSample {
    StoredSample {
        observed_at,
        value,
        location: None,
    }
}

fn retention(kind: SignalKind, window: Duration) -> HistoryConfig {
    HistoryConfig::default().with_retention(
        SignalHistory::series_name(kind),
        time::Duration::try_from(window).expect("window"),
    )
}

fn signal_history(store: HistoryStore) -> (SignalHistory, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    (SignalHistory::new(store, clock.clone()), clock)
}

// =============================================================================
// Retention window
// =============================================================================

#[test]
fn when_clock_moves_past_retention_old_points_are_never_returned() {
    // Given: a 6 h retention for k-index and hourly samples for a day
    let (history, clock) = signal_history(HistoryStore::in_memory(retention(
        SignalKind::KIndex,
        hours(6),
    )));
    for hour in 0..24u64 {
        history
            .append(SignalKind::KIndex, sample(clock.now(), hour as f64 % 9.0))
            .expect("append");
        clock.advance(hours(1));
    }

    // When: everything is requested with a window wider than retention
    let samples = history
        .recent(SignalKind::KIndex, hours(48), None)
        .expect("recent");

    // Then: nothing older than now - retention survives
    let cutoff = clock.now().saturating_sub(hours(6));
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|sample| sample.observed_at >= cutoff));
    assert_eq!(samples.len(), 6);
}

#[test]
fn retention_is_per_signal() {
    let config = retention(SignalKind::KIndex, hours(2)).with_retention(
        SignalHistory::series_name(SignalKind::Schumann),
        time::Duration::hours(48),
    );
    let (history, clock) = signal_history(HistoryStore::in_memory(config));

    for kind in [SignalKind::KIndex, SignalKind::Schumann] {
        history.append(kind, sample(clock.now(), 3.0)).expect("append");
    }
    clock.advance(hours(5));

    assert_eq!(history.latest(SignalKind::KIndex, None).expect("latest"), None);
    assert!(history
        .latest(SignalKind::Schumann, None)
        .expect("latest")
        .is_some());
}

// =============================================================================
// Ordering and deduplication
// =============================================================================

#[test]
fn out_of_order_appends_come_back_oldest_first() {
    let (history, clock) = signal_history(HistoryStore::in_memory(HistoryConfig::default()));
    clock.advance(hours(10));
    let now = clock.now();

    for (hours_ago, value) in [(2, 7.82), (5, 7.80), (1, 7.85), (3, 7.81)] {
        history
            .append(
                SignalKind::Schumann,
                sample(now.saturating_sub(hours(hours_ago)), value),
            )
            .expect("append");
    }

    let values: Vec<f64> = history
        .recent(SignalKind::Schumann, hours(24), None)
        .expect("recent")
        .iter()
        .map(|sample| sample.value)
        .collect();
    assert_eq!(values, [7.80, 7.81, 7.82, 7.85]);
}

#[test]
fn same_observation_time_replaces_instead_of_duplicating() {
    let (history, clock) = signal_history(HistoryStore::in_memory(HistoryConfig::default()));
    let observed_at = clock.now();
    clock.advance(hours(1));

    history
        .append(SignalKind::FxRate, sample(observed_at, 1.071))
        .expect("append");
    history
        .append(SignalKind::FxRate, sample(observed_at, 1.072))
        .expect("append");

    let samples = history
        .recent(SignalKind::FxRate, hours(24), None)
        .expect("recent");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 1.072);
}

#[test]
fn samples_without_location_pass_every_radius_filter() {
    let (history, clock) = signal_history(HistoryStore::in_memory(HistoryConfig::default()));
    clock.advance(hours(3));
    let limassol = GeoPoint::new(34.68, 33.04).expect("point");
    let helsinki = GeoPoint::new(60.17, 24.94).expect("point");

    history
        .append(
            SignalKind::AirQuality,
            StoredSample {
                observed_at: clock.now().saturating_sub(hours(2)),
                value: 41.0,
                location: None,
            },
        )
        .expect("append");
    history
        .append(
            SignalKind::AirQuality,
            StoredSample {
                observed_at: clock.now().saturating_sub(hours(1)),
                value: 18.0,
                location: Some(helsinki),
            },
        )
        .expect("append");

    let near = Nearby {
        target: limassol,
        radius_km: 50.0,
    };
    let kept = history
        .recent(SignalKind::AirQuality, hours(24), Some(near))
        .expect("recent");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].value, 41.0);
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn json_series_survive_reopen_with_locations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let limassol = GeoPoint::new(34.68, 33.04).expect("point");

    {
        let store = HistoryStore::new(
            Arc::new(JsonFileBackend::new(dir.path())),
            HistoryConfig::default(),
        );
        let (history, clock) = signal_history(store);
        history
            .append(
                SignalKind::Radiation,
                StoredSample {
                    observed_at: clock.now(),
                    value: 0.11,
                    location: Some(limassol),
                },
            )
            .expect("append");
    }

    let store = HistoryStore::new(
        Arc::new(JsonFileBackend::new(dir.path())),
        HistoryConfig::default(),
    );
    let (history, clock) = signal_history(store);
    clock.advance(hours(1));
    let latest = history
        .latest(SignalKind::Radiation, None)
        .expect("latest")
        .expect("persisted sample");

    assert_eq!(latest.value, 0.11);
    assert_eq!(latest.observed_at, start());
    let location = latest.location.expect("location");
    assert!((location.lat() - 34.68).abs() < 1e-9);
    assert!((location.lon() - 33.04).abs() < 1e-9);
}

#[test]
fn duckdb_series_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.duckdb");

    {
        let backend = DuckDbBackend::open(&path).expect("open");
        let (history, clock) =
            signal_history(HistoryStore::new(Arc::new(backend), HistoryConfig::default()));
        for value in [7.80, 7.83] {
            history
                .append(SignalKind::Schumann, sample(clock.now(), value))
                .expect("append");
            clock.advance(hours(1));
        }
    }

    let backend = DuckDbBackend::open(&path).expect("reopen");
    let (history, clock) =
        signal_history(HistoryStore::new(Arc::new(backend), HistoryConfig::default()));
    clock.advance(hours(3));
    let samples = history
        .recent(SignalKind::Schumann, hours(24), None)
        .expect("recent");

    let values: Vec<f64> = samples.iter().map(|sample| sample.value).collect();
    assert_eq!(values, [7.80, 7.83]);
}

// =============================================================================
// Concurrent writers
// =============================================================================

fn json_store(dir: &Path) -> HistoryStore {
    HistoryStore::new(
        Arc::new(JsonFileBackend::new(dir)),
        HistoryConfig::default(),
    )
}

fn append_minutes(store: &HistoryStore, offsets: std::ops::Range<u64>) -> usize {
    let now = start();
    offsets
        .filter(|minutes| {
            let observed_at = now.saturating_sub(Duration::from_secs(minutes * 60));
            store
                .append(
                    "schumann",
                    HistoryPoint::new(observed_at.into_inner(), 7.83, None),
                    now.into_inner(),
                )
                .is_err()
        })
        .count()
}

#[test]
fn overlapping_cycles_sharing_a_json_directory_keep_every_append() {
    // Given: two stores on one directory, as two overlapping resolver runs would open
    let dir = tempfile::tempdir().expect("tempdir");
    let first = json_store(dir.path());
    let second = json_store(dir.path());

    // When: both append 100 distinct observations at the same time
    let errors = std::thread::scope(|scope| {
        let left = scope.spawn(|| append_minutes(&first, 0..100));
        let right = scope.spawn(|| append_minutes(&second, 100..200));
        left.join().expect("first writer") + right.join().expect("second writer")
    });

    // Then: no write failed and nothing was overwritten
    assert_eq!(errors, 0);
    let kept = json_store(dir.path())
        .recent("schumann", time::Duration::hours(24), start().into_inner())
        .expect("recent");
    assert_eq!(kept.len(), 200);
}

#[test]
fn threads_sharing_one_json_store_keep_every_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = json_store(dir.path());

    let errors: usize = std::thread::scope(|scope| {
        let writers: Vec<_> = (0..4u64)
            .map(|writer| {
                let store = &store;
                scope.spawn(move || append_minutes(store, writer * 25..writer * 25 + 25))
            })
            .collect();
        writers
            .into_iter()
            .map(|writer| writer.join().expect("writer"))
            .sum()
    });

    assert_eq!(errors, 0);
    let kept = store
        .recent("schumann", time::Duration::hours(24), start().into_inner())
        .expect("recent");
    assert_eq!(kept.len(), 100);
}

#[tokio::test]
async fn duckdb_backend_can_be_selected_through_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = HistorySettings {
        backend: HistoryBackendKind::Duckdb,
        path: dir.path().join("skysignal.duckdb"),
    };
    let config = ResolverConfig::for_home(Path::new("/nonexistent"))
        .with_history(settings)
        .with_signal(
            SignalKind::KIndex,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::NoaaSwpc)]),
        );
    let clock = Arc::new(ManualClock::new(start()));
    let resolver = CascadeResolver::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .expect("resolver");
    resolver
        .history()
        .append(
            SignalKind::KIndex,
            sample(start().saturating_sub(hours(1)), 4.33),
        )
        .expect("append");

    // No adapters are registered, so only history can answer.
    let resolution = resolver.resolve(SignalKind::KIndex, None).await;

    assert_eq!(resolution.cache, CacheOutcome::Hit { age_secs: 3_600 });
    assert_eq!(resolution.reading().map(|reading| reading.value), Some(4.33));
    assert!(resolver.history().describe().starts_with("duckdb:"));
}

#[tokio::test]
async fn corrupt_history_file_is_treated_as_an_empty_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("k_index.json"), b"{ not json").expect("write");
    let config = ResolverConfig::for_home(Path::new("/nonexistent"))
        .with_history(HistorySettings::json(dir.path()))
        .with_signal(
            SignalKind::KIndex,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::NoaaSwpc)]),
        );
    let resolver = CascadeResolver::builder()
        .with_config(config)
        .with_clock(Arc::new(ManualClock::new(start())))
        .build()
        .expect("resolver");

    let resolution = resolver.resolve(SignalKind::KIndex, None).await;

    assert_eq!(resolution.cache, CacheOutcome::Empty);
    assert!(resolution.is_absent());
}

// =============================================================================
// History report
// =============================================================================

#[test]
fn history_report_lists_window_and_trend() {
    let config = ResolverConfig::for_home(Path::new("/nonexistent"))
        .with_history(HistorySettings::memory())
        .with_signal(
            SignalKind::SeaTemperature,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::OpenMeteoMarine)])
                .threshold(0.3)
                .cache_radius_km(50.0),
        );
    let clock = Arc::new(ManualClock::new(start()));
    let resolver = CascadeResolver::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .expect("resolver");
    let limassol = GeoPoint::new(34.68, 33.04).expect("point");
    for (hours_ago, value) in [(30, 19.0), (3, 21.4), (2, 21.5), (1, 20.6)] {
        resolver
            .history()
            .append(
                SignalKind::SeaTemperature,
                StoredSample {
                    observed_at: clock.now().saturating_sub(hours(hours_ago)),
                    value,
                    location: Some(limassol),
                },
            )
            .expect("append");
    }

    let report = resolver
        .history_report(SignalKind::SeaTemperature, hours(24), Some(limassol))
        .expect("report");

    assert_eq!(report.samples.len(), 3);
    assert_eq!(report.unit, "degC");
    assert_eq!(report.window_secs, 86_400);
    assert_eq!(report.trend, skysignal_core::Trend::Falling);
}
