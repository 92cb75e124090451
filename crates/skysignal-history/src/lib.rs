//! # Skysignal History
//!
//! Durable, append-only time series of past signal observations.
//!
//! ## Overview
//!
//! The resolver stores every live observation here and falls back to the
//! newest stored point when all providers fail. Series survive process
//! restarts; each series is pruned to its retention window on every read and
//! write so stale points never accumulate.
//!
//! ## Backends
//!
//! | Backend | Storage |
//! |---------|---------|
//! | [`JsonFileBackend`] | One `<series>.json` file per series, replaced atomically |
//! | [`DuckDbBackend`] | `history_points` table in a `DuckDB` database file |
//! | [`MemoryBackend`] | Process-local map, for tests and dry runs |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skysignal_history::{HistoryConfig, HistoryPoint, HistoryStore, JsonFileBackend};
//! use std::sync::Arc;
//! use time::{Duration, OffsetDateTime};
//!
//! # fn main() -> Result<(), skysignal_history::HistoryError> {
//! let backend = Arc::new(JsonFileBackend::new("/var/lib/skysignal/history"));
//! let store = HistoryStore::new(backend, HistoryConfig::default());
//!
//! let now = OffsetDateTime::now_utc();
//! store.append("schumann", HistoryPoint::new(now, 7.83, None), now)?;
//! let window = store.recent("schumann", Duration::hours(24), now)?;
//! assert!(!window.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod duckdb;
mod error;
pub mod json;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

pub use crate::duckdb::DuckDbBackend;
pub use error::HistoryError;
pub use json::JsonFileBackend;

/// Latitude/longitude pair stored alongside geo-scoped samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A persisted sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
}

impl HistoryPoint {
    pub fn new(observed_at: OffsetDateTime, value: f64, location: Option<Coordinates>) -> Self {
        Self {
            observed_at,
            value,
            location,
        }
    }
}

/// Storage contract for whole series.
///
/// Backends only load and replace complete series; ordering, deduplication
/// and pruning are handled by [`HistoryStore`] under the series lock.
pub trait HistoryBackend: Send + Sync {
    /// Load every stored point of `series`, in any order. Missing series are empty.
    fn load(&self, series: &str) -> Result<Vec<HistoryPoint>, HistoryError>;

    /// Replace the stored contents of `series` with `points`.
    fn replace(&self, series: &str, points: &[HistoryPoint]) -> Result<(), HistoryError>;

    /// Run `work` while holding the backend's exclusive lock on `series`.
    ///
    /// Backends shared between processes override this with a lock every
    /// process honours. `work` must be called exactly once.
    fn exclusive(
        &self,
        _series: &str,
        work: &mut dyn FnMut() -> Result<(), HistoryError>,
    ) -> Result<(), HistoryError> {
        work()
    }

    /// Human readable location of the storage, used in logs and the CLI.
    fn describe(&self) -> String;
}

/// Retention configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    /// Retention applied to series without an explicit entry.
    pub default_retention: Duration,
    /// Per-series retention windows.
    pub retention: BTreeMap<String, Duration>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_retention: Duration::hours(168),
            retention: BTreeMap::new(),
        }
    }
}

impl HistoryConfig {
    pub fn with_retention(mut self, series: impl Into<String>, retention: Duration) -> Self {
        self.retention.insert(series.into(), retention);
        self
    }

    pub fn retention_for(&self, series: &str) -> Duration {
        self.retention
            .get(series)
            .copied()
            .unwrap_or(self.default_retention)
    }
}

/// Append-only series store.
///
/// Every read-modify-write of a series runs under a per-series mutex and the
/// backend's [`HistoryBackend::exclusive`] lock, so concurrent appends from
/// threads or from other processes sharing the storage are never lost.
pub struct HistoryStore {
    backend: Arc<dyn HistoryBackend>,
    config: HistoryConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn HistoryBackend>, config: HistoryConfig) -> Self {
        Self {
            backend,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store, nothing survives the process.
    pub fn in_memory(config: HistoryConfig) -> Self {
        Self::new(Arc::new(MemoryBackend::default()), config)
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Add a point, then drop everything older than the series retention.
    ///
    /// A point with the same `observed_at` as a stored one replaces it, so a
    /// provider reporting an unchanged measurement twice does not skew trends.
    pub fn append(
        &self,
        series: &str,
        point: HistoryPoint,
        now: OffsetDateTime,
    ) -> Result<(), HistoryError> {
        validate_series(series)?;
        if !point.value.is_finite() {
            return Err(HistoryError::InvalidData(format!(
                "non-finite value for series '{series}'"
            )));
        }

        let cutoff = now - self.config.retention_for(series);
        self.with_series(series, |backend| {
            let mut points = backend.load(series)?;
            points.retain(|existing| existing.observed_at != point.observed_at);
            points.push(point);
            sort_points(&mut points);
            prune(&mut points, cutoff);
            backend.replace(series, &points)
        })
    }

    /// Retained points observed within `window` of `now`, oldest first.
    pub fn recent(
        &self,
        series: &str,
        window: Duration,
        now: OffsetDateTime,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        let points = self.load_pruned(series, now)?;
        let since = now - window;
        Ok(points
            .into_iter()
            .filter(|point| point.observed_at >= since)
            .collect())
    }

    /// Most recently observed retained point.
    pub fn latest(
        &self,
        series: &str,
        now: OffsetDateTime,
    ) -> Result<Option<HistoryPoint>, HistoryError> {
        let mut points = self.load_pruned(series, now)?;
        Ok(points.pop())
    }

    /// Drop all points of a series.
    pub fn clear(&self, series: &str) -> Result<(), HistoryError> {
        self.with_series(series, |backend| backend.replace(series, &[]))
    }

    fn load_pruned(
        &self,
        series: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<HistoryPoint>, HistoryError> {
        let cutoff = now - self.config.retention_for(series);
        self.with_series(series, |backend| {
            let mut points = backend.load(series)?;
            let loaded = points.len();
            sort_points(&mut points);
            prune(&mut points, cutoff);
            if points.len() != loaded {
                backend.replace(series, &points)?;
            }
            Ok(points)
        })
    }

    /// Serialize `work` against every other reader and writer of `series`:
    /// the in-process mutex first, then the backend's own lock.
    fn with_series<T>(
        &self,
        series: &str,
        work: impl FnOnce(&dyn HistoryBackend) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        validate_series(series)?;
        let lock = self.series_lock(series)?;
        let _guard = lock
            .lock()
            .map_err(|_| HistoryError::Poisoned(series.to_owned()))?;

        let backend = self.backend.as_ref();
        let mut work = Some(work);
        let mut output = None;
        backend.exclusive(series, &mut || -> Result<(), HistoryError> {
            if let Some(work) = work.take() {
                output = Some(work(backend)?);
            }
            Ok(())
        })?;
        output.ok_or_else(|| HistoryError::Lock {
            series: series.to_owned(),
            reason: format!("{} skipped the locked section", backend.describe()),
        })
    }

    fn series_lock(&self, series: &str) -> Result<Arc<Mutex<()>>, HistoryError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| HistoryError::Poisoned(series.to_owned()))?;
        Ok(Arc::clone(
            locks
                .entry(series.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    series: Mutex<HashMap<String, Vec<HistoryPoint>>>,
}

impl HistoryBackend for MemoryBackend {
    fn load(&self, series: &str) -> Result<Vec<HistoryPoint>, HistoryError> {
        let map = self
            .series
            .lock()
            .map_err(|_| HistoryError::Poisoned(series.to_owned()))?;
        Ok(map.get(series).cloned().unwrap_or_default())
    }

    fn replace(&self, series: &str, points: &[HistoryPoint]) -> Result<(), HistoryError> {
        let mut map = self
            .series
            .lock()
            .map_err(|_| HistoryError::Poisoned(series.to_owned()))?;
        map.insert(series.to_owned(), points.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        String::from("memory")
    }
}

pub(crate) fn validate_series(series: &str) -> Result<(), HistoryError> {
    let valid = !series.is_empty()
        && series.len() <= 64
        && series
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(HistoryError::InvalidSeries(series.to_owned()))
    }
}

fn sort_points(points: &mut [HistoryPoint]) {
    points.sort_by(|left, right| left.observed_at.cmp(&right.observed_at));
}

fn prune(points: &mut Vec<HistoryPoint>, cutoff: OffsetDateTime) {
    points.retain(|point| point.observed_at >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn point(at: OffsetDateTime, value: f64) -> HistoryPoint {
        HistoryPoint::new(at, value, None)
    }

    #[test]
    fn append_prunes_points_beyond_retention() {
        let store = HistoryStore::in_memory(
            HistoryConfig::default().with_retention("radiation", Duration::hours(48)),
        );
        let now = datetime!(2024-03-10 12:00 UTC);

        for hours_ago in [72, 50, 47, 1] {
            let at = now - Duration::hours(hours_ago);
            store
                .append("radiation", point(at, 0.1), now)
                .expect("append should succeed");
        }

        let retained = store
            .recent("radiation", Duration::hours(1000), now)
            .expect("read should succeed");
        assert_eq!(retained.len(), 2);
        assert!(retained
            .iter()
            .all(|p| p.observed_at >= now - Duration::hours(48)));
    }

    #[test]
    fn recent_is_ordered_and_windowed() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);

        for (hours_ago, value) in [(1, 3.0), (5, 2.0), (30, 1.0), (3, 2.5)] {
            store
                .append("k_index", point(now - Duration::hours(hours_ago), value), now)
                .expect("append should succeed");
        }

        let window = store
            .recent("k_index", Duration::hours(24), now)
            .expect("read should succeed");
        let values: Vec<f64> = window.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 2.5, 3.0]);
    }

    #[test]
    fn duplicate_observation_replaces_previous_sample() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);
        let at = now - Duration::minutes(30);

        store.append("schumann", point(at, 7.8), now).expect("append");
        store.append("schumann", point(at, 7.9), now).expect("append");

        let all = store
            .recent("schumann", Duration::hours(24), now)
            .expect("read");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, 7.9);
    }

    #[test]
    fn concurrent_appends_to_one_series_are_all_kept() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);

        std::thread::scope(|scope| {
            for writer in 0..4i64 {
                let store = &store;
                scope.spawn(move || {
                    for step in 0..50i64 {
                        let at = now - Duration::minutes(writer * 50 + step);
                        store
                            .append("schumann", point(at, 7.8), now)
                            .expect("append should succeed");
                    }
                });
            }
        });

        let kept = store
            .recent("schumann", Duration::hours(24), now)
            .expect("read should succeed");
        assert_eq!(kept.len(), 200);
    }

    #[test]
    fn latest_returns_none_for_unknown_series() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);
        assert!(store.latest("pollen", now).expect("read").is_none());
    }

    #[test]
    fn rejects_path_like_series_names() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);
        let err = store
            .append("../etc/passwd", point(now, 1.0), now)
            .expect_err("must reject");
        assert!(matches!(err, HistoryError::InvalidSeries(_)));
    }

    #[test]
    fn rejects_non_finite_values() {
        let store = HistoryStore::in_memory(HistoryConfig::default());
        let now = datetime!(2024-03-10 12:00 UTC);
        let err = store
            .append("fx_rate", point(now, f64::NAN), now)
            .expect_err("must reject");
        assert!(matches!(err, HistoryError::InvalidData(_)));
    }
}
