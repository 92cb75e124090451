//! Signal-level view over the history store.
//!
//! One series per signal kind, named after [`SignalKind::as_str`]. Geo-scoped
//! lookups keep only points within a radius of the target; points stored
//! without a location always qualify.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use skysignal_history::{Coordinates, HistoryPoint, HistoryStore};

use crate::clock::Clock;
use crate::{haversine_km, CoreError, GeoPoint, SignalKind, UtcDateTime};

/// A stored observation converted back into domain types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoredSample {
    pub observed_at: UtcDateTime,
    pub value: f64,
    pub location: Option<GeoPoint>,
}

impl StoredSample {
    fn from_point(point: &HistoryPoint) -> Self {
        Self {
            observed_at: UtcDateTime::from_any_offset(point.observed_at),
            value: point.value,
            location: point
                .location
                .and_then(|coordinates| GeoPoint::new(coordinates.lat, coordinates.lon).ok()),
        }
    }

    fn into_point(self) -> HistoryPoint {
        HistoryPoint::new(
            self.observed_at.into_inner(),
            self.value,
            self.location.map(|location| Coordinates {
                lat: location.lat(),
                lon: location.lon(),
            }),
        )
    }
}

/// Spatial filter for geo-scoped series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearby {
    pub target: GeoPoint,
    pub radius_km: f64,
}

impl Nearby {
    fn admits(self, sample: &StoredSample) -> bool {
        sample
            .location
            .map_or(true, |location| haversine_km(self.target, location) <= self.radius_km)
    }
}

/// History store plus the clock that decides what "now" means for pruning.
pub struct SignalHistory {
    store: HistoryStore,
    clock: Arc<dyn Clock>,
}

impl SignalHistory {
    pub fn new(store: HistoryStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn series_name(kind: SignalKind) -> &'static str {
        kind.as_str()
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    pub fn now(&self) -> UtcDateTime {
        self.clock.now()
    }

    pub fn append(&self, kind: SignalKind, sample: StoredSample) -> Result<(), CoreError> {
        self.store.append(
            Self::series_name(kind),
            sample.into_point(),
            self.now().into_inner(),
        )?;
        Ok(())
    }

    /// Samples observed within `window`, oldest first.
    pub fn recent(
        &self,
        kind: SignalKind,
        window: Duration,
        nearby: Option<Nearby>,
    ) -> Result<Vec<StoredSample>, CoreError> {
        let points = self.store.recent(
            Self::series_name(kind),
            to_time_duration(window),
            self.now().into_inner(),
        )?;
        Ok(points
            .iter()
            .map(StoredSample::from_point)
            .filter(|sample| nearby.map_or(true, |nearby| nearby.admits(sample)))
            .collect())
    }

    /// Newest retained sample, optionally restricted to the neighbourhood.
    pub fn latest(
        &self,
        kind: SignalKind,
        nearby: Option<Nearby>,
    ) -> Result<Option<StoredSample>, CoreError> {
        let Some(nearby) = nearby else {
            let point = self
                .store
                .latest(Self::series_name(kind), self.now().into_inner())?;
            return Ok(point.as_ref().map(StoredSample::from_point));
        };

        let retention = self.store.config().retention_for(Self::series_name(kind));
        let points = self.store.recent(
            Self::series_name(kind),
            retention,
            self.now().into_inner(),
        )?;
        Ok(points
            .iter()
            .rev()
            .map(StoredSample::from_point)
            .find(|sample| nearby.admits(sample)))
    }

    pub fn clear(&self, kind: SignalKind) -> Result<(), CoreError> {
        self.store.clear(Self::series_name(kind))?;
        Ok(())
    }
}

pub(crate) fn to_time_duration(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
