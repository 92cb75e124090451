//! Geo/time matching of raw provider points.
//!
//! Filters out points that are too old or too far from the target and picks
//! the nearest survivor; equal distances go to the most recent observation.
//! `None` means "no nearby fresh data", which is not a provider failure.

use std::cmp::Ordering;
use std::time::Duration;

use crate::data_source::RawPoint;
use crate::{haversine_km, GeoPoint, UtcDateTime};

/// Limits applied to one provider's points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchCriteria {
    pub target: Option<GeoPoint>,
    pub max_distance_km: Option<f64>,
    pub max_age: Option<Duration>,
}

/// The selected point with its resolved timestamp and distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub point: RawPoint,
    pub observed_at: UtcDateTime,
    /// `None` when no target was given, `Some(0.0)` for points without a location.
    pub distance_km: Option<f64>,
}

/// Pick the best point, stamping undated points with `now` (the fetch time).
pub fn select(points: &[RawPoint], criteria: MatchCriteria, now: UtcDateTime) -> Option<Candidate> {
    points
        .iter()
        .filter(|point| point.value.is_finite())
        .filter_map(|point| {
            let observed_at = point.observed_at.unwrap_or(now);
            if let Some(max_age) = criteria.max_age {
                if observed_at.age_at(now) > max_age {
                    return None;
                }
            }

            let distance_km = criteria.target.map(|target| {
                point
                    .location
                    .map_or(0.0, |location| haversine_km(target, location))
            });
            if let (Some(distance), Some(limit)) = (distance_km, criteria.max_distance_km) {
                if distance > limit {
                    return None;
                }
            }

            Some(Candidate {
                point: point.clone(),
                observed_at,
                distance_km,
            })
        })
        .min_by(compare_candidates)
}

fn compare_candidates(left: &Candidate, right: &Candidate) -> Ordering {
    let left_distance = left.distance_km.unwrap_or(0.0);
    let right_distance = right.distance_km.unwrap_or(0.0);
    left_distance
        .total_cmp(&right_distance)
        .then_with(|| right.observed_at.cmp(&left.observed_at))
}
