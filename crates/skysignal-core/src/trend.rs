//! Direction of a signal relative to its recent history.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Fewer points than this always yield [`Trend::Unknown`].
pub const MIN_TREND_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    Unknown,
}

impl Trend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for Trend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the latest value is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBaseline {
    /// Mean of every point except the latest.
    #[default]
    WindowMean,
    /// The point just before the latest.
    PreviousSample,
}

/// Thresholds for one signal kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendRule {
    pub rising_threshold: f64,
    pub falling_threshold: f64,
    pub baseline: TrendBaseline,
}

impl TrendRule {
    pub const fn symmetric(threshold: f64, baseline: TrendBaseline) -> Self {
        Self {
            rising_threshold: threshold,
            falling_threshold: threshold,
            baseline,
        }
    }
}

/// Classify `latest` against the earlier values in `values`.
///
/// `values` is oldest first and must already end with the latest value;
/// the last element is excluded from the baseline.
pub fn estimate(values: &[f64], latest: f64, rule: TrendRule) -> Trend {
    if values.len() < MIN_TREND_POINTS || !latest.is_finite() {
        return Trend::Unknown;
    }

    let earlier = &values[..values.len() - 1];
    let baseline = match rule.baseline {
        TrendBaseline::WindowMean => earlier.iter().sum::<f64>() / earlier.len() as f64,
        TrendBaseline::PreviousSample => match earlier.last() {
            Some(previous) => *previous,
            None => return Trend::Unknown,
        },
    };
    if !baseline.is_finite() {
        return Trend::Unknown;
    }

    if latest - baseline >= rule.rising_threshold {
        Trend::Rising
    } else if baseline - latest >= rule.falling_threshold {
        Trend::Falling
    } else {
        Trend::Stable
    }
}
