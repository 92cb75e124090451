//! Resolver configuration.
//!
//! [`ResolverConfig::default`] carries the built-in cascades. A TOML file can
//! override any part of them; durations are written in seconds:
//!
//! ```toml
//! [history]
//! backend = "duckdb"
//! path = "/var/lib/skysignal/history.duckdb"
//!
//! [signals.schumann]
//! rising_threshold = 0.15
//! staleness_ceiling = 86400
//!
//! [[signals.radiation.providers]]
//! provider = "eurdep"
//! max_distance_km = 250.0
//! max_age = 21600
//! ```
//!
//! A `providers` list in the file replaces the whole cascade of that signal.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skysignal_history::{
    DuckDbBackend, HistoryBackend, HistoryConfig, HistoryStore, JsonFileBackend, MemoryBackend,
};

use crate::history::to_time_duration;
use crate::trend::{TrendBaseline, TrendRule};
use crate::{CoreError, ProviderId, SignalKind, ValidationError};

const HOUR: u64 = 3_600;

fn hours(count: u64) -> Duration {
    Duration::from_secs(count * HOUR)
}

/// Whether a provider serves live data or a locally collected snapshot.
///
/// Snapshot readings are reported as cached and never written to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Live,
    Snapshot,
}

/// One entry of a signal's provider cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    pub provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "option_duration_secs")]
    pub max_age: Option<Duration>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(15)
}

impl ProviderSpec {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            endpoint: None,
            timeout: default_timeout(),
            max_distance_km: None,
            max_age: None,
            tier: Tier::Live,
            params: BTreeMap::new(),
        }
    }

    pub fn within_km(mut self, max_distance_km: f64) -> Self {
        self.max_distance_km = Some(max_distance_km);
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.tier = Tier::Snapshot;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Cascade, retention and trend settings for one signal kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub providers: Vec<ProviderSpec>,
    #[serde(with = "duration_secs")]
    pub retention: Duration,
    #[serde(with = "duration_secs")]
    pub trend_window: Duration,
    pub rising_threshold: f64,
    pub falling_threshold: f64,
    #[serde(default)]
    pub trend_baseline: TrendBaseline,
    /// Cached readings older than this are not served.
    #[serde(with = "duration_secs")]
    pub staleness_ceiling: Duration,
    /// Radius for history lookups of geo-scoped signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_radius_km: Option<f64>,
}

impl SignalConfig {
    pub fn new(providers: Vec<ProviderSpec>) -> Self {
        Self {
            providers,
            retention: hours(168),
            trend_window: hours(24),
            rising_threshold: 0.0,
            falling_threshold: 0.0,
            trend_baseline: TrendBaseline::WindowMean,
            staleness_ceiling: hours(24),
            cache_radius_km: None,
        }
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn trend_window(mut self, window: Duration) -> Self {
        self.trend_window = window;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.rising_threshold = threshold;
        self.falling_threshold = threshold;
        self
    }

    pub fn baseline(mut self, baseline: TrendBaseline) -> Self {
        self.trend_baseline = baseline;
        self
    }

    pub fn staleness_ceiling(mut self, ceiling: Duration) -> Self {
        self.staleness_ceiling = ceiling;
        self
    }

    pub fn cache_radius_km(mut self, radius_km: f64) -> Self {
        self.cache_radius_km = Some(radius_km);
        self
    }

    pub fn trend_rule(&self) -> TrendRule {
        TrendRule {
            rising_threshold: self.rising_threshold,
            falling_threshold: self.falling_threshold,
            baseline: self.trend_baseline,
        }
    }

    pub fn validate(&self, kind: SignalKind) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidSignalConfig {
            kind: kind.as_str().to_owned(),
            reason,
        };

        if self.providers.is_empty() {
            return Err(ValidationError::EmptyCascade {
                kind: kind.as_str().to_owned(),
            });
        }
        for spec in &self.providers {
            if spec.provider.signal_kind() != kind {
                return Err(invalid(format!(
                    "provider '{}' serves {}, not {kind}",
                    spec.provider,
                    spec.provider.signal_kind()
                )));
            }
            if spec.timeout.is_zero() {
                return Err(invalid(format!("provider '{}' has a zero timeout", spec.provider)));
            }
            if let Some(limit) = spec.max_distance_km {
                if !limit.is_finite() || limit < 0.0 {
                    return Err(invalid(format!(
                        "provider '{}' max_distance_km must be a non-negative number",
                        spec.provider
                    )));
                }
            }
        }
        for (name, threshold) in [
            ("rising_threshold", self.rising_threshold),
            ("falling_threshold", self.falling_threshold),
        ] {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(invalid(format!("{name} must be a non-negative number")));
            }
        }
        if self.retention.is_zero() {
            return Err(invalid(String::from("retention must be positive")));
        }
        if let Some(radius) = self.cache_radius_km {
            if !radius.is_finite() || radius < 0.0 {
                return Err(invalid(String::from("cache_radius_km must be a non-negative number")));
            }
        }
        Ok(())
    }
}

/// Where history lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackendKind {
    Json,
    Duckdb,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    pub backend: HistoryBackendKind,
    /// Directory for `json`, database file for `duckdb`; ignored for `memory`.
    pub path: PathBuf,
}

impl HistorySettings {
    pub fn json(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: HistoryBackendKind::Json,
            path: dir.into(),
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: HistoryBackendKind::Memory,
            path: PathBuf::new(),
        }
    }
}

/// Complete resolver configuration, passed in by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub history: HistorySettings,
    pub signals: BTreeMap<SignalKind, SignalConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::for_home(&resolve_skysignal_home())
    }
}

impl ResolverConfig {
    /// Built-in cascades with history and snapshot files under `home`.
    pub fn for_home(home: &Path) -> Self {
        let mut signals = BTreeMap::new();

        signals.insert(
            SignalKind::Radiation,
            SignalConfig::new(vec![
                ProviderSpec::new(ProviderId::Radmon)
                    .within_km(100.0)
                    .max_age(hours(3)),
                ProviderSpec::new(ProviderId::Eurdep)
                    .within_km(200.0)
                    .max_age(hours(6)),
                ProviderSpec::new(ProviderId::Safecast)
                    .within_km(150.0)
                    .max_age(hours(48))
                    .endpoint(home.join("safecast_radiation.json").display().to_string())
                    .snapshot(),
            ])
            .threshold(0.005)
            .baseline(TrendBaseline::PreviousSample)
            .staleness_ceiling(hours(48))
            .cache_radius_km(150.0),
        );

        signals.insert(
            SignalKind::Schumann,
            SignalConfig::new(vec![
                ProviderSpec::new(ProviderId::Gci).max_age(hours(6)),
                ProviderSpec::new(ProviderId::Ucsd).max_age(hours(6)),
            ])
            .threshold(0.10)
            .staleness_ceiling(hours(24 * 7)),
        );

        signals.insert(
            SignalKind::AirQuality,
            SignalConfig::new(vec![
                ProviderSpec::new(ProviderId::Airvisual)
                    .within_km(100.0)
                    .max_age(hours(3))
                    .param("key_env", "AIRVISUAL_KEY"),
                ProviderSpec::new(ProviderId::OpenMeteoAir)
                    .within_km(25.0)
                    .max_age(hours(3)),
            ])
            .retention(hours(72))
            .threshold(10.0)
            .staleness_ceiling(hours(6))
            .cache_radius_km(50.0),
        );

        signals.insert(
            SignalKind::Pollen,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::OpenMeteoPollen)
                .within_km(25.0)
                .max_age(hours(24))])
            .retention(hours(72))
            .threshold(1.0)
            .staleness_ceiling(hours(24))
            .cache_radius_km(50.0),
        );

        signals.insert(
            SignalKind::SeaTemperature,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::OpenMeteoMarine)
                .within_km(50.0)
                .max_age(hours(24))])
            .threshold(0.5)
            .staleness_ceiling(hours(72))
            .cache_radius_km(50.0),
        );

        signals.insert(
            SignalKind::KIndex,
            SignalConfig::new(vec![ProviderSpec::new(ProviderId::NoaaSwpc).max_age(hours(6))])
                .retention(hours(72))
                .threshold(1.0)
                .staleness_ceiling(hours(12)),
        );

        let fx_provider = |provider| {
            ProviderSpec::new(provider)
                .max_age(hours(96))
                .timeout(Duration::from_secs(12))
                .param("base", "EUR")
                .param("quote", "USD")
        };
        signals.insert(
            SignalKind::FxRate,
            SignalConfig::new(vec![
                fx_provider(ProviderId::ExchangerateHost),
                fx_provider(ProviderId::Frankfurter),
                fx_provider(ProviderId::OpenErapi),
                fx_provider(ProviderId::Ecb),
                fx_provider(ProviderId::Cbr),
            ])
            .trend_window(hours(72))
            .threshold(0.005)
            .staleness_ceiling(hours(96)),
        );

        Self {
            history: HistorySettings::json(home.join("history")),
            signals,
        }
    }

    pub fn signal(&self, kind: SignalKind) -> Option<&SignalConfig> {
        self.signals.get(&kind)
    }

    pub fn with_signal(mut self, kind: SignalKind, config: SignalConfig) -> Self {
        self.signals.insert(kind, config);
        self
    }

    pub fn with_history(mut self, history: HistorySettings) -> Self {
        self.history = history;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (kind, config) in &self.signals {
            config.validate(*kind)?;
        }
        Ok(())
    }

    /// Load defaults for `SKYSIGNAL_HOME` and overlay the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path)?;
        Self::default().overlay_toml(&text)
    }

    /// Apply a TOML override document on top of `self`.
    pub fn overlay_toml(mut self, text: &str) -> Result<Self, CoreError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|error| CoreError::Config(error.to_string()))?;

        if let Some(history) = file.history {
            if let Some(backend) = history.backend {
                self.history.backend = backend;
            }
            if let Some(path) = history.path {
                self.history.path = path;
            }
        }

        for (name, patch) in file.signals {
            let kind: SignalKind = name.parse()?;
            let base = self
                .signals
                .remove(&kind)
                .unwrap_or_else(|| SignalConfig::new(Vec::new()));
            self.signals.insert(kind, patch.apply(base));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn history_config(&self) -> HistoryConfig {
        self.signals
            .iter()
            .fold(HistoryConfig::default(), |config, (kind, signal)| {
                config.with_retention(kind.as_str(), to_time_duration(signal.retention))
            })
    }

    /// Open the configured backend with per-signal retention.
    pub fn open_history(&self) -> Result<HistoryStore, CoreError> {
        let backend: Arc<dyn HistoryBackend> = match self.history.backend {
            HistoryBackendKind::Json => Arc::new(JsonFileBackend::new(&self.history.path)),
            HistoryBackendKind::Duckdb => Arc::new(DuckDbBackend::open(&self.history.path)?),
            HistoryBackendKind::Memory => Arc::new(MemoryBackend::default()),
        };
        Ok(HistoryStore::new(backend, self.history_config()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    history: Option<HistoryPatch>,
    #[serde(default)]
    signals: BTreeMap<String, SignalPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HistoryPatch {
    backend: Option<HistoryBackendKind>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalPatch {
    providers: Option<Vec<ProviderSpec>>,
    #[serde(default, with = "option_duration_secs")]
    retention: Option<Duration>,
    #[serde(default, with = "option_duration_secs")]
    trend_window: Option<Duration>,
    rising_threshold: Option<f64>,
    falling_threshold: Option<f64>,
    /// Sets both thresholds unless one is given explicitly.
    threshold: Option<f64>,
    trend_baseline: Option<TrendBaseline>,
    #[serde(default, with = "option_duration_secs")]
    staleness_ceiling: Option<Duration>,
    cache_radius_km: Option<f64>,
}

impl SignalPatch {
    fn apply(self, mut base: SignalConfig) -> SignalConfig {
        if let Some(providers) = self.providers {
            base.providers = providers;
        }
        if let Some(retention) = self.retention {
            base.retention = retention;
        }
        if let Some(window) = self.trend_window {
            base.trend_window = window;
        }
        if let Some(threshold) = self.threshold {
            base.rising_threshold = threshold;
            base.falling_threshold = threshold;
        }
        if let Some(threshold) = self.rising_threshold {
            base.rising_threshold = threshold;
        }
        if let Some(threshold) = self.falling_threshold {
            base.falling_threshold = threshold;
        }
        if let Some(baseline) = self.trend_baseline {
            base.trend_baseline = baseline;
        }
        if let Some(ceiling) = self.staleness_ceiling {
            base.staleness_ceiling = ceiling;
        }
        if let Some(radius) = self.cache_radius_km {
            base.cache_radius_km = Some(radius);
        }
        base
    }
}

/// `SKYSIGNAL_HOME`, else `$HOME/.skysignal`, else `./.skysignal`.
pub fn resolve_skysignal_home() -> PathBuf {
    if let Some(path) = env::var_os("SKYSIGNAL_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".skysignal");
    }

    PathBuf::from(".skysignal")
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

pub(crate) mod option_duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(D::Error::custom)
    }
}
