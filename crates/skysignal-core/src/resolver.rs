//! Cascade resolver: ordered providers, then history, never an error.
//!
//! ```text
//! TryingProvider(0) ──fail/no match──▶ TryingProvider(1) ──▶ … ──▶ FallingBackToCache
//!        │ match                              │ match                 │ fresh   │ stale/empty
//!        ▼                                    ▼                       ▼         ▼
//!    Succeeded ◀──────────────────────────────┘              Succeeded     Exhausted
//! ```
//!
//! Live readings are appended to history before the trend is computed, so the
//! trend always includes the value being reported. Snapshot-tier readings are
//! reported as cached and never written back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use skysignal_history::HistoryStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::default_sources;
use crate::circuit_breaker::CircuitState;
use crate::clock::{Clock, SystemClock};
use crate::config::{ProviderSpec, ResolverConfig, SignalConfig, Tier};
use crate::data_source::{FetchRequest, ProviderError, ProviderErrorKind, SignalSource};
use crate::history::{Nearby, SignalHistory, StoredSample};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::matcher::{self, MatchCriteria};
use crate::trend::{self, Trend};
use crate::{CoreError, GeoPoint, Provenance, ProviderId, Reading, SignalKind, UtcDateTime};

/// Position in the cascade. Resolutions always end in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeState {
    TryingProvider(usize),
    FallingBackToCache,
    Succeeded,
    Exhausted,
}

impl CascadeState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

/// What happened when one provider was tried.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted {
        #[serde(skip_serializing_if = "Option::is_none")]
        distance_km: Option<f64>,
    },
    /// The provider answered but nothing was close or fresh enough.
    NoNearbyData { candidates: usize },
    Unavailable {
        kind: ProviderErrorKind,
        code: &'static str,
        message: String,
        retryable: bool,
    },
    /// The matched point could not become a valid reading.
    Rejected { reason: String },
    NotRegistered,
}

impl AttemptOutcome {
    fn unavailable(error: &ProviderError) -> Self {
        Self::Unavailable {
            kind: error.kind(),
            code: error.code(),
            message: error.message().to_owned(),
            retryable: error.retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: ProviderId,
    pub tier: Tier,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

/// Result of consulting history after the providers were exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cache", rename_all = "snake_case")]
pub enum CacheOutcome {
    NotConsulted,
    Hit { age_secs: u64 },
    Stale { age_secs: u64 },
    Empty,
}

/// Everything one `resolve` call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub signal_kind: SignalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub state: CascadeState,
    pub reading: Option<Reading>,
    pub attempts: Vec<ProviderAttempt>,
    #[serde(flatten)]
    pub cache: CacheOutcome,
    pub resolved_at: UtcDateTime,
    pub latency_ms: u64,
}

impl Resolution {
    pub fn reading(&self) -> Option<&Reading> {
        self.reading.as_ref()
    }

    pub fn is_absent(&self) -> bool {
        self.reading.is_none()
    }

    /// Provider that produced the reading, if any.
    pub fn selected_provider(&self) -> Option<ProviderId> {
        self.reading
            .as_ref()
            .and_then(|reading| reading.provenance.provider())
    }
}

/// One row of a signal's provider chain, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub provider: ProviderId,
    pub tier: Tier,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
    pub timeout_ms: u64,
}

/// Stored samples of one signal with the trend they imply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    pub signal_kind: SignalKind,
    pub unit: &'static str,
    pub window_secs: u64,
    pub samples: Vec<StoredSample>,
    pub trend: Trend,
}

/// Builder for [`CascadeResolver`].
///
/// Without explicit sources the resolver has none; call
/// [`with_default_sources`](Self::with_default_sources) for the real adapters.
#[derive(Default)]
pub struct CascadeResolverBuilder {
    config: Option<ResolverConfig>,
    sources: Vec<Arc<dyn SignalSource>>,
    history: Option<HistoryStore>,
    clock: Option<Arc<dyn Clock>>,
}

impl CascadeResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn SignalSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Register every built-in adapter on a shared reqwest client.
    pub fn with_default_sources(self) -> Self {
        self.with_http_client(Arc::new(ReqwestHttpClient::new()))
    }

    /// Register every built-in adapter on `http_client`.
    pub fn with_http_client(self, http_client: Arc<dyn HttpClient>) -> Self {
        self.with_sources(default_sources(http_client))
    }

    /// Use this store instead of opening the configured backend.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and open history.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] for an invalid configuration or a history
    /// backend that cannot be opened.
    pub fn build(self) -> Result<CascadeResolver, CoreError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = match self.history {
            Some(store) => store,
            None => config.open_history()?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        // Later registrations replace earlier ones for the same provider.
        let sources = self
            .sources
            .into_iter()
            .map(|source| (source.id(), source))
            .collect();

        Ok(CascadeResolver {
            sources,
            history: SignalHistory::new(store, clock),
            config,
        })
    }
}

/// Generic resolver driven by one [`SignalConfig`] per kind.
pub struct CascadeResolver {
    sources: HashMap<ProviderId, Arc<dyn SignalSource>>,
    history: SignalHistory,
    config: ResolverConfig,
}

impl CascadeResolver {
    pub fn builder() -> CascadeResolverBuilder {
        CascadeResolverBuilder::new()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn history(&self) -> &SignalHistory {
        &self.history
    }

    /// Registered providers, sorted.
    pub fn registered_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.sources.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Provider chain configured for `kind`, with registration and circuit state.
    pub fn provider_chain(&self, kind: SignalKind) -> Vec<ChainEntry> {
        let Some(signal) = self.config.signal(kind) else {
            return Vec::new();
        };
        signal
            .providers
            .iter()
            .map(|spec| {
                let source = self.sources.get(&spec.provider);
                ChainEntry {
                    provider: spec.provider,
                    tier: spec.tier,
                    registered: source.is_some(),
                    circuit: source.map(|source| source.circuit_state()),
                    max_distance_km: spec.max_distance_km,
                    max_age_secs: spec.max_age.map(|age| age.as_secs()),
                    timeout_ms: duration_ms(spec.timeout),
                }
            })
            .collect()
    }

    /// Resolve one signal. Never fails; an absent reading is a normal outcome.
    pub async fn resolve(&self, kind: SignalKind, location: Option<GeoPoint>) -> Resolution {
        self.resolve_with_cancel(kind, location, &CancellationToken::new())
            .await
    }

    /// Resolve several signals one after another for a single digest.
    pub async fn resolve_all(
        &self,
        kinds: &[SignalKind],
        location: Option<GeoPoint>,
        cancel: &CancellationToken,
    ) -> Vec<Resolution> {
        let mut resolutions = Vec::with_capacity(kinds.len());
        for kind in kinds {
            resolutions.push(self.resolve_with_cancel(*kind, location, cancel).await);
        }
        resolutions
    }

    /// Like [`resolve`](Self::resolve); once `cancel` fires no further
    /// providers are tried but history is still consulted.
    pub async fn resolve_with_cancel(
        &self,
        kind: SignalKind,
        location: Option<GeoPoint>,
        cancel: &CancellationToken,
    ) -> Resolution {
        let started = Instant::now();
        let resolved_at = self.history.now();
        let target = location.filter(|_| kind.is_geo_scoped());

        let mut resolution = Resolution {
            signal_kind: kind,
            location: target,
            state: CascadeState::Exhausted,
            reading: None,
            attempts: Vec::new(),
            cache: CacheOutcome::NotConsulted,
            resolved_at,
            latency_ms: 0,
        };

        let Some(signal) = self.config.signal(kind) else {
            warn!(signal = %kind, "no cascade configured for signal");
            resolution.latency_ms = elapsed_ms(started);
            return resolution;
        };

        let mut state = if signal.providers.is_empty() {
            CascadeState::FallingBackToCache
        } else {
            CascadeState::TryingProvider(0)
        };

        while !state.is_terminal() {
            state = match state {
                CascadeState::TryingProvider(index) => {
                    match signal.providers.get(index) {
                        Some(_) if cancel.is_cancelled() => {
                            info!(signal = %kind, "resolution cancelled; skipping remaining providers");
                            CascadeState::FallingBackToCache
                        }
                        Some(spec) => {
                            let (attempt, reading) = self
                                .try_provider(kind, target, spec, signal, resolved_at, cancel)
                                .await;
                            resolution.attempts.push(attempt);
                            match reading {
                                Some(reading) => {
                                    resolution.reading = Some(reading);
                                    CascadeState::Succeeded
                                }
                                None => CascadeState::TryingProvider(index + 1),
                            }
                        }
                        None => CascadeState::FallingBackToCache,
                    }
                }
                CascadeState::FallingBackToCache => {
                    let (cache, reading) = self.fall_back_to_cache(kind, target, signal, resolved_at);
                    resolution.cache = cache;
                    match reading {
                        Some(reading) => {
                            resolution.reading = Some(reading);
                            CascadeState::Succeeded
                        }
                        None => CascadeState::Exhausted,
                    }
                }
                terminal => terminal,
            };
        }

        resolution.state = state;
        resolution.latency_ms = elapsed_ms(started);
        if resolution.is_absent() {
            warn!(
                signal = %kind,
                attempts = resolution.attempts.len(),
                "signal unavailable from every provider and history"
            );
        }
        resolution
    }

    /// Stored samples within `window` and the trend of the newest one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] when history cannot be read.
    pub fn history_report(
        &self,
        kind: SignalKind,
        window: Duration,
        location: Option<GeoPoint>,
    ) -> Result<HistoryReport, CoreError> {
        let signal = self.config.signal(kind);
        let nearby = signal.and_then(|signal| nearby_for(kind, location, signal));
        let samples = self.history.recent(kind, window, nearby)?;

        let trend = match (signal, samples.last()) {
            (Some(signal), Some(latest)) => {
                let values: Vec<f64> = samples.iter().map(|sample| sample.value).collect();
                trend::estimate(&values, latest.value, signal.trend_rule())
            }
            _ => Trend::Unknown,
        };

        Ok(HistoryReport {
            signal_kind: kind,
            unit: kind.unit(),
            window_secs: window.as_secs(),
            samples,
            trend,
        })
    }

    async fn try_provider(
        &self,
        kind: SignalKind,
        target: Option<GeoPoint>,
        spec: &ProviderSpec,
        signal: &SignalConfig,
        resolved_at: UtcDateTime,
        cancel: &CancellationToken,
    ) -> (ProviderAttempt, Option<Reading>) {
        let started = Instant::now();
        let provider = spec.provider;
        let attempt = |outcome: AttemptOutcome| ProviderAttempt {
            provider,
            tier: spec.tier,
            outcome,
            latency_ms: elapsed_ms(started),
        };

        let Some(source) = self.sources.get(&provider) else {
            warn!(signal = %kind, provider = %provider, "provider has no registered adapter");
            return (attempt(AttemptOutcome::NotRegistered), None);
        };
        if !source.kinds().contains(&kind) {
            let error = ProviderError::misconfigured(
                provider,
                format!("{provider} adapter does not serve {kind}"),
            );
            warn!(signal = %kind, provider = %provider, code = error.code(), "{}", error.message());
            return (attempt(AttemptOutcome::unavailable(&error)), None);
        }

        let mut request = FetchRequest::new(kind, target).with_timeout(spec.timeout);
        if let Some(endpoint) = &spec.endpoint {
            request = request.with_endpoint(endpoint.clone());
        }
        request.params.extend(
            spec.params
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        debug!(signal = %kind, provider = %provider, tier = ?spec.tier, "trying provider");
        let payload = match source.fetch(&request, cancel).await {
            Ok(payload) => payload,
            Err(error) => {
                if error.kind() == ProviderErrorKind::Cancelled {
                    info!(signal = %kind, provider = %provider, "provider call cancelled");
                } else {
                    warn!(
                        signal = %kind,
                        provider = %provider,
                        code = error.code(),
                        retryable = error.retryable(),
                        "provider unavailable: {}",
                        error.message()
                    );
                }
                return (attempt(AttemptOutcome::unavailable(&error)), None);
            }
        };

        let fetched_at = self.history.now();
        let criteria = MatchCriteria {
            target,
            max_distance_km: spec.max_distance_km,
            max_age: spec.max_age,
        };
        let Some(candidate) = matcher::select(&payload.points, criteria, fetched_at) else {
            info!(
                signal = %kind,
                provider = %provider,
                candidates = payload.points.len(),
                "no nearby fresh data"
            );
            return (
                attempt(AttemptOutcome::NoNearbyData {
                    candidates: payload.points.len(),
                }),
                None,
            );
        };

        let distance_km = candidate.distance_km;
        let sample = StoredSample {
            observed_at: candidate.observed_at,
            value: candidate.point.value,
            location: candidate.point.location.or(target),
        };
        let reading = match spec.tier {
            Tier::Live => Reading::live(kind, provider, sample.value, sample.observed_at),
            Tier::Snapshot => Reading::cached(
                kind,
                Provenance::Provider(provider),
                sample.value,
                sample.observed_at,
                resolved_at,
            ),
        }
        .and_then(|reading| reading.with_secondary(candidate.point.secondary));

        let reading = match reading {
            Ok(reading) => reading
                .with_location(sample.location)
                .with_distance_km(distance_km),
            Err(error) => {
                warn!(signal = %kind, provider = %provider, "matched point rejected: {error}");
                return (
                    attempt(AttemptOutcome::Rejected {
                        reason: error.to_string(),
                    }),
                    None,
                );
            }
        };

        if spec.tier == Tier::Live {
            if let Err(error) = self.history.append(kind, sample) {
                warn!(signal = %kind, provider = %provider, "history append failed, keeping live reading: {error}");
            }
        }

        let nearby = nearby_for(kind, target, signal);
        let trend = self.trend_for(kind, signal, nearby, &sample);
        debug!(
            signal = %kind,
            provider = %provider,
            value = sample.value,
            distance_km = ?distance_km,
            trend = trend.as_str(),
            "provider accepted"
        );
        (
            attempt(AttemptOutcome::Accepted { distance_km }),
            Some(reading.with_trend(trend)),
        )
    }

    fn fall_back_to_cache(
        &self,
        kind: SignalKind,
        target: Option<GeoPoint>,
        signal: &SignalConfig,
        resolved_at: UtcDateTime,
    ) -> (CacheOutcome, Option<Reading>) {
        let nearby = nearby_for(kind, target, signal);
        let latest = match self.history.latest(kind, nearby) {
            Ok(latest) => latest,
            Err(error) => {
                warn!(signal = %kind, "history unreadable, treating as empty: {error}");
                None
            }
        };
        let Some(sample) = latest else {
            info!(signal = %kind, "history has no sample to fall back on");
            return (CacheOutcome::Empty, None);
        };

        let age = sample.observed_at.age_at(resolved_at);
        let age_secs = age.as_secs();
        if age > signal.staleness_ceiling {
            info!(
                signal = %kind,
                age_secs,
                ceiling_secs = signal.staleness_ceiling.as_secs(),
                "cached sample is too old"
            );
            return (CacheOutcome::Stale { age_secs }, None);
        }

        let reading = Reading::cached(
            kind,
            Provenance::History,
            sample.value,
            sample.observed_at,
            resolved_at,
        );
        match reading {
            Ok(reading) => {
                let trend = self.trend_for(kind, signal, nearby, &sample);
                info!(signal = %kind, age_secs, trend = trend.as_str(), "serving cached sample");
                (
                    CacheOutcome::Hit { age_secs },
                    Some(reading.with_location(sample.location).with_trend(trend)),
                )
            }
            Err(error) => {
                warn!(signal = %kind, "cached sample unusable: {error}");
                (CacheOutcome::Empty, None)
            }
        }
    }

    /// Trend of `latest` against the samples inside the trend window.
    fn trend_for(
        &self,
        kind: SignalKind,
        signal: &SignalConfig,
        nearby: Option<Nearby>,
        latest: &StoredSample,
    ) -> Trend {
        let samples = match self.history.recent(kind, signal.trend_window, nearby) {
            Ok(samples) => samples,
            Err(error) => {
                warn!(signal = %kind, "history unreadable for trend: {error}");
                Vec::new()
            }
        };

        let mut values: Vec<f64> = samples
            .iter()
            .filter(|sample| sample.observed_at != latest.observed_at)
            .map(|sample| sample.value)
            .collect();
        values.push(latest.value);
        trend::estimate(&values, latest.value, signal.trend_rule())
    }
}

fn nearby_for(kind: SignalKind, target: Option<GeoPoint>, signal: &SignalConfig) -> Option<Nearby> {
    if !kind.is_geo_scoped() {
        return None;
    }
    Some(Nearby {
        target: target?,
        radius_km: signal.cache_radius_km?,
    })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}
