//! # Skysignal Core
//!
//! Resilient multi-source resolver for environmental and astronomical
//! signals: radiation, Schumann resonance, air quality, pollen, sea
//! temperature, geomagnetic K-index and currency rates.
//!
//! Each signal has an ordered cascade of providers. The resolver tries them
//! in turn, keeps the nearest fresh observation from the first provider that
//! has one, records it in history and attaches a trend. When every provider
//! fails it serves the newest stored sample that is still within the
//! staleness ceiling, or reports the signal as absent.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters and the shared HTTP fetcher |
//! | [`circuit_breaker`] | Per-adapter circuit breaker |
//! | [`clock`] | Wall-clock abstraction (`SystemClock`, `ManualClock`) |
//! | [`config`] | Cascades, thresholds, history settings and TOML overrides |
//! | [`data_source`] | `SignalSource` trait and request/payload/error types |
//! | [`domain`] | Signal kinds, coordinates, readings, timestamps |
//! | [`error`] | Core error types |
//! | [`history`] | Signal-level view over the history store |
//! | [`http_client`] | HTTP client abstraction |
//! | [`matcher`] | Geo/time selection of provider points |
//! | [`resolver`] | Cascade state machine |
//! | [`retry`] | Retry policy for upstream calls |
//! | [`source`] | Provider identifiers |
//! | [`trend`] | Trend classification |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skysignal_core::{CascadeResolver, GeoPoint, ResolverConfig, SignalKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = CascadeResolver::builder()
//!         .with_config(ResolverConfig::default())
//!         .with_default_sources()
//!         .build()?;
//!
//!     let limassol = GeoPoint::new(34.68, 33.04)?;
//!     let resolution = resolver.resolve(SignalKind::Radiation, Some(limassol)).await;
//!     if let Some(reading) = resolution.reading() {
//!         println!("{} {} ({})", reading.value, reading.unit(), reading.trend.as_str());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  CLI / digest    │
//! └────────┬─────────┘
//!          │ resolve(kind, location)
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Cascade Resolver │────▶│ History Store    │
//! └────────┬─────────┘     │ (JSON / DuckDB)  │
//!          │               └──────────────────┘
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Signal Source    │────▶│ HTTP Client      │
//! │ (Adapter Trait)  │     │ + retry/breaker  │
//! └────────┬─────────┘     └──────────────────┘
//!          │ raw points
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Geo/Time Matcher │     │ Trend Estimator  │
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Resolution never fails: provider failures are recorded per attempt and an
//! absent reading is a normal outcome. Building a resolver can fail with
//! [`CoreError`], and adapters report structured [`ProviderError`]s:
//!
//! ```rust
//! use skysignal_core::{ProviderError, ProviderErrorKind};
//!
//! fn describe(error: &ProviderError) -> &'static str {
//!     match error.kind() {
//!         ProviderErrorKind::Timeout | ProviderErrorKind::Transport => "upstream down",
//!         ProviderErrorKind::CircuitOpen => "upstream skipped",
//!         ProviderErrorKind::Misconfigured => "fix configuration",
//!         _ => "upstream error",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables named in provider params
//! - Secret query parameters are masked in log output
//! - All HTTP requests use TLS via rustls

pub mod adapters;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod history;
pub mod http_client;
pub mod matcher;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod trend;

// Adapter implementations
pub use adapters::{
    default_sources, AirVisualAdapter, CbrRatesAdapter, EcbRatesAdapter, EurdepAdapter,
    FxRateAdapter, HttpFetcher, NoaaKpAdapter, OpenMeteoAdapter, RadmonAdapter,
    SafecastSnapshotAdapter, SchumannAdapter,
};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use clock::{Clock, ManualClock, SystemClock};

// Configuration
pub use config::{
    resolve_skysignal_home, HistoryBackendKind, HistorySettings, ProviderSpec, ResolverConfig,
    SignalConfig, Tier,
};

// Data source trait and types
pub use data_source::{
    FetchRequest, ProviderError, ProviderErrorKind, RawPayload, RawPoint, SignalSource,
};

// Domain models
pub use domain::{
    haversine_km, GeoPoint, Provenance, Reading, SignalKind, UtcDateTime, EARTH_RADIUS_KM,
};

// Error types
pub use error::{CoreError, ValidationError};

// History (store types re-exported from skysignal-history)
pub use history::{Nearby, SignalHistory, StoredSample};
pub use skysignal_history::{HistoryConfig, HistoryError, HistoryStore};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
    StaticHttpClient,
};

pub use matcher::{Candidate, MatchCriteria};

// Resolver
pub use resolver::{
    AttemptOutcome, CacheOutcome, CascadeResolver, CascadeResolverBuilder, CascadeState,
    ChainEntry, HistoryReport, ProviderAttempt, Resolution,
};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Source identifiers
pub use source::ProviderId;

pub use trend::{Trend, TrendBaseline, TrendRule};
