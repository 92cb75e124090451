//! Provider adapter contract and its request/response types.
//!
//! A [`SignalSource`] turns one upstream API into a list of [`RawPoint`]s.
//! It does not pick a station or decide freshness; that is the matcher's job.
//!
//! | Failure | Kind | Retryable |
//! |---------|------|-----------|
//! | DNS/TLS/connection error | [`ProviderErrorKind::Transport`] | yes |
//! | Non-2xx answer | [`ProviderErrorKind::Status`] | 408/429/5xx only |
//! | Attempt exceeded its timeout | [`ProviderErrorKind::Timeout`] | yes |
//! | Body does not match the payload mapping | [`ProviderErrorKind::Malformed`] | no |
//! | Resolution cancelled | [`ProviderErrorKind::Cancelled`] | no |
//! | Too many recent failures | [`ProviderErrorKind::CircuitOpen`] | no |
//! | Missing API key or bad params | [`ProviderErrorKind::Misconfigured`] | no |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitState;
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime};

/// Everything an adapter needs for one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub kind: SignalKind,
    pub location: Option<GeoPoint>,
    pub timeout: Duration,
    /// Overrides the adapter's built-in URL (or file path for snapshots).
    pub endpoint: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(kind: SignalKind, location: Option<GeoPoint>) -> Self {
        Self {
            kind,
            location,
            timeout: Duration::from_secs(15),
            endpoint: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn endpoint_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.endpoint.as_deref().unwrap_or(default)
    }
}

/// One candidate observation before geo/time matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub value: f64,
    pub secondary: Option<f64>,
    pub observed_at: Option<UtcDateTime>,
    pub location: Option<GeoPoint>,
}

impl RawPoint {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            secondary: None,
            observed_at: None,
            location: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Option<f64>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn observed_at(mut self, observed_at: UtcDateTime) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    pub fn at(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// Points returned by one successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPayload {
    pub points: Vec<RawPoint>,
}

impl RawPayload {
    pub fn new(points: Vec<RawPoint>) -> Self {
        Self { points }
    }

    pub fn single(point: RawPoint) -> Self {
        Self::new(vec![point])
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Transport,
    Status,
    Timeout,
    Malformed,
    Cancelled,
    CircuitOpen,
    Misconfigured,
}

/// Structured adapter failure; the cascade records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    provider: ProviderId,
    message: String,
    retryable: bool,
    status: Option<u16>,
}

impl ProviderError {
    fn build(kind: ProviderErrorKind, provider: ProviderId, message: String, retryable: bool) -> Self {
        Self {
            kind,
            provider,
            message,
            retryable,
            status: None,
        }
    }

    pub fn transport(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::build(ProviderErrorKind::Transport, provider, message.into(), true)
    }

    pub fn status(provider: ProviderId, status: u16, retryable: bool) -> Self {
        Self {
            status: Some(status),
            ..Self::build(
                ProviderErrorKind::Status,
                provider,
                format!("{provider} returned status {status}"),
                retryable,
            )
        }
    }

    pub fn timeout(provider: ProviderId, after: Duration) -> Self {
        Self::build(
            ProviderErrorKind::Timeout,
            provider,
            format!("{provider} did not answer within {} ms", after.as_millis()),
            true,
        )
    }

    pub fn malformed(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::build(ProviderErrorKind::Malformed, provider, message.into(), false)
    }

    pub fn cancelled(provider: ProviderId) -> Self {
        Self::build(
            ProviderErrorKind::Cancelled,
            provider,
            format!("{provider} call cancelled"),
            false,
        )
    }

    pub fn circuit_open(provider: ProviderId) -> Self {
        Self::build(
            ProviderErrorKind::CircuitOpen,
            provider,
            format!("{provider} circuit breaker is open; skipping upstream call"),
            false,
        )
    }

    pub fn misconfigured(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::build(ProviderErrorKind::Misconfigured, provider, message.into(), false)
    }

    /// Override the retry classification, e.g. when a policy disables timeout retries.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn http_status(&self) -> Option<u16> {
        self.status
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::Transport => "provider.transport",
            ProviderErrorKind::Status => "provider.status",
            ProviderErrorKind::Timeout => "provider.timeout",
            ProviderErrorKind::Malformed => "provider.malformed",
            ProviderErrorKind::Cancelled => "provider.cancelled",
            ProviderErrorKind::CircuitOpen => "provider.circuit_open",
            ProviderErrorKind::Misconfigured => "provider.misconfigured",
        }
    }

    /// Whether this failure should count against the adapter's circuit breaker.
    pub const fn trips_breaker(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Transport | ProviderErrorKind::Status | ProviderErrorKind::Timeout
        )
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<RawPayload, ProviderError>> + Send + 'a>>;

/// Adapter contract every provider implements.
pub trait SignalSource: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Signal kinds this adapter can serve.
    fn kinds(&self) -> &[SignalKind];

    /// Fetch raw points for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] for any transport, status, timeout or
    /// payload failure, and [`ProviderErrorKind::Cancelled`] once `cancel`
    /// fires. Implementations never panic on upstream data.
    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a>;

    /// Upstream circuit state, for the `sources` listing.
    fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }
}
