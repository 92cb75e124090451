use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapters::{decode_entries, lenient_f64};
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::{GeoPoint, ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::Radiation];

/// Reads the snapshot file an external Safecast collector writes.
///
/// The file path comes from the provider's `endpoint`. Entries without a
/// timestamp are dropped because the snapshot can be arbitrarily old.
#[derive(Debug, Clone, Default)]
pub struct SafecastSnapshotAdapter;

impl SafecastSnapshotAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl SignalSource for SafecastSnapshotAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Safecast
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let provider = ProviderId::Safecast;
            let Some(path) = request.endpoint.as_deref() else {
                return Err(ProviderError::misconfigured(
                    provider,
                    "safecast snapshot needs an endpoint file path",
                ));
            };

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(provider)),
                read = tokio::time::timeout(request.timeout, tokio::fs::read_to_string(path)) => read,
            };
            let text = match read {
                Ok(Ok(text)) => text,
                Ok(Err(error)) => {
                    return Err(ProviderError::transport(
                        provider,
                        format!("snapshot {path} is not readable: {error}"),
                    )
                    .with_retryable(false))
                }
                Err(_) => return Err(ProviderError::timeout(provider, request.timeout)),
            };

            parse_snapshot(&text)
        })
    }
}

/// Either a bare list or an object wrapping the list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    List(Vec<serde_json::Value>),
    Wrapped(WrappedSnapshot),
}

#[derive(Debug, Deserialize)]
struct WrappedSnapshot {
    history: Option<Vec<serde_json::Value>>,
    items: Option<Vec<serde_json::Value>>,
    data: Option<Vec<serde_json::Value>>,
}

impl SnapshotDocument {
    fn into_entries(self) -> Vec<serde_json::Value> {
        match self {
            Self::List(entries) => entries,
            // Precedence: history, then items, then data.
            Self::Wrapped(wrapped) => wrapped
                .history
                .or(wrapped.items)
                .or(wrapped.data)
                .unwrap_or_default(),
        }
    }
}

/// Collectors disagree on field names, so every spelling is its own field.
///
/// Precedence: `lat` over `latitude`, `lon` over `longitude`, `ts` over
/// `timestamp` (unix seconds), and for the dose rate `uSv_h`, `usv_h`,
/// `value`, `val`, then `dose`.
#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    timestamp: Option<f64>,
    #[serde(default, rename = "uSv_h", deserialize_with = "lenient_f64")]
    usv_h_camel: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    usv_h: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    val: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    dose: Option<f64>,
}

impl SnapshotEntry {
    fn into_point(self) -> Option<RawPoint> {
        let location = GeoPoint::new(self.lat.or(self.latitude)?, self.lon.or(self.longitude)?).ok()?;
        let observed_at = UtcDateTime::from_unix_seconds(self.ts.or(self.timestamp)?).ok()?;
        let dose_rate = self
            .usv_h_camel
            .or(self.usv_h)
            .or(self.value)
            .or(self.val)
            .or(self.dose)?;
        Some(RawPoint::new(dose_rate).observed_at(observed_at).at(location))
    }
}

fn parse_snapshot(text: &str) -> Result<RawPayload, ProviderError> {
    if text.trim().is_empty() {
        return Ok(RawPayload::default());
    }

    let document: SnapshotDocument = serde_json::from_str(text).map_err(|error| {
        ProviderError::malformed(ProviderId::Safecast, format!("safecast snapshot: {error}"))
    })?;

    let points = decode_entries::<SnapshotEntry>(ProviderId::Safecast, document.into_entries())
        .into_iter()
        .filter_map(SnapshotEntry::into_point)
        .collect();
    Ok(RawPayload::new(points))
}
