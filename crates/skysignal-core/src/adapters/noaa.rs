use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapters::HttpFetcher;
use crate::circuit_breaker::CircuitState;
use crate::data_source::{
    FetchFuture, FetchRequest, ProviderError, RawPayload, RawPoint, SignalSource,
};
use crate::http_client::{HttpClient, HttpRequest};
use crate::{ProviderId, SignalKind, UtcDateTime};

const KINDS: &[SignalKind] = &[SignalKind::KIndex];

/// NOAA SWPC planetary K-index (3-hourly Kp).
///
/// Every valid row becomes a point; the matcher keeps the most recent one.
#[derive(Clone)]
pub struct NoaaKpAdapter {
    fetcher: HttpFetcher,
}

impl NoaaKpAdapter {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://services.swpc.noaa.gov/products/noaa-planetary-k-index.json";

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_fetcher(HttpFetcher::new(ProviderId::NoaaSwpc, http_client))
    }

    pub fn with_fetcher(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

impl SignalSource for NoaaKpAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::NoaaSwpc
    }

    fn kinds(&self) -> &[SignalKind] {
        KINDS
    }

    fn fetch<'a>(&'a self, request: &'a FetchRequest, cancel: &'a CancellationToken) -> FetchFuture<'a> {
        Box::pin(async move {
            let rows: Vec<Value> = self
                .fetcher
                .get_json(
                    HttpRequest::get(request.endpoint_or(Self::DEFAULT_ENDPOINT)),
                    request.timeout,
                    cancel,
                )
                .await?;
            normalize(rows)
        })
    }

    fn circuit_state(&self) -> CircuitState {
        self.fetcher.circuit_state()
    }
}

/// Column positions in the table form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    time_tag: usize,
    kp: usize,
}

impl Default for Columns {
    fn default() -> Self {
        Self { time_tag: 0, kp: 1 }
    }
}

impl Columns {
    /// Locate the columns from a header row such as `["time_tag", "Kp", ...]`.
    fn from_header(header: &[Value]) -> Option<Self> {
        let position = |wanted: &str| {
            header.iter().position(|cell| {
                cell.as_str()
                    .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
            })
        };
        let time_tag = position("time_tag")?;
        let kp = position("kp")?;
        Some(Self { time_tag, kp })
    }
}

/// Accepts the table form (`[[header...], [row...], ...]`) and a list of
/// `{"time_tag", "Kp"}` objects.
fn normalize(rows: Vec<Value>) -> Result<RawPayload, ProviderError> {
    let mut columns = Columns::default();
    let mut points = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let parsed = match row {
            Value::Array(cells) => {
                if index == 0 {
                    if let Some(header) = Columns::from_header(cells) {
                        columns = header;
                        continue;
                    }
                }
                point_from_cells(cells.get(columns.time_tag), cells.get(columns.kp))
            }
            Value::Object(fields) => {
                let kp = fields.get("Kp").or_else(|| fields.get("kp"));
                point_from_cells(fields.get("time_tag"), kp)
            }
            _ => None,
        };
        points.extend(parsed);
    }

    if points.is_empty() && !rows.is_empty() && rows.iter().all(|row| !row.is_array() && !row.is_object()) {
        return Err(ProviderError::malformed(
            ProviderId::NoaaSwpc,
            "noaa_swpc payload has no rows",
        ));
    }
    Ok(RawPayload::new(points))
}

fn point_from_cells(time_tag: Option<&Value>, kp: Option<&Value>) -> Option<RawPoint> {
    let observed_at = UtcDateTime::parse_naive_utc(time_tag?.as_str()?).ok()?;
    let kp = match kp? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    kp.is_finite()
        .then(|| RawPoint::new(kp).observed_at(observed_at))
}
