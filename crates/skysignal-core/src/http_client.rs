use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// GET request envelope used by adapter transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            timeout_ms: 15_000,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// URL with the query parameters percent-encoded and appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }

        let encoded = self
            .query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{encoded}", self.url)
    }

    /// Full URL with the values of the named query parameters masked, for logs.
    pub fn redacted_url(&self, secret_params: &[&str]) -> String {
        let mut redacted = self.clone();
        for (name, value) in &mut redacted.query {
            if secret_params.contains(&name.as_str()) {
                *value = String::from("***");
            }
        }
        redacted.full_url()
    }
}

/// HTTP response envelope returned by an adapter transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Connect, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Other, message)
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Adapter transport contract.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// Production HTTP client backed by reqwest with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("skysignal/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let mut builder = self
                .client
                .get(&request.url)
                .query(&request.query)
                .timeout(Duration::from_millis(request.timeout_ms));

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|error| {
                // reqwest includes the URL in its message; drop it so keys never leak.
                let error = error.without_url();
                if error.is_timeout() {
                    HttpError::timeout(format!("request timeout: {error}"))
                } else if error.is_connect() {
                    HttpError::connect(format!("connection failed: {error}"))
                } else {
                    HttpError::other(format!("request failed: {error}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|error| {
                let error = error.without_url();
                if error.is_timeout() {
                    HttpError::timeout(format!("response body timeout: {error}"))
                } else {
                    HttpError::other(format!("failed to read response body: {error}"))
                }
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

type StaticOutcome = Result<HttpResponse, HttpError>;

struct StaticRoute {
    prefix: String,
    outcomes: VecDeque<StaticOutcome>,
}

/// Offline transport serving canned outcomes by URL prefix.
///
/// Each route holds a queue of outcomes; the last one repeats once the
/// others are consumed. Unknown URLs answer 404. Every request is recorded.
#[derive(Default)]
pub struct StaticHttpClient {
    routes: Mutex<Vec<StaticRoute>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(self, prefix: impl Into<String>, body: impl Into<String>) -> Self {
        self.with_outcome(prefix, Ok(HttpResponse::ok_json(body)))
    }

    pub fn with_status(self, prefix: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        self.with_outcome(prefix, Ok(HttpResponse::new(status, body)))
    }

    pub fn with_error(self, prefix: impl Into<String>, error: HttpError) -> Self {
        self.with_outcome(prefix, Err(error))
    }

    /// Queue another outcome for `prefix`, creating the route if needed.
    pub fn with_outcome(self, prefix: impl Into<String>, outcome: StaticOutcome) -> Self {
        let prefix = prefix.into();
        {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            match routes.iter_mut().find(|route| route.prefix == prefix) {
                Some(route) => route.outcomes.push_back(outcome),
                None => routes.push(StaticRoute {
                    prefix,
                    outcomes: VecDeque::from([outcome]),
                }),
            }
        }
        self
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_outcome(&self, url: &str) -> StaticOutcome {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .iter_mut()
            .filter(|route| url.starts_with(route.prefix.as_str()))
            .max_by_key(|route| route.prefix.len());

        let Some(route) = route else {
            return Ok(HttpResponse::new(404, format!("no static route for {url}")));
        };
        if route.outcomes.len() > 1 {
            if let Some(outcome) = route.outcomes.pop_front() {
                return outcome;
            }
        }
        route
            .outcomes
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "empty static route")))
    }
}

impl HttpClient for StaticHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let url = request.full_url();
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.next_outcome(&url)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_encodes_query_parameters() {
        let request = HttpRequest::get("https://api.frankfurter.app/latest")
            .with_query("from", "EUR")
            .with_query("to", "USD,RUB");
        assert_eq!(
            request.full_url(),
            "https://api.frankfurter.app/latest?from=EUR&to=USD%2CRUB"
        );

        let existing = HttpRequest::get("https://radmon.org/radmon.php?format=json")
            .with_query("x", "1");
        assert_eq!(existing.full_url(), "https://radmon.org/radmon.php?format=json&x=1");
    }

    #[test]
    fn redacted_url_masks_secrets() {
        let request = HttpRequest::get("https://api.airvisual.com/v2/nearest_city")
            .with_query("lat", "34.7")
            .with_query("key", "secret-key");
        let redacted = request.redacted_url(&["key"]);
        assert!(redacted.ends_with("key=%2A%2A%2A"));
        assert!(!redacted.contains("secret-key"));
    }

    #[tokio::test]
    async fn static_client_replays_queue_then_repeats_last() {
        let client = StaticHttpClient::new()
            .with_status("https://example.test/", 503, "busy")
            .with_json("https://example.test/", "{\"ok\":true}");

        let first = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");
        let second = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");
        let third = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");
        let unknown = client
            .execute(HttpRequest::get("https://other.test/"))
            .await
            .expect("response");

        assert_eq!(first.status, 503);
        assert!(second.is_success());
        assert!(third.is_success());
        assert_eq!(unknown.status, 404);
        assert_eq!(client.request_count(), 4);
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let client = StaticHttpClient::new()
            .with_json("https://api.open-meteo.com/", "{\"generic\":true}")
            .with_json("https://api.open-meteo.com/v1/air", "{\"air\":true}");

        let response = client
            .execute(HttpRequest::get("https://api.open-meteo.com/v1/air-quality"))
            .await
            .expect("response");
        assert_eq!(response.body, "{\"air\":true}");
    }
}
