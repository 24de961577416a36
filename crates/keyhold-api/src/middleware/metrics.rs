//! Request metrics middleware.
//!
//! Emits through the `metrics` facade:
//!
//! - `keyhold_http_requests_total` (counter; method, route, status_class)
//! - `keyhold_http_request_duration_seconds` (histogram; same labels)
//!
//! The route label is the matched route pattern (`/:collection/:id`), so ids
//! never become label values. Unmatched requests are labelled `unmatched`.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    extract::MatchedPath,
    http::{Request, Response},
};
use tower::{Layer, Service};

/// Route label for requests no route matched.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Request counters.
///
/// Every recorded request goes to the metrics facade and to a set of atomic
/// counters the tests read back.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests: AtomicU64,
    success: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    total_duration_us: AtomicU64,
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, route: &str, status: u16, duration_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration_us, Ordering::Relaxed);

        let class = status_class(status);
        match class {
            "2xx" => self.success.fetch_add(1, Ordering::Relaxed),
            "4xx" => self.client_errors.fetch_add(1, Ordering::Relaxed),
            "5xx" => self.server_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };

        let labels = [
            ("method", method.to_string()),
            ("route", route.to_string()),
            ("status_class", class.to_string()),
        ];
        metrics::counter!("keyhold_http_requests_total", &labels).increment(1);
        metrics::histogram!("keyhold_http_request_duration_seconds", &labels)
            .record(duration_us as f64 / 1_000_000.0);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn client_error_count(&self) -> u64 {
        self.client_errors.load(Ordering::Relaxed)
    }

    pub fn server_error_count(&self) -> u64 {
        self.server_errors.load(Ordering::Relaxed)
    }

    /// Mean request duration in microseconds, 0 before the first request.
    pub fn avg_duration_us(&self) -> u64 {
        match self.request_count() {
            0 => 0,
            n => self.total_duration_us.load(Ordering::Relaxed) / n,
        }
    }
}

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Arc<RequestMetrics>,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Arc<RequestMetrics>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = request.method().to_string();
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
        let metrics = Arc::clone(&self.metrics);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(request).await?;
            let status = response.status().as_u16();
            metrics.record(&method, &route, status, start.elapsed().as_micros() as u64);
            Ok(response)
        })
    }
}
