//! Request telemetry for the Axum stack.
//!
//! One tower layer covers both debug-level request logging and the proxy's
//! own metrics. Per-request bookkeeping lives in an [`Observation`] whose
//! drop releases the in-flight gauge, so a client that disconnects mid-fan-
//! out still leaves the gauge balanced.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use super::handlers::UpstreamTarget;
use super::metrics::Metrics;

/// Layer that wraps the router with logging and metrics collection.
#[derive(Clone)]
pub struct TelemetryLayer {
    metrics: Arc<Metrics>,
}

impl TelemetryLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// Service produced by [`TelemetryLayer`].
#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

/// One request's worth of bookkeeping.
///
/// Construction bumps the in-flight gauge and logs the request; counters
/// and the latency histogram are recorded only when a response actually
/// materializes. The gauge is released on drop, which also covers request
/// futures that are cancelled before completing.
struct Observation {
    metrics: Arc<Metrics>,
    method: String,
    endpoint: String,
    uri: String,
    started: Instant,
}

impl Observation {
    fn begin(metrics: &Arc<Metrics>, request: &Request<Body>) -> Self {
        metrics.http_requests_in_flight.inc();
        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            "HTTP request received"
        );
        Self {
            metrics: metrics.clone(),
            method: request.method().as_str().to_string(),
            endpoint: normalize_endpoint(request.uri().path()),
            uri: request.uri().to_string(),
            started: Instant::now(),
        }
    }

    fn complete(&self, status: u16) {
        let elapsed = self.started.elapsed();
        self.metrics
            .observe_request(&self.method, &self.endpoint, status, elapsed.as_secs_f64());
        tracing::debug!(
            method = %self.method,
            uri = %self.uri,
            status,
            duration_ms = %elapsed.as_millis(),
            "HTTP request completed"
        );
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.metrics.http_requests_in_flight.dec();
    }
}

impl<S, ResBody> Service<Request<Body>> for TelemetryService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ResBody: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let observation = Observation::begin(&self.metrics, &request);
        let inner = self.inner.call(request);
        Box::pin(async move {
            let response = inner.await?;
            observation.complete(response.status().as_u16());
            Ok(response)
        })
    }
}

/// Normalize endpoint paths to avoid high cardinality: the upstream prefix
/// collapses to `:target` and label names to `:name`.
fn normalize_endpoint(path: &str) -> String {
    match UpstreamTarget::from_path(path) {
        Some(target) => {
            let tail = if target.tail.starts_with("/api/v1/label/") && target.tail.ends_with("/values")
            {
                "/api/v1/label/:name/values"
            } else {
                target.tail.as_str()
            };
            format!("/:target{tail}")
        }
        None => path.to_string(),
    }
}
