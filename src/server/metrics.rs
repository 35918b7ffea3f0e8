//! Prometheus metrics for the proxy itself.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for completed requests. The method label carries the HTTP method
/// name as-is; endpoints are normalized before they get here.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub endpoint: String,
    pub status: u16,
}

/// Labels for the latency histogram, which stays per-endpoint only to keep
/// series counts down.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: String,
}

/// Container for all Prometheus metrics.
pub struct Metrics {
    registry: Registry,

    /// Counter of HTTP requests by method, endpoint and status.
    pub http_requests_total: Family<RequestLabels, Counter>,

    /// Request latency by endpoint.
    pub http_request_duration_seconds: Family<EndpointLabels, Histogram>,

    /// Requests currently being handled.
    pub http_requests_in_flight: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // the text encoder appends the _total suffix for counters
        let http_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "chronotheus_http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "chronotheus_http_request_duration_seconds",
            "HTTP request latency",
            http_request_duration_seconds.clone(),
        );

        let http_requests_in_flight = Gauge::default();
        registry.register(
            "chronotheus_http_requests_in_flight",
            "Number of requests currently being handled",
            http_requests_in_flight.clone(),
        );

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
        }
    }

    /// Record one completed request.
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        self.http_requests_total
            .get_or_create(&RequestLabels {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                status,
            })
            .inc();
        self.http_request_duration_seconds
            .get_or_create(&EndpointLabels {
                endpoint: endpoint.to_string(),
            })
            .observe(seconds);
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("metrics encoding cannot fail");
        buffer
    }
}
