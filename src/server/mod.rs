//! HTTP server for the Chronotheus proxy.
//!
//! Exposes the query fan-out engine behind the Prometheus v1 surface,
//! plus the proxy's own `/metrics` and `/-/healthy` endpoints.

mod config;
mod error;
mod handlers;
mod metrics;
mod middleware;
mod response;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

pub use config::CliArgs;
pub use handlers::AppState;
pub use response::{LabelValuesResponse, MatrixSeries, QueryData, QueryResponse, VectorSeries};

use crate::error::Result;
use crate::upstream::Upstream;
use crate::Engine;
use metrics::Metrics;

/// Build the proxy application.
///
/// Every path except the reserved local endpoints is dispatched by its
/// `/<host>_<port>` prefix.
pub fn build_app() -> Result<Router> {
    let metrics = Arc::new(Metrics::new());
    let engine = Engine::new(Upstream::new()?);
    let state = AppState {
        engine,
        metrics: metrics.clone(),
    };

    Ok(Router::new()
        .route("/metrics", get(handlers::handle_metrics))
        .route("/-/healthy", get(handlers::handle_healthy))
        .fallback(handlers::dispatch)
        .layer(middleware::TelemetryLayer::new(metrics))
        .with_state(state))
}
