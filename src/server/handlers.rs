//! HTTP route handlers for the proxy.
//!
//! The outermost dispatcher peels the upstream address off the path prefix
//! (`/<host>_<port>/…`), then routes the tail: query endpoints run the
//! fan-out engine, the label surface advertises the synthetic labels, and
//! everything else is forwarded opaquely.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use super::error::ApiError;
use super::metrics::Metrics;
use super::response::{LabelValuesResponse, series_to_response};
use crate::matchers::strip_label_from_param;
use crate::model::{COMMAND_LABEL, COMMAND_OVERRIDE, Shape, TIMEFRAME_LABEL, Timeframe};
use crate::params::Params;
use crate::Engine;

/// Largest request body the proxy will buffer.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub metrics: Arc<Metrics>,
}

/// An upstream address peeled off the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpstreamTarget {
    pub base: String,
    pub tail: String,
}

impl UpstreamTarget {
    /// Parse a `/<host>_<port>/…` prefix. The host may not contain `_` or
    /// `/`; the port is decimal digits. A bare prefix gets tail `/`.
    pub(crate) fn from_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let (first, tail) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let (host, port) = first.rsplit_once('_')?;
        if host.is_empty() || host.contains('_') {
            return None;
        }
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            base: format!("http://{host}:{port}"),
            tail: if tail.is_empty() { "/".to_string() } else { tail.to_string() },
        })
    }
}

/// Route a request by its path prefix and tail.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let uri = req.uri().clone();
    let Some(target) = UpstreamTarget::from_path(uri.path()) else {
        return ApiError::from("invalid target prefix").into_response();
    };
    let method = req.method().clone();
    let query = uri.query().map(str::to_owned);
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = axum::body::to_bytes(req.into_body(), BODY_LIMIT)
        .await
        .unwrap_or_default();

    if method != Method::GET && method != Method::POST {
        return forward(&state, &target, &method, query.as_deref(), body).await;
    }

    match target.tail.as_str() {
        "/api/v1/query" => {
            handle_query(&state, &target, query.as_deref(), content_type.as_deref(), &body, Shape::Instant).await
        }
        "/api/v1/query_range" => {
            handle_query(&state, &target, query.as_deref(), content_type.as_deref(), &body, Shape::Range).await
        }
        "/api/v1/labels" => {
            handle_labels(&state, &target, query.as_deref(), content_type.as_deref(), &body).await
        }
        tail => {
            if let Some(name) = label_values_name(tail) {
                let name = name.to_string();
                handle_label_values(&state, &target, &name, query.as_deref(), content_type.as_deref(), &body)
                    .await
            } else {
                forward(&state, &target, &method, query.as_deref(), body).await
            }
        }
    }
}

/// Handle /api/v1/query and /api/v1/query_range through the fan-out engine.
async fn handle_query(
    state: &AppState,
    target: &UpstreamTarget,
    query: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
    shape: Shape,
) -> Response {
    let params = match Params::assemble(query, content_type, body) {
        Ok(params) => params,
        Err(e) => return ApiError(e).into_response(),
    };
    let endpoint = format!("{}{}", target.base, target.tail);
    let series = state.engine.query(&endpoint, params, shape).await;
    tracing::debug!(series = series.len(), "query handled");
    Json(series_to_response(shape, series)).into_response()
}

/// Handle /api/v1/labels: proxy after stripping synthetic matchers, then
/// make sure the synthetic label names are advertised in the result.
async fn handle_labels(
    state: &AppState,
    target: &UpstreamTarget,
    query: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Response {
    let mut params = Params::assemble(query, content_type, body).unwrap_or_default();
    strip_synthetic_matchers(&mut params);

    let url = format!("{}{}?{}", target.base, target.tail, params.to_query_string());
    let upstream = match state.engine.upstream().get_json(&url).await {
        Ok(value) => value,
        Err(e) => return ApiError(e).into_response(),
    };

    let mut out = match upstream {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    let mut data = match out.remove("data") {
        Some(Value::Array(items)) => items,
        _ => {
            out.insert("status".to_string(), Value::String("success".to_string()));
            Vec::new()
        }
    };
    for label in [TIMEFRAME_LABEL, COMMAND_LABEL] {
        if !data.iter().any(|v| v.as_str() == Some(label)) {
            data.push(Value::String(label.to_string()));
        }
    }
    out.insert("data".to_string(), Value::Array(data));

    Json(Value::Object(out)).into_response()
}

/// Handle /api/v1/label/<name>/values: the two synthetic names are answered
/// locally without an upstream call; everything else proxies through.
async fn handle_label_values(
    state: &AppState,
    target: &UpstreamTarget,
    name: &str,
    query: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Response {
    match name {
        TIMEFRAME_LABEL => {
            let names = Timeframe::ALL.iter().map(|tf| tf.as_str().to_string()).collect();
            return Json(LabelValuesResponse::success(names)).into_response();
        }
        COMMAND_LABEL => {
            let values = vec![String::new(), COMMAND_OVERRIDE.to_string()];
            return Json(LabelValuesResponse::success(values)).into_response();
        }
        _ => {}
    }

    let mut params = Params::assemble(query, content_type, body).unwrap_or_default();
    strip_synthetic_matchers(&mut params);

    let url = format!("{}{}?{}", target.base, target.tail, params.to_query_string());
    match state.engine.upstream().get_raw(&url).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Opaque pass-through for everything the engine does not own.
async fn forward(
    state: &AppState,
    target: &UpstreamTarget,
    method: &Method,
    query: Option<&str>,
    body: Bytes,
) -> Response {
    let url = match query {
        Some(q) => format!("{}{}?{}", target.base, target.tail, q),
        None => format!("{}{}", target.base, target.tail),
    };
    tracing::debug!(method = %method, url = %url, "forwarding request");

    let upstream = match state
        .engine
        .upstream()
        .forward(method.as_str(), &url, body.to_vec())
        .await
    {
        Ok(response) => response,
        Err(e) => return ApiError(e).into_response(),
    };

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }
    }
    let bytes = upstream.bytes().await.unwrap_or_default();
    response
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Connection-scoped headers that must not be relayed. Content-length is
/// recomputed from the buffered body.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

/// Remove both synthetic labels from every `match[]` entry, dropping
/// entries that end up empty so the upstream never sees them.
fn strip_synthetic_matchers(params: &mut Params) {
    params.remap_match();
    strip_label_from_param(params, "match[]", TIMEFRAME_LABEL);
    strip_label_from_param(params, "match[]", COMMAND_LABEL);
    let remaining: Vec<String> = params
        .get_all("match[]")
        .iter()
        .filter(|v| !v.is_empty())
        .cloned()
        .collect();
    params.set_all("match[]", remaining);
}

/// The label name in a `/api/v1/label/<name>/values` tail.
fn label_values_name(tail: &str) -> Option<&str> {
    let rest = tail.strip_prefix("/api/v1/label/")?;
    let name = rest.strip_suffix("/values")?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}

/// Handle GET /metrics
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

/// Handle GET /-/healthy
pub async fn handle_healthy() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
