//! End-to-end tests for the proxy.
//!
//! Drives the full application through Axum's `oneshot()` infrastructure
//! against a fixture upstream listening on an ephemeral local port. The
//! fixture returns a deterministic value per window so the synthetic series
//! have known values: `current=1`, `7days=2`, `14days=3`, `21days=4`,
//! `28days=5`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};
use tower::ServiceExt;

const BASE_TIME: i64 = 1_700_000_000;
const WEEK: i64 = 604_800;
const OVERRIDE: &str = "DONT_REMOVE_UNUSED_HISTORICS";

// ---------------------------------------------------------------------------
// Fixture upstream
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Recorded {
    path: String,
    params: HashMap<String, Vec<String>>,
}

impl Recorded {
    fn first(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}

#[derive(Clone, Default)]
struct Fixture {
    log: Arc<Mutex<Vec<Recorded>>>,
    fail_offsets: Arc<Vec<i64>>,
}

impl Fixture {
    fn failing(offsets: Vec<i64>) -> Self {
        Self {
            fail_offsets: Arc::new(offsets),
            ..Self::default()
        }
    }

    fn record(&self, path: &str, query: &Option<String>) -> HashMap<String, Vec<String>> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(q) = query {
            for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
                params.entry(k.into_owned()).or_default().push(v.into_owned());
            }
        }
        self.log.lock().unwrap().push(Recorded {
            path: path.to_string(),
            params: params.clone(),
        });
        params
    }

    fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }
}

/// The per-window value: 1 for current, 2 for 7days, … 5 for 28days.
fn window_value(offset: i64) -> i64 {
    1 + offset / WEEK
}

async fn fixture_query(State(fx): State<Fixture>, RawQuery(query): RawQuery) -> Response {
    let params = fx.record("/api/v1/query", &query);
    let time: i64 = params
        .get("time")
        .and_then(|v| v.first())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let offset = BASE_TIME - time;
    if fx.fail_offsets.contains(&offset) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [{
                "metric": {"__name__": "up", "job": "prometheus"},
                "value": [time, window_value(offset).to_string()],
            }],
        },
    }))
    .into_response()
}

async fn fixture_query_range(State(fx): State<Fixture>, RawQuery(query): RawQuery) -> Response {
    let params = fx.record("/api/v1/query_range", &query);
    let get = |key: &str| -> i64 {
        params
            .get(key)
            .and_then(|v| v.first())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    let (start, end, step) = (get("start"), get("end"), get("step").max(1));
    let offset = BASE_TIME - start;
    if fx.fail_offsets.contains(&offset) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let value = window_value(offset).to_string();
    let values: Vec<Value> = (start..=end)
        .step_by(step as usize)
        .map(|t| json!([t, value]))
        .collect();
    Json(json!({
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [{
                "metric": {"__name__": "up", "job": "prometheus"},
                "values": values,
            }],
        },
    }))
    .into_response()
}

async fn fixture_labels(State(fx): State<Fixture>, RawQuery(query): RawQuery) -> Response {
    fx.record("/api/v1/labels", &query);
    Json(json!({"status": "success", "data": ["__name__", "job"]})).into_response()
}

async fn fixture_label_values(
    State(fx): State<Fixture>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    fx.record(&format!("/api/v1/label/{name}/values"), &query);
    Json(json!({"status": "success", "data": ["prometheus"]})).into_response()
}

async fn fixture_fallback(State(fx): State<Fixture>, req: Request<Body>) -> Response {
    let query = req.uri().query().map(str::to_owned);
    fx.record(req.uri().path(), &query);
    (StatusCode::IM_A_TEAPOT, "brewing").into_response()
}

/// Serve the fixture on an ephemeral port; returns the proxy path prefix
/// addressing it.
async fn spawn_upstream(fixture: Fixture) -> String {
    let app = Router::new()
        .route("/api/v1/query", get(fixture_query))
        .route("/api/v1/query_range", get(fixture_query_range))
        .route("/api/v1/labels", get(fixture_labels))
        .route("/api/v1/label/{name}/values", get(fixture_label_values))
        .fallback(fixture_fallback)
        .with_state(fixture);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("/127.0.0.1_{port}")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode_query(pairs: &[(&str, &str)]) -> String {
    let mut qs = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        qs.append_pair(k, v);
    }
    qs.finish()
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Index the result array by its `chrono_timeframe` label.
fn by_timeframe(body: &Value) -> HashMap<String, Value> {
    body["data"]["result"]
        .as_array()
        .expect("result array")
        .iter()
        .map(|s| {
            (
                s["metric"]["chrono_timeframe"].as_str().unwrap().to_string(),
                s.clone(),
            )
        })
        .collect()
}

fn proxy() -> Router {
    chronotheus::server::build_app().unwrap()
}

// ---------------------------------------------------------------------------
// Instant pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instant_without_selectors_returns_raw_and_synthetics() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[("query", "up"), ("time", "1700000000")]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["resultType"], "vector");

    let series = by_timeframe(&body);
    assert_eq!(series.len(), 8, "five raw plus three synthetics");

    for (tf, want) in [("current", "1"), ("7days", "2"), ("14days", "3"), ("21days", "4"), ("28days", "5")] {
        let value = &series[tf]["value"];
        assert_eq!(value[0], json!(BASE_TIME), "{tf} timestamp");
        assert_eq!(value[1], json!(want), "{tf} value");
        assert_eq!(series[tf]["metric"]["job"], "prometheus");
        assert!(series[tf]["metric"].get("_command").is_none());
    }

    // average of 2+3+4+5 over the fixed four-window denominator
    let avg = &series["lastMonthAverage"]["value"];
    assert_eq!(avg[0], json!(1699999980), "average sits on its minute bucket");
    assert_eq!(avg[1], json!("3.5"));

    let compare = &series["compareAgainstLast28"]["value"];
    assert_eq!(compare[0], json!(BASE_TIME));
    assert_eq!(compare[1], json!("-2.5"));

    let percent = &series["percentCompareAgainstLast28"]["value"];
    assert_eq!(percent[0], json!(BASE_TIME));
    let got: f64 = percent[1].as_str().unwrap().parse().unwrap();
    assert!((got - (-71.42857142857143)).abs() < 1e-9, "{got}");

    // all five windows were fetched, each with the synthetic-free query
    let requests = fixture.requests();
    assert_eq!(requests.len(), 5);
    for req in &requests {
        assert_eq!(req.first("query"), Some("up"));
    }
}

#[tokio::test]
async fn instant_pinned_raw_window_fetches_once() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[
        ("query", r#"up{chrono_timeframe="7days"}"#),
        ("time", "1700000000"),
    ]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    let result = body["data"]["result"].as_array().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["metric"]["chrono_timeframe"], "7days");
    assert_eq!(result[0]["value"], json!([BASE_TIME, "2"]));

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1, "a pinned raw window needs one fetch");
    assert_eq!(requests[0].first("time"), Some("1699395200"));
    assert_eq!(requests[0].first("query"), Some("up{}"));
}

#[tokio::test]
async fn instant_synthetic_selector_fetches_all_but_emits_one() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[
        ("query", r#"up{chrono_timeframe="percentCompareAgainstLast28"}"#),
        ("time", "1700000000"),
    ]);
    let (_, body) = get_json(&app, &format!("{prefix}/api/v1/query?{qs}")).await;

    let result = body["data"]["result"].as_array().unwrap();
    assert_eq!(result.len(), 1, "one series per signature");
    assert_eq!(
        result[0]["metric"]["chrono_timeframe"],
        "percentCompareAgainstLast28"
    );
    assert_eq!(fixture.requests().len(), 5);
}

#[tokio::test]
async fn command_override_disables_filtering_and_tags_everything() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    // POST form body instead of query string
    let form = encode_query(&[
        (
            "query",
            &format!(r#"up{{chrono_timeframe="7days",_command="{OVERRIDE}"}}"#),
        ),
        ("time", "1700000000"),
    ]);
    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("{prefix}/api/v1/query"))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    let series = by_timeframe(&body);
    assert_eq!(series.len(), 8, "override keeps every window");
    for (tf, s) in &series {
        assert_eq!(s["metric"]["_command"], json!(OVERRIDE), "{tf}");
    }

    // the override itself never reaches the upstream
    for req in fixture.requests() {
        assert_eq!(req.first("query"), Some("up{}"));
    }
}

#[tokio::test]
async fn failed_window_is_skipped_and_depresses_average() {
    let fixture = Fixture::failing(vec![4 * WEEK]);
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[("query", "up"), ("time", "1700000000")]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query?{qs}")).await;

    assert_eq!(status, StatusCode::OK, "partial failure is still success");
    let series = by_timeframe(&body);
    assert_eq!(series.len(), 7, "missing window, everything else intact");
    assert!(!series.contains_key("28days"));

    // (2 + 3 + 4) / 4: the denominator stays at the configured count
    assert_eq!(series["lastMonthAverage"]["value"][1], json!("2.25"));
    assert_eq!(series["compareAgainstLast28"]["value"][1], json!("-1.25"));
}

#[tokio::test]
async fn unparseable_time_defaults_to_now_without_error() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[("query", "up"), ("time", "next tuesday")]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(fixture.requests().len(), 5);
}

#[tokio::test]
async fn query_without_parameters_is_bad_request() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(fixture.requests().is_empty());
}

// ---------------------------------------------------------------------------
// Range pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn range_defaults_step_and_aligns_average_to_minutes() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[
        ("query", "up"),
        ("start", "1700000000"),
        ("end", "1700000600"),
    ]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/query_range?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["resultType"], "matrix");

    for req in fixture.requests() {
        assert_eq!(req.first("step"), Some("60"), "omitted step defaults to 60");
    }

    let series = by_timeframe(&body);
    assert_eq!(series.len(), 8);

    let current = series["current"]["values"].as_array().unwrap();
    assert_eq!(current.len(), 11);
    assert_eq!(current[0], json!([BASE_TIME, "1"]));
    assert_eq!(current[10], json!([BASE_TIME + 600, "1"]));

    // raw windows overlay the requested range and stay strictly ordered
    for tf in ["current", "7days", "14days", "21days", "28days"] {
        let values = series[tf]["values"].as_array().unwrap();
        let stamps: Vec<i64> = values.iter().map(|v| v[0].as_i64().unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{tf} ordered");
        assert!(
            stamps.iter().all(|t| (BASE_TIME..=BASE_TIME + 600).contains(t)),
            "{tf} inside the requested range"
        );
    }

    let avg = series["lastMonthAverage"]["values"].as_array().unwrap();
    assert_eq!(avg.len(), 11);
    for pair in avg {
        assert_eq!(pair[0].as_i64().unwrap() % 60, 0, "minute boundary");
        assert_eq!(pair[1], json!("3.5"));
    }

    // the current samples sit off the minute grid, so the per-timestamp
    // average lookup misses and counts as zero
    let compare = series["compareAgainstLast28"]["values"].as_array().unwrap();
    assert_eq!(compare.len(), 11);
    assert!(compare.iter().all(|p| p[1] == json!("1")));
    let percent = series["percentCompareAgainstLast28"]["values"].as_array().unwrap();
    assert!(percent.iter().all(|p| p[1] == json!("0")));
}

#[tokio::test]
async fn range_pinned_window_shifts_start_and_end() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[
        ("query", r#"up{chrono_timeframe="28days"}"#),
        ("start", "1700000000"),
        ("end", "1700000120"),
        ("step", "60"),
    ]);
    let (_, body) = get_json(&app, &format!("{prefix}/api/v1/query_range?{qs}")).await;

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].first("start"), Some("1697580800"));
    assert_eq!(requests[0].first("end"), Some("1697580920"));

    let result = body["data"]["result"].as_array().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["metric"]["chrono_timeframe"], "28days");
    assert_eq!(
        result[0]["values"],
        json!([[1700000000i64, "5"], [1700000060i64, "5"], [1700000120i64, "5"]])
    );
}

// ---------------------------------------------------------------------------
// Label surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn labels_advertise_synthetic_names() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[("match[]", r#"up{chrono_timeframe="7days"}"#)]);
    let (status, body) = get_json(&app, &format!("{prefix}/api/v1/labels?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!(["__name__", "job", "chrono_timeframe", "_command"])
    );

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].first("match[]"), Some("up{}"));
}

#[tokio::test]
async fn timeframe_label_values_answered_locally() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let (status, body) =
        get_json(&app, &format!("{prefix}/api/v1/label/chrono_timeframe/values")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "success",
            "data": [
                "current", "7days", "14days", "21days", "28days",
                "lastMonthAverage", "compareAgainstLast28", "percentCompareAgainstLast28",
            ],
        })
    );
    assert!(fixture.requests().is_empty(), "no upstream call");
}

#[tokio::test]
async fn command_label_values_answered_locally() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let (_, body) = get_json(&app, &format!("{prefix}/api/v1/label/_command/values")).await;

    assert_eq!(body["data"], json!(["", OVERRIDE]));
    assert!(fixture.requests().is_empty());
}

#[tokio::test]
async fn other_label_values_proxy_through_stripped() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let qs = encode_query(&[("match[]", r#"up{_command="x",job="api"}"#)]);
    let (status, body) =
        get_json(&app, &format!("{prefix}/api/v1/label/job/values?{qs}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(["prometheus"]));

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/v1/label/job/values");
    assert_eq!(requests[0].first("match[]"), Some(r#"up{job="api"}"#));
}

// ---------------------------------------------------------------------------
// Routing edges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_target_prefix_is_bad_request() {
    let app = proxy();

    let (status, body) = get_json(&app, "/api/v1/query?query=up").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn unknown_tails_pass_through_opaquely() {
    let fixture = Fixture::default();
    let prefix = spawn_upstream(fixture.clone()).await;
    let app = proxy();

    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("{prefix}/custom/endpoint?x=1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"brewing");

    let requests = fixture.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/custom/endpoint");
    assert_eq!(requests[0].first("x"), Some("1"));
}

#[tokio::test]
async fn health_and_metrics_are_served_locally() {
    let app = proxy();

    let resp = app
        .clone()
        .oneshot(Request::get("/-/healthy").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("chronotheus_http_requests"));
}
