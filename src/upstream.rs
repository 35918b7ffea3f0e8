//! Upstream HTTP access: the shared client, per-window fetches with
//! timestamp shifting, and plain proxying for the label surface.
//!
//! The client is built once at startup and shared read-only across
//! requests; it owns no per-request state beyond its connection pool.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{COMMAND_LABEL, LabelSet, Points, Sample, Series, Shape, TIMEFRAME_LABEL, Timeframe};
use crate::params::Params;
use crate::timeparse::parse_time;

/// Shared upstream HTTP client.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
}

/// Wire form of a v1 query response. Missing fields decode to empty so a
/// malformed body degrades to an empty result rather than an error.
#[derive(Debug, Default, Deserialize)]
struct WireResponse {
    #[serde(default)]
    data: WireData,
}

#[derive(Debug, Default, Deserialize)]
struct WireData {
    #[serde(default)]
    result: Vec<WireSeries>,
}

#[derive(Debug, Deserialize)]
struct WireSeries {
    #[serde(default)]
    metric: LabelSet,
    #[serde(default)]
    value: Option<(f64, Value)>,
    #[serde(default)]
    values: Option<Vec<(f64, Value)>>,
}

impl Upstream {
    /// Build the shared client: 30 s request timeout, 5 s connect timeout,
    /// pooled keep-alive connections.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::Internal(format!("building upstream client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch one window of a query endpoint.
    ///
    /// The request's time anchors are shifted backward by the window's
    /// offset on a per-window copy of the parameters; every returned
    /// sample's timestamp is shifted forward by the same offset. Each series
    /// is tagged with the window name and, when a command selector was
    /// present, the command value.
    ///
    /// A window that cannot be fetched or decoded contributes no series;
    /// the rest of the request proceeds.
    pub async fn fetch_window(
        &self,
        endpoint: &str,
        params: &Params,
        timeframe: Timeframe,
        offset: i64,
        shape: Shape,
        command: Option<&str>,
    ) -> Vec<Series> {
        let mut window_params = params.clone();
        match shape {
            Shape::Instant => {
                let time = parse_time(params.get("time"));
                window_params.set("time", &(time - offset).to_string());
            }
            Shape::Range => {
                let start = parse_time(params.get("start"));
                let end = parse_time(params.get("end"));
                window_params.set("start", &(start - offset).to_string());
                window_params.set("end", &(end - offset).to_string());
            }
        }

        let url = format!("{endpoint}?{}", window_params.to_query_string());
        let body = match self.get_checked(&url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(window = %timeframe, error = %e, "window fetch failed");
                return Vec::new();
            }
        };
        let wire: WireResponse = match serde_json::from_slice(&body) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::debug!(window = %timeframe, error = %e, "window body undecodable");
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(wire.data.result.len());
        for series in wire.data.result {
            let points = match shape {
                Shape::Instant => {
                    let Some(sample) = series.value.as_ref().and_then(|p| wire_sample(p, offset))
                    else {
                        continue;
                    };
                    Points::Instant(sample)
                }
                Shape::Range => Points::Range(
                    series
                        .values
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|p| wire_sample(p, offset))
                        .collect(),
                ),
            };
            let mut labels = series.metric;
            labels.insert(TIMEFRAME_LABEL.to_string(), timeframe.as_str().to_string());
            if let Some(command) = command {
                labels.insert(COMMAND_LABEL.to_string(), command.to_string());
            }
            out.push(Series { labels, points });
        }
        tracing::debug!(window = %timeframe, series = out.len(), "window fetched");
        out
    }

    /// GET a non-fan-out endpoint and decode its JSON body. Transport and
    /// HTTP failures surface as errors; an undecodable body degrades to
    /// `Value::Null`.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let body = self.get_checked(url).await?;
        Ok(serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    /// GET a non-fan-out endpoint and return its body verbatim.
    pub async fn get_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.get_checked(url).await
    }

    /// Send an opaque pass-through request, preserving method, query and
    /// body.
    pub async fn forward(
        &self,
        method: &str,
        url: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("method: {e}")))?;
        self.client
            .request(method, url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))
    }

    async fn get_checked(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "upstream returned {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Upstream(e.to_string()))
    }
}

/// Parse one wire sample, shifting its timestamp forward by the window
/// offset. Samples whose value is neither a decimal string nor a number are
/// dropped.
fn wire_sample(pair: &(f64, Value), offset: i64) -> Option<Sample> {
    let raw = match &pair.1 {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let value = raw.parse::<f64>().ok()?;
    Some(Sample {
        timestamp: pair.0 as i64 + offset,
        value,
        raw,
    })
}
