//! Prometheus v1 response envelopes.
//!
//! Query results are wrapped byte-compatibly with the upstream's envelope so
//! an unmodified dashboard treats the proxy as an ordinary backend. Sample
//! values are decimal strings; timestamps are numeric seconds.

use serde::{Deserialize, Serialize};

use crate::model::{LabelSet, Points, Series, Shape};

/// Response for /api/v1/query and /api/v1/query_range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSeries {
    pub metric: LabelSet,
    pub value: (i64, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSeries {
    pub metric: LabelSet,
    pub values: Vec<(i64, String)>,
}

/// Response for the locally-answered label surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelValuesResponse {
    pub status: String,
    pub data: Vec<String>,
}

impl LabelValuesResponse {
    pub fn success(data: Vec<String>) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

/// Wrap a series list in the v1 envelope with the result-type tag matching
/// the request shape: `vector` for instant results, `matrix` for range.
pub(crate) fn series_to_response(shape: Shape, series: Vec<Series>) -> QueryResponse {
    let (result_type, result) = match shape {
        Shape::Instant => {
            let result: Vec<VectorSeries> = series
                .into_iter()
                .filter_map(|s| match s.points {
                    Points::Instant(sample) => Some(VectorSeries {
                        metric: s.labels,
                        value: (sample.timestamp, sample.raw),
                    }),
                    Points::Range(_) => None,
                })
                .collect();
            ("vector", serde_json::to_value(result).unwrap_or_default())
        }
        Shape::Range => {
            let result: Vec<MatrixSeries> = series
                .into_iter()
                .filter_map(|s| match s.points {
                    Points::Range(samples) => Some(MatrixSeries {
                        metric: s.labels,
                        values: samples.into_iter().map(|p| (p.timestamp, p.raw)).collect(),
                    }),
                    Points::Instant(_) => None,
                })
                .collect();
            ("matrix", serde_json::to_value(result).unwrap_or_default())
        }
    };
    QueryResponse {
        status: "success".to_string(),
        data: QueryData {
            result_type: result_type.to_string(),
            result,
        },
    }
}
