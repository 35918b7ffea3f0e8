//! The per-request pipeline: selector handling, window planning, concurrent
//! fan-out, synthesis, and selection.

use futures::future::join_all;

use crate::matchers::{extract_selectors, strip_label_from_param};
use crate::model::{
    COMMAND_LABEL, COMMAND_OVERRIDE, RAW_WINDOWS, Series, Shape, TIMEFRAME_LABEL, Timeframe,
};
use crate::params::Params;
use crate::synthesis::{
    absolute_delta, build_average, dedupe_series, filter_by_timeframe, index_by_signature,
    percent_delta,
};
use crate::upstream::Upstream;

/// The query fan-out and synthesis engine. Stateless across requests.
#[derive(Debug, Clone)]
pub struct Engine {
    upstream: Upstream,
}

impl Engine {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Run the full pipeline for one query or query_range request against
    /// `endpoint` (the upstream URL up to and including the API path).
    ///
    /// Never fails: per-window fetch errors contribute no series, and the
    /// worst outcome is an empty result.
    pub async fn query(&self, endpoint: &str, mut params: Params, shape: Shape) -> Vec<Series> {
        params.remap_match();
        let selectors = extract_selectors(&mut params);
        strip_label_from_param(&mut params, "query", TIMEFRAME_LABEL);
        strip_label_from_param(&mut params, "query", COMMAND_LABEL);
        if shape == Shape::Range && params.get("step").unwrap_or("").is_empty() {
            params.set("step", "60");
        }

        let timeframe = selectors.timeframe.as_deref().and_then(Timeframe::parse);
        let command = selectors.command.as_deref().filter(|c| !c.is_empty());
        let override_on = command == Some(COMMAND_OVERRIDE);
        tracing::debug!(
            timeframe = timeframe.map(Timeframe::as_str),
            command,
            "selectors extracted"
        );

        if let Some(single) = single_window(timeframe, override_on) {
            let offset = single.offset().unwrap_or(0);
            let pool = self
                .upstream
                .fetch_window(endpoint, &params, single, offset, shape, command)
                .await;
            return filter_by_timeframe(dedupe_series(pool), single);
        }

        let fetches = RAW_WINDOWS.iter().map(|(timeframe, offset)| {
            self.upstream
                .fetch_window(endpoint, &params, *timeframe, *offset, shape, command)
        });
        let pool: Vec<Series> = join_all(fetches).await.into_iter().flatten().collect();
        let mut merged = dedupe_series(pool);

        let averages = build_average(&merged, shape, command);
        let (compare, percent) = {
            let (current, average) = index_by_signature(&merged, &averages);
            (
                absolute_delta(&current, &average, command),
                percent_delta(&current, &average, command),
            )
        };
        tracing::debug!(
            raw = merged.len(),
            averages = averages.len(),
            deltas = compare.len(),
            "synthesis complete"
        );
        merged.extend(averages);
        merged.extend(compare);
        merged.extend(percent);

        match (timeframe, override_on) {
            (Some(timeframe), false) => filter_by_timeframe(merged, timeframe),
            _ => merged,
        }
    }
}

/// The window to fetch alone, when the plan allows it: a raw selector
/// without the command override. Synthetic selectors and the override both
/// require the full fan-out.
fn single_window(timeframe: Option<Timeframe>, override_on: bool) -> Option<Timeframe> {
    match timeframe {
        Some(tf) if tf.is_raw() && !override_on => Some(tf),
        _ => None,
    }
}
