//! Cross-window alignment and synthetic-series construction.
//!
//! After fan-out the pool holds up to five raw series per signature. This
//! module collapses duplicates, averages the four historical windows per
//! aligned minute, and derives the absolute and percent deviation of the
//! current window from that average.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{
    COMMAND_LABEL, HISTORICAL_WINDOWS, Points, Sample, Series, Shape, Signature, TIMEFRAME_LABEL,
    Timeframe,
};

/// Collapse byte-identical duplicates: same labels, same samples. Distinct
/// windows sharing a signature are preserved. Upstreams occasionally echo
/// overlapping results; only exact duplicates collapse.
pub fn dedupe_series(pool: Vec<Series>) -> Vec<Series> {
    let mut seen: HashSet<(Vec<(String, String)>, Vec<(i64, String)>)> = HashSet::new();
    let mut out = Vec::with_capacity(pool.len());
    for series in pool {
        let key = (
            series
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            series
                .points
                .samples()
                .iter()
                .map(|s| (s.timestamp, s.raw.clone()))
                .collect(),
        );
        if seen.insert(key) {
            out.push(series);
        }
    }
    out
}

/// Build one `lastMonthAverage` series per signature from the historical
/// windows in the pool.
///
/// Samples are bucketed by 60-second floor; each bucket's value is the sum
/// divided by the configured historical-window count (four), not the
/// observed sample count, so missing windows depress the average. Range
/// shape emits all buckets in ascending minute order; instant shape emits
/// the latest bucket.
pub fn build_average(pool: &[Series], shape: Shape, command: Option<&str>) -> Vec<Series> {
    let mut sums: BTreeMap<Signature, BTreeMap<i64, f64>> = BTreeMap::new();
    for series in pool {
        if series.timeframe() == Some(Timeframe::Current.as_str()) {
            continue;
        }
        let bucket = sums.entry(series.signature()).or_default();
        for sample in series.points.samples() {
            let minute = (sample.timestamp / 60) * 60;
            *bucket.entry(minute).or_default() += sample.value;
        }
    }

    let mut out = Vec::with_capacity(sums.len());
    for (signature, buckets) in sums {
        let samples: Vec<Sample> = buckets
            .into_iter()
            .map(|(minute, sum)| Sample::new(minute, sum / HISTORICAL_WINDOWS as f64))
            .collect();
        let Some(last) = samples.last() else {
            continue;
        };
        let points = match shape {
            Shape::Instant => Points::Instant(last.clone()),
            Shape::Range => Points::Range(samples),
        };
        let mut labels = signature.to_labels();
        labels.insert(
            TIMEFRAME_LABEL.to_string(),
            Timeframe::LastMonthAverage.as_str().to_string(),
        );
        if let Some(command) = command {
            labels.insert(COMMAND_LABEL.to_string(), command.to_string());
        }
        out.push(Series { labels, points });
    }
    out
}

/// Index the pool's `current` series and the average series by signature,
/// for delta construction.
pub fn index_by_signature<'a>(
    pool: &'a [Series],
    averages: &'a [Series],
) -> (
    BTreeMap<Signature, &'a Series>,
    BTreeMap<Signature, &'a Series>,
) {
    let mut current = BTreeMap::new();
    for series in pool {
        if series.timeframe() == Some(Timeframe::Current.as_str()) {
            current.insert(series.signature(), series);
        }
    }
    let mut average = BTreeMap::new();
    for series in averages {
        average.insert(series.signature(), series);
    }
    (current, average)
}

/// Point-wise `current − average` per signature present in both indexes.
pub fn absolute_delta(
    current: &BTreeMap<Signature, &Series>,
    average: &BTreeMap<Signature, &Series>,
    command: Option<&str>,
) -> Vec<Series> {
    delta(
        current,
        average,
        Timeframe::CompareAgainstLast28,
        command,
        |vc, va| vc - va,
    )
}

/// Point-wise percent deviation of current from average per signature
/// present in both indexes. A zero average yields `0`, not an error.
pub fn percent_delta(
    current: &BTreeMap<Signature, &Series>,
    average: &BTreeMap<Signature, &Series>,
    command: Option<&str>,
) -> Vec<Series> {
    delta(
        current,
        average,
        Timeframe::PercentCompareAgainstLast28,
        command,
        |vc, va| {
            if va == 0.0 {
                0.0
            } else {
                (vc - va) / va * 100.0
            }
        },
    )
}

fn delta(
    current: &BTreeMap<Signature, &Series>,
    average: &BTreeMap<Signature, &Series>,
    timeframe: Timeframe,
    command: Option<&str>,
    op: impl Fn(f64, f64) -> f64,
) -> Vec<Series> {
    let mut out = Vec::new();
    for (signature, cur) in current {
        let Some(avg) = average.get(signature) else {
            continue;
        };
        let points = match (&cur.points, &avg.points) {
            (Points::Instant(c), Points::Instant(a)) => {
                Points::Instant(Sample::new(c.timestamp, op(c.value, a.value)))
            }
            (Points::Range(cs), Points::Range(avs)) => {
                // average indexed by timestamp; a miss counts as zero
                let by_ts: HashMap<i64, f64> =
                    avs.iter().map(|s| (s.timestamp, s.value)).collect();
                Points::Range(
                    cs.iter()
                        .map(|c| {
                            let va = by_ts.get(&c.timestamp).copied().unwrap_or(0.0);
                            Sample::new(c.timestamp, op(c.value, va))
                        })
                        .collect(),
                )
            }
            _ => continue,
        };
        let mut labels = cur.labels.clone();
        labels.insert(TIMEFRAME_LABEL.to_string(), timeframe.as_str().to_string());
        if let Some(command) = command {
            labels.insert(COMMAND_LABEL.to_string(), command.to_string());
        }
        out.push(Series { labels, points });
    }
    out
}

/// Retain only series tagged with the requested window.
pub fn filter_by_timeframe(pool: Vec<Series>, timeframe: Timeframe) -> Vec<Series> {
    pool.into_iter()
        .filter(|s| s.timeframe() == Some(timeframe.as_str()))
        .collect()
}
