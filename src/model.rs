//! Typed data model for series flowing through the engine.
//!
//! Upstream payloads are parsed once into these types; synthesis operates on
//! the typed form and emission re-serializes. Two labels are owned by the
//! engine and never originate upstream: the window tag `chrono_timeframe`
//! and the override tag `_command`.

use std::collections::BTreeMap;

/// Label name carrying the window tag on every emitted series.
pub const TIMEFRAME_LABEL: &str = "chrono_timeframe";

/// Label name carrying the command selector, when one was supplied.
pub const COMMAND_LABEL: &str = "_command";

/// The only command token with recognized behavior: it disables
/// post-synthesis filtering so every window appears in the response.
pub const COMMAND_OVERRIDE: &str = "DONT_REMOVE_UNUSED_HISTORICS";

/// A label mapping. Keys are unique; ordering is deterministic but carries
/// no semantics.
pub type LabelSet = BTreeMap<String, String>;

/// A single timestamped observation.
///
/// `raw` preserves the upstream's exact decimal serialization so raw-window
/// samples round-trip byte-for-byte; synthesized samples set it to the
/// shortest form that round-trips through `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
    pub raw: String,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            raw: value.to_string(),
        }
    }
}

/// The shape of a series: one sample (instant) or an ordered sequence
/// strictly increasing in timestamp (range).
#[derive(Debug, Clone, PartialEq)]
pub enum Points {
    Instant(Sample),
    Range(Vec<Sample>),
}

impl Points {
    /// All samples regardless of shape.
    pub fn samples(&self) -> &[Sample] {
        match self {
            Points::Instant(sample) => std::slice::from_ref(sample),
            Points::Range(samples) => samples,
        }
    }
}

/// Which result shape a request produces: one sample per series (instant)
/// or an ordered sequence (range). Determined by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Instant,
    Range,
}

/// A labelled series. Lives for the duration of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: LabelSet,
    pub points: Points,
}

impl Series {
    /// The window tag, if this series carries one.
    pub fn timeframe(&self) -> Option<&str> {
        self.labels.get(TIMEFRAME_LABEL).map(String::as_str)
    }

    /// Canonical identity for cross-window alignment: the labels minus the
    /// two synthetic ones.
    pub fn signature(&self) -> Signature {
        Signature::of(&self.labels)
    }
}

/// Canonical series identity: sorted `(name, value)` pairs with the two
/// synthetic labels removed. Two series align iff their signatures are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(Vec<(String, String)>);

impl Signature {
    pub fn of(labels: &LabelSet) -> Self {
        Self(
            labels
                .iter()
                .filter(|(k, _)| k.as_str() != TIMEFRAME_LABEL && k.as_str() != COMMAND_LABEL)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Rebuild a label set containing exactly the signature's labels.
    pub fn to_labels(&self) -> LabelSet {
        self.0.iter().cloned().collect()
    }
}

/// One of the named time slices a series can be tagged with.
///
/// Raw windows have fixed offsets measured in whole days; synthetic windows
/// are constructed by the engine and are never offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Current,
    Days7,
    Days14,
    Days21,
    Days28,
    LastMonthAverage,
    CompareAgainstLast28,
    PercentCompareAgainstLast28,
}

/// The five raw windows in fetch order, with their offsets in seconds.
pub const RAW_WINDOWS: [(Timeframe, i64); 5] = [
    (Timeframe::Current, 0),
    (Timeframe::Days7, 7 * 24 * 3600),
    (Timeframe::Days14, 14 * 24 * 3600),
    (Timeframe::Days21, 21 * 24 * 3600),
    (Timeframe::Days28, 28 * 24 * 3600),
];

/// Number of historical windows. Also the fixed denominator of the
/// per-minute average, regardless of how many windows returned data.
pub const HISTORICAL_WINDOWS: usize = RAW_WINDOWS.len() - 1;

impl Timeframe {
    /// Every named window, raw windows first, in advertisement order.
    pub const ALL: [Timeframe; 8] = [
        Timeframe::Current,
        Timeframe::Days7,
        Timeframe::Days14,
        Timeframe::Days21,
        Timeframe::Days28,
        Timeframe::LastMonthAverage,
        Timeframe::CompareAgainstLast28,
        Timeframe::PercentCompareAgainstLast28,
    ];

    /// The canonical name used on the `chrono_timeframe` label.
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Current => "current",
            Timeframe::Days7 => "7days",
            Timeframe::Days14 => "14days",
            Timeframe::Days21 => "21days",
            Timeframe::Days28 => "28days",
            Timeframe::LastMonthAverage => "lastMonthAverage",
            Timeframe::CompareAgainstLast28 => "compareAgainstLast28",
            Timeframe::PercentCompareAgainstLast28 => "percentCompareAgainstLast28",
        }
    }

    /// Parse a selector value. Unknown names yield `None`: the upstream may
    /// legitimately be asked for label values the engine does not own, so an
    /// unrecognized window is treated as no selector rather than an error.
    pub fn parse(name: &str) -> Option<Timeframe> {
        Timeframe::ALL.into_iter().find(|tf| tf.as_str() == name)
    }

    /// True for the five fetchable windows.
    pub fn is_raw(self) -> bool {
        self.offset().is_some()
    }

    /// Seconds this window's data is shifted into the past before being
    /// requested upstream. `None` for synthetic windows.
    pub fn offset(self) -> Option<i64> {
        RAW_WINDOWS
            .iter()
            .find(|(tf, _)| *tf == self)
            .map(|(_, offset)| *offset)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
