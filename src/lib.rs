//! Chronotheus: a transparent, time-shifting proxy for Prometheus-compatible
//! metrics backends.
//!
//! Every instant or range query is fanned out five times against the same
//! upstream: once for the current window and once each for four historical
//! windows offset by 7, 14, 21 and 28 days. Historical timestamps are
//! shifted forward so all slices overlay the requested range, each series is
//! tagged with a `chrono_timeframe` label, and three synthetic series are
//! derived per base metric: a per-minute average of the historicals, the
//! point-wise difference between current and average, and the point-wise
//! percent difference. An unmodified dashboard selects any slice with a
//! single label matcher.

pub mod engine;
pub mod error;
pub mod matchers;
pub mod model;
pub mod params;
pub mod server;
pub mod synthesis;
pub mod timeparse;
pub mod upstream;

pub use engine::Engine;
pub use error::{Error, Result};
pub use model::{
    COMMAND_LABEL, COMMAND_OVERRIDE, LabelSet, Points, RAW_WINDOWS, Sample, Series, Shape,
    Signature, TIMEFRAME_LABEL, Timeframe,
};
pub use params::Params;
pub use upstream::Upstream;
