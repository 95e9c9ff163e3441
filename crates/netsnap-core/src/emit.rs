//! Metric points and the emitter that turns decoder output into them.
//!
//! Decoders produce [`Emission`]s: a key relative to the file being decoded,
//! optional extra labels and a value. The emitter combines an emission with
//! the [`SeriesContext`] of its entry (job, variable base name, device and
//! station labels) into a [`MetricPoint`] with a canonical label set, then
//! hands it to the sink.

use crate::error::SinkError;
use crate::sink::Sink;
use std::collections::BTreeMap;
use tracing::trace;

/// Ordered label set. Ordering makes the canonical form (and anything
/// hashed from it) independent of insertion order.
pub type Labels = BTreeMap<String, String>;

pub const LABEL_JOB: &str = "job";
pub const LABEL_NAME: &str = "__name__";
pub const LABEL_VAR: &str = "var";

/// One value produced by a decoder, before canonical labels are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Empty for files that hold a single value.
    pub key: String,
    pub labels: Labels,
    pub value: f64,
}

impl Emission {
    pub fn new(key: impl Into<String>, labels: Labels, value: f64) -> Self {
        Self {
            key: key.into(),
            labels,
            value,
        }
    }

    /// Emission without extra labels.
    pub fn plain(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, Labels::new(), value)
    }
}

/// Fully labelled sample ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub labels: Labels,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub value: f64,
}

/// Labels shared by every emission of one archive entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesContext {
    pub job: &'static str,
    /// Variable name before the emission key is appended.
    pub base: String,
    /// Labels applied after the decoder's extra labels (phy, netdev, station).
    pub labels: Labels,
}

impl SeriesContext {
    pub fn new(job: &'static str, base: impl Into<String>) -> Self {
        Self {
            job,
            base: base.into(),
            labels: Labels::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }
}

/// Builds `<base>[_<key>]`, with hyphens in the key turned into underscores.
pub fn var_name(base: &str, key: &str) -> String {
    if key.is_empty() {
        base.to_string()
    } else {
        format!("{}_{}", base, key.replace('-', "_"))
    }
}

/// Builds the canonical point for one emission.
///
/// `job` and the name labels come first, the decoder's extra labels may
/// override them, and the context labels override both.
pub fn build_point(ctx: &SeriesContext, emission: &Emission, timestamp_us: i64) -> MetricPoint {
    let var = var_name(&ctx.base, &emission.key);

    let mut labels = Labels::new();
    labels.insert(LABEL_JOB.to_string(), ctx.job.to_string());
    labels.insert(LABEL_NAME.to_string(), var.clone());
    labels.insert(LABEL_VAR.to_string(), var);
    for (k, v) in &emission.labels {
        labels.insert(k.clone(), v.clone());
    }
    for (k, v) in &ctx.labels {
        labels.insert(k.clone(), v.clone());
    }

    MetricPoint {
        labels,
        timestamp_us,
        value: emission.value,
    }
}

/// Forwards points to a sink, counting what it appended. Does not batch or
/// retry.
pub struct MetricEmitter<'s, S: Sink + ?Sized> {
    sink: &'s mut S,
    points: u64,
}

impl<'s, S: Sink + ?Sized> MetricEmitter<'s, S> {
    pub fn new(sink: &'s mut S) -> Self {
        Self { sink, points: 0 }
    }

    pub fn emit(
        &mut self,
        ctx: &SeriesContext,
        timestamp_us: i64,
        emission: &Emission,
    ) -> Result<(), SinkError> {
        let point = build_point(ctx, emission, timestamp_us);
        trace!(labels = ?point.labels, ts = point.timestamp_us, value = point.value, "append");
        self.sink
            .append(&point.labels, point.timestamp_us, point.value)?;
        self.points += 1;
        Ok(())
    }

    pub fn emit_all(
        &mut self,
        ctx: &SeriesContext,
        timestamp_us: i64,
        emissions: &[Emission],
    ) -> Result<(), SinkError> {
        for e in emissions {
            self.emit(ctx, timestamp_us, e)?;
        }
        Ok(())
    }

    /// Number of points appended through this emitter.
    pub fn points(&self) -> u64 {
        self.points
    }
}
