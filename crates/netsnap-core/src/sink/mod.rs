//! Destinations for decoded metric points.
//!
//! The pipeline only ever appends and commits; it never reads back. One
//! batch is open per archive: every point of the archive is appended, then
//! the batch is committed before the next archive starts.

mod block;
mod interner;

pub use block::{BLOCK_EXTENSION, BlockMetadata, BlockReader, BlockStore, Series, list_blocks, read_block_metadata};
pub use interner::{StringInterner, series_id};

use crate::emit::{LABEL_NAME, Labels, MetricPoint};
use crate::error::SinkError;
use tracing::{debug, trace};

/// Append/commit contract of the time-series store.
pub trait Sink {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError>;

    /// Makes every point appended since the last commit durable.
    fn commit(&mut self) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError> {
        (**self).append(labels, timestamp_us, value)
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        (**self).commit()
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError> {
        (**self).append(labels, timestamp_us, value)
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        (**self).commit()
    }
}

/// Rejects label sets a store could not index.
pub(crate) fn validate_labels(labels: &Labels) -> Result<(), SinkError> {
    match labels.get(LABEL_NAME) {
        Some(name) if !name.is_empty() => {}
        _ => {
            return Err(SinkError::InvalidLabels(format!(
                "missing {} in {:?}",
                LABEL_NAME, labels
            )));
        }
    }
    if labels.keys().any(|k| k.is_empty()) {
        return Err(SinkError::InvalidLabels(format!("empty label name in {:?}", labels)));
    }
    Ok(())
}

/// Counts points without storing them.
#[derive(Debug, Default)]
pub struct DryRunSink {
    pending: u64,
    committed: u64,
    commits: u64,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points_committed(&self) -> u64 {
        self.committed
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl Sink for DryRunSink {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError> {
        validate_labels(labels)?;
        trace!(?labels, timestamp_us, value, "dry run: would add");
        self.pending += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        debug!(points = self.pending, "dry run: commit");
        self.committed += self.pending;
        self.pending = 0;
        self.commits += 1;
        Ok(())
    }
}

/// Keeps every batch in memory. Used by tests and by callers that want to
/// post-process points themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub pending: Vec<MetricPoint>,
    pub batches: Vec<Vec<MetricPoint>>,
    /// When set, `commit` fails with this message.
    pub fail_commit: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_points(&self) -> impl Iterator<Item = &MetricPoint> {
        self.batches.iter().flatten()
    }
}

impl Sink for MemorySink {
    fn append(&mut self, labels: &Labels, timestamp_us: i64, value: f64) -> Result<(), SinkError> {
        validate_labels(labels)?;
        self.pending.push(MetricPoint {
            labels: labels.clone(),
            timestamp_us,
            value,
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if let Some(msg) = &self.fail_commit {
            return Err(SinkError::Io(std::io::Error::other(msg.clone())));
        }
        self.batches.push(std::mem::take(&mut self.pending));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Labels {
        let mut labels = Labels::new();
        labels.insert(LABEL_NAME.to_string(), name.to_string());
        labels
    }

    #[test]
    fn test_validate_labels() {
        assert!(validate_labels(&named("tpc")).is_ok());
        assert!(validate_labels(&named("")).is_err());
        assert!(validate_labels(&Labels::new()).is_err());

        let mut bad = named("tpc");
        bad.insert(String::new(), "x".into());
        assert!(validate_labels(&bad).is_err());
    }

    #[test]
    fn test_dry_run_counts() {
        let mut sink = DryRunSink::new();
        sink.append(&named("a"), 1, 1.0).unwrap();
        sink.append(&named("b"), 1, 2.0).unwrap();
        sink.commit().unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.points_committed(), 2);
        assert_eq!(sink.commits(), 2);
    }

    #[test]
    fn test_memory_sink_batches() {
        let mut sink = MemorySink::new();
        sink.append(&named("a"), 1, 1.0).unwrap();
        sink.commit().unwrap();
        sink.append(&named("b"), 2, 2.0).unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.batches.len(), 2);
        assert_eq!(sink.committed_points().count(), 2);
        assert!(sink.pending.is_empty());
    }

    #[test]
    fn test_memory_sink_commit_failure() {
        let mut sink = MemorySink {
            fail_commit: Some("disk full".into()),
            ..MemorySink::default()
        };
        sink.append(&named("a"), 1, 1.0).unwrap();
        assert!(sink.commit().is_err());
    }

    #[test]
    fn test_boxed_sink() {
        let mut sink: Box<dyn Sink> = Box::new(DryRunSink::new());
        sink.append(&named("a"), 1, 1.0).unwrap();
        sink.commit().unwrap();
    }
}
