//! Staged block pipeline.
//!
//! ```text
//! Reader (serial) ──► Workers (parallel, round-robin) ──► Writer (serial, order-restoring)
//! ```
//!
//! The reader and writer each run on a single thread; workers own their
//! block codec state. A [`BackpressureController`] bounds the number of
//! chunks alive between reader and writer, and the writer restores block
//! order through an [`OrderedWriter`]. Cancellation and the first error are
//! shared state passed into every stage.

pub mod backpressure;
pub mod compress;
pub mod config;
pub mod decompress;
pub mod ordered;
pub mod sink;
pub mod source;
pub mod state;

use std::time::{Duration, Instant};

pub use backpressure::BackpressureController;
pub use compress::CompressionPipeline;
pub use config::{CompressionConfig, DecompressionConfig};
pub use decompress::DecompressionPipeline;
pub use ordered::{BlockSink, OrderedWriter, Sequenced};
pub use sink::{DecodedBlock, FastqSink};
pub use source::{ChunkSource, ReorderedSource, StreamingSource};
pub use state::{CancelHandle, NodeState};

/// Called from the writer stage; returning `false` cancels the run.
pub type ProgressCallback = Box<dyn FnMut(&ProgressInfo) -> bool + Send>;

/// Totals from the last run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStats {
    pub total_reads: u64,
    pub total_blocks: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub processing_time_ms: u64,
    pub threads_used: usize,
}

impl PipelineStats {
    /// Input over output size.
    pub fn compression_ratio(&self) -> f64 {
        if self.output_bytes == 0 {
            return 0.0;
        }
        self.input_bytes as f64 / self.output_bytes as f64
    }

    /// Archive bits spent per base; `bases` is supplied by the caller.
    pub fn bits_per_base(&self, bases: u64) -> f64 {
        if bases == 0 {
            return 0.0;
        }
        (self.output_bytes * 8) as f64 / bases as f64
    }

    /// Input megabytes per second.
    pub fn throughput_mbps(&self) -> f64 {
        if self.processing_time_ms == 0 {
            return 0.0;
        }
        (self.input_bytes as f64 / (1024.0 * 1024.0)) / (self.processing_time_ms as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressInfo {
    pub reads_processed: u64,
    /// Zero when unknown (streaming input).
    pub total_reads: u64,
    /// Bytes written so far.
    pub bytes_processed: u64,
    pub current_block: u32,
    pub elapsed_ms: u64,
}

impl ProgressInfo {
    /// Fraction done in `[0, 1]`, or 0 when the total is unknown.
    pub fn ratio(&self) -> f64 {
        if self.total_reads == 0 {
            return 0.0;
        }
        (self.reads_processed as f64 / self.total_reads as f64).min(1.0)
    }

    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        if self.reads_processed == 0 || self.total_reads == 0 {
            return None;
        }
        let left = self.total_reads.saturating_sub(self.reads_processed);
        Some((self.elapsed_ms as u128 * left as u128 / self.reads_processed as u128) as u64)
    }
}

/// Rate-limits progress callbacks.
pub(crate) struct ProgressReporter<'a> {
    callback: Option<&'a mut ProgressCallback>,
    interval: Duration,
    last: Option<Instant>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<&'a mut ProgressCallback>, interval_ms: u64) -> Self {
        Self {
            callback,
            interval: Duration::from_millis(interval_ms),
            last: None,
        }
    }

    /// False when the callback asked to stop.
    pub fn report(&mut self, info: impl FnOnce() -> ProgressInfo) -> bool {
        let Some(callback) = self.callback.as_mut() else {
            return true;
        };
        let now = Instant::now();
        if let Some(last) = self.last {
            if now.duration_since(last) < self.interval {
                return true;
            }
        }
        self.last = Some(now);
        callback(&info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_ratios() {
        let stats = PipelineStats {
            input_bytes: 4 * 1024 * 1024,
            output_bytes: 1024 * 1024,
            processing_time_ms: 2000,
            ..Default::default()
        };
        assert_eq!(stats.compression_ratio(), 4.0);
        assert_eq!(stats.throughput_mbps(), 2.0);
        assert_eq!(stats.bits_per_base(1024 * 1024 * 8), 1.0);
        assert_eq!(PipelineStats::default().compression_ratio(), 0.0);
    }

    #[test]
    fn test_progress_estimates() {
        let info = ProgressInfo {
            reads_processed: 25,
            total_reads: 100,
            elapsed_ms: 1000,
            ..Default::default()
        };
        assert_eq!(info.ratio(), 0.25);
        assert_eq!(info.estimated_remaining_ms(), Some(3000));
        assert_eq!(ProgressInfo::default().estimated_remaining_ms(), None);
    }

    #[test]
    fn test_reporter_interval_zero_reports_every_call() {
        let mut calls = 0;
        let mut cb: ProgressCallback = Box::new(move |_| {
            calls += 1;
            calls < 2
        });
        let mut reporter = ProgressReporter::new(Some(&mut cb), 0);
        assert!(reporter.report(ProgressInfo::default));
        assert!(!reporter.report(ProgressInfo::default));
    }
}
