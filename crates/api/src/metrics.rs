use pipeline::{IngestSummary, RunResult};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters across every pipeline run served by this process
#[derive(Default)]
pub struct Metrics {
    total_runs: AtomicUsize,
    successful_runs: AtomicUsize,
    failed_runs: AtomicUsize,
    cancelled_runs: AtomicUsize,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,

    total_chunks_processed: AtomicUsize,
    total_chunks_skipped: AtomicUsize,
    total_nodes_written: AtomicUsize,
    total_relationships_written: AtomicUsize,
    total_chunks_indexed: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, duration: Duration, result: &RunResult<IngestSummary>) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.successful_runs.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        let chunks = result
            .stages
            .get("chunker")
            .and_then(|s| s.summary["chunks"].as_u64())
            .unwrap_or(0) as usize;
        let skipped = result
            .stages
            .get("extractor")
            .and_then(|s| s.summary["skipped"].as_array().map(Vec::len))
            .unwrap_or(0);

        self.total_chunks_processed.fetch_add(chunks, Ordering::Relaxed);
        self.total_chunks_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.total_nodes_written.fetch_add(result.output.nodes_written, Ordering::Relaxed);
        self.total_relationships_written
            .fetch_add(result.output.relationships_written, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(result.output.chunks_indexed, Ordering::Relaxed);
    }

    pub fn record_failure(&self, duration: Duration, cancelled: bool) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if cancelled {
            self.cancelled_runs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_runs.fetch_add(1, Ordering::Relaxed);
        }
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_runs = self.total_runs.load(Ordering::Relaxed);
        let total_us = self.total_run_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_runs,
            successful_runs: self.successful_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
            cancelled_runs: self.cancelled_runs.load(Ordering::Relaxed),
            avg_run_time_ms: if total_runs > 0 {
                total_us / total_runs as f64 / 1000.0
            } else {
                0.0
            },
            total_chunks_processed: self.total_chunks_processed.load(Ordering::Relaxed),
            total_chunks_skipped: self.total_chunks_skipped.load(Ordering::Relaxed),
            total_nodes_written: self.total_nodes_written.load(Ordering::Relaxed),
            total_relationships_written: self.total_relationships_written.load(Ordering::Relaxed),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub cancelled_runs: usize,
    pub avg_run_time_ms: f64,
    pub total_chunks_processed: usize,
    pub total_chunks_skipped: usize,
    pub total_nodes_written: usize,
    pub total_relationships_written: usize,
    pub total_chunks_indexed: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
