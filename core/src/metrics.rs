//! Shuffle counters.
//!
//! Metrics are injected into the orchestrator as an `Arc<ShuffleMetrics>`
//! rather than living in a global, so each run (and each test) observes
//! only its own counts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated while the shuffle runs. Observability only.
#[derive(Debug, Default)]
pub struct ShuffleMetrics {
    queued_reduce_jobs: AtomicU64,
    records_merged: AtomicU64,
    key_groups: AtomicU64,
    files_decoded: AtomicU64,
    active_shards: AtomicU64,
    peak_active_shards: AtomicU64,
}

/// A point-in-time copy of [`ShuffleMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queued_reduce_jobs: u64,
    pub records_merged: u64,
    pub key_groups: u64,
    pub files_decoded: u64,
    pub active_shards: u64,
    pub peak_active_shards: u64,
}

impl ShuffleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One batch was handed to the output queue.
    pub fn record_batch(&self) {
        self.queued_reduce_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records(&self, n: u64) {
        self.records_merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_key_group(&self) {
        self.key_groups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file(&self) {
        self.files_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// A reduce shard started merging.
    pub fn shard_started(&self) {
        let active = self.active_shards.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_active_shards.fetch_max(active, Ordering::AcqRel);
    }

    pub fn shard_finished(&self) {
        self.active_shards.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queued_reduce_jobs: self.queued_reduce_jobs.load(Ordering::Acquire),
            records_merged: self.records_merged.load(Ordering::Acquire),
            key_groups: self.key_groups.load(Ordering::Acquire),
            files_decoded: self.files_decoded.load(Ordering::Acquire),
            active_shards: self.active_shards.load(Ordering::Acquire),
            peak_active_shards: self.peak_active_shards.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let metrics = ShuffleMetrics::new();
        metrics.record_batch();
        metrics.record_batch();
        metrics.record_records(7);
        metrics.record_key_group();
        metrics.record_file();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                queued_reduce_jobs: 2,
                records_merged: 7,
                key_groups: 1,
                files_decoded: 1,
                active_shards: 0,
                peak_active_shards: 0,
            }
        );
    }

    #[test]
    fn test_active_shard_gauge_keeps_peak() {
        let metrics = ShuffleMetrics::new();
        metrics.shard_started();
        metrics.shard_started();
        metrics.shard_finished();
        metrics.shard_started();
        metrics.shard_finished();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_shards, 1);
        assert_eq!(snapshot.peak_active_shards, 2);
    }
}
