//! K-way merge of sorted record streams into key-group aligned batches.
//!
//! Each reduce shard runs one merge. It owns a binary heap holding the
//! current head of every input stream and repeatedly takes the smallest
//! key. Contiguous runs of one key form a key-group; a batch is only closed
//! at a key-group boundary, and each group's size is reported to the count
//! index once the group has closed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::sync::Arc;

use bulkshuffle_common::Storage;
use tokio::sync::mpsc;

use crate::count_index::CountIndex;
use crate::decoder::DecodedRecord;
use crate::error::{ShuffleError, ShuffleResult};
use crate::metrics::ShuffleMetrics;
use crate::record::Record;

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// A batch of merged records for one reduce shard, tagged with that
/// shard's destination store.
#[derive(Debug, Clone)]
pub struct ShuffleOutput {
    pub shard: usize,
    pub entries: Vec<Record>,
    pub store: Arc<dyn Storage>,
}

/// Counts produced by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub records: u64,
    pub key_groups: u64,
    pub batches: u64,
}

/// The head record of one input stream.
///
/// Ordered so that `BinaryHeap` (a max-heap) yields the smallest key first.
/// Equal keys come out in ascending source order, which keeps the merge
/// deterministic.
#[derive(Debug)]
struct HeapNode {
    record: Record,
    source: usize,
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapNode {}

/// Merges the streams of one reduce shard.
pub struct MergeEngine {
    shard: usize,
    store: Arc<dyn Storage>,
    batch_size: usize,
    output: mpsc::Sender<ShuffleOutput>,
    metrics: Arc<ShuffleMetrics>,
}

impl MergeEngine {
    pub fn new(
        shard: usize,
        store: Arc<dyn Storage>,
        batch_size: usize,
        output: mpsc::Sender<ShuffleOutput>,
        metrics: Arc<ShuffleMetrics>,
    ) -> Self {
        Self {
            shard,
            store,
            batch_size: batch_size.max(1),
            output,
            metrics,
        }
    }

    /// Capacity reserved for each new batch, ten percent over the threshold.
    fn batch_alloc(&self) -> usize {
        self.batch_size * 11 / 10
    }

    /// Merge `inputs` until every stream is exhausted.
    ///
    /// Each input must be sorted by key. The first error received from any
    /// input aborts the merge.
    pub async fn merge(
        &self,
        mut inputs: Vec<mpsc::Receiver<DecodedRecord>>,
        count_index: &mut dyn CountIndex,
    ) -> ShuffleResult<MergeStats> {
        let mut heap = BinaryHeap::with_capacity(inputs.len());
        for (source, rx) in inputs.iter_mut().enumerate() {
            if let Some(item) = rx.recv().await {
                heap.push(HeapNode {
                    record: item?,
                    source,
                });
            }
        }

        let mut stats = MergeStats::default();
        let mut batch = Vec::with_capacity(self.batch_alloc());
        let mut prev_key: Option<Vec<u8>> = None;
        let mut group_len = 0usize;

        loop {
            let record = {
                let Some(mut top) = heap.peek_mut() else {
                    break;
                };
                match inputs[top.source].recv().await {
                    // Replacing the head sifts the node down when `top` drops.
                    Some(next) => std::mem::replace(&mut top.record, next?),
                    None => PeekMut::pop(top).record,
                }
            };

            let key_changed = prev_key.as_deref() != Some(record.key.as_slice());
            if key_changed && group_len > 0 {
                if let Some(prev) = prev_key.as_deref() {
                    self.report_group(count_index, prev, group_len, &mut stats)
                        .await?;
                }
                group_len = 0;
            }

            if key_changed && batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_alloc()));
                self.emit(full, &mut stats).await?;
            }

            if key_changed {
                prev_key = Some(record.key.clone());
            }
            batch.push(record);
            group_len += 1;
        }

        if !batch.is_empty() {
            self.emit(batch, &mut stats).await?;
        }
        if group_len > 0 {
            if let Some(prev) = prev_key.as_deref() {
                self.report_group(count_index, prev, group_len, &mut stats)
                    .await?;
            }
        }
        Ok(stats)
    }

    async fn report_group(
        &self,
        count_index: &mut dyn CountIndex,
        key: &[u8],
        count: usize,
        stats: &mut MergeStats,
    ) -> ShuffleResult<()> {
        count_index.add_key_group(key, count).await?;
        self.metrics.record_key_group();
        stats.key_groups += 1;
        Ok(())
    }

    async fn emit(&self, entries: Vec<Record>, stats: &mut MergeStats) -> ShuffleResult<()> {
        let len = entries.len() as u64;
        self.output
            .send(ShuffleOutput {
                shard: self.shard,
                entries,
                store: Arc::clone(&self.store),
            })
            .await
            .map_err(|_| ShuffleError::OutputClosed { shard: self.shard })?;
        self.metrics.record_batch();
        self.metrics.record_records(len);
        stats.records += len;
        stats.batches += 1;
        Ok(())
    }
}
