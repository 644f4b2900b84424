//! Per-key cardinality reporting.
//!
//! The merge engine reports every closed key-group exactly once. The
//! production indexer persists those counts into the reduce shard's store
//! from a background task so the merge loop never waits on storage.

use std::sync::Arc;

use async_trait::async_trait;
use bulkshuffle_common::{BatchOperation, Storage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::{decode_varint, encode_varint};
use crate::error::{ShuffleError, ShuffleResult};

/// Key prefix under which counts are stored.
pub const COUNT_INDEX_PREFIX: &[u8] = b"\x00cnt\x00";

/// Number of counts written to the store per batch.
pub const COUNT_FLUSH_THRESHOLD: usize = 1024;

/// Counts queued for the writer before `add_key_group` waits.
pub const COUNT_CHANNEL_CAPACITY: usize = 4 * COUNT_FLUSH_THRESHOLD;

/// Receives the cardinality of every key-group seen by one merge.
#[async_trait]
pub trait CountIndex: Send {
    /// Record that `key` occurred `count` times. Called once per key-group.
    async fn add_key_group(&mut self, key: &[u8], count: usize) -> ShuffleResult<()>;

    /// Finish all outstanding work. The shard is not done until this returns.
    async fn wait(self: Box<Self>) -> ShuffleResult<()>;
}

/// Store key holding the count for `key`.
pub fn count_index_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(COUNT_INDEX_PREFIX.len() + key.len());
    out.extend_from_slice(COUNT_INDEX_PREFIX);
    out.extend_from_slice(key);
    out
}

/// Decode a stored count value.
pub fn decode_count(value: &[u8]) -> ShuffleResult<u64> {
    let mut pos = 0;
    let count = decode_varint(value, &mut pos).map_err(|e| {
        ShuffleError::Storage(bulkshuffle_common::CommonError::deserialization_error(
            format!("invalid count value: {}", e),
        ))
    })?;
    Ok(count)
}

/// Writes key-group counts into a shard's store.
pub struct StoreCountIndexer {
    tx: Option<mpsc::Sender<(Vec<u8>, usize)>>,
    writer: JoinHandle<ShuffleResult<u64>>,
    store: Arc<dyn Storage>,
}

impl StoreCountIndexer {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        let (tx, rx) = mpsc::channel(COUNT_CHANNEL_CAPACITY);
        let writer = tokio::spawn(write_counts(rx, Arc::clone(&store)));
        Self {
            tx: Some(tx),
            writer,
            store,
        }
    }
}

async fn write_counts(
    mut rx: mpsc::Receiver<(Vec<u8>, usize)>,
    store: Arc<dyn Storage>,
) -> ShuffleResult<u64> {
    let mut written = 0u64;
    let mut batch = Vec::with_capacity(COUNT_FLUSH_THRESHOLD);
    while let Some((key, count)) = rx.recv().await {
        let mut value = Vec::with_capacity(4);
        encode_varint(count as u64, &mut value);
        batch.push(BatchOperation::Put {
            key: count_index_key(&key),
            value,
        });
        if batch.len() >= COUNT_FLUSH_THRESHOLD {
            written += batch.len() as u64;
            store.batch_write(std::mem::take(&mut batch)).await?;
        }
    }
    if !batch.is_empty() {
        written += batch.len() as u64;
        store.batch_write(batch).await?;
    }
    Ok(written)
}

#[async_trait]
impl CountIndex for StoreCountIndexer {
    async fn add_key_group(&mut self, key: &[u8], count: usize) -> ShuffleResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ShuffleError::TaskFailed("count indexer already closed".into()))?;
        if tx.send((key.to_vec(), count)).await.is_err() {
            // The writer stopped early; its error is reported by `wait`.
            return Err(ShuffleError::TaskFailed(
                "count index writer stopped".into(),
            ));
        }
        Ok(())
    }

    async fn wait(mut self: Box<Self>) -> ShuffleResult<()> {
        drop(self.tx.take());
        let written = (&mut self.writer).await??;
        self.store.flush().await?;
        debug!(key_groups = written, "count index written");
        Ok(())
    }
}
