//! Orchestration of the whole shuffle stage.
//!
//! The shuffler first rebalances the map shards into exactly
//! `reduce_shards` directories, then merges each reduce shard into its own
//! store. At most `num_shufflers` reduce shards merge at the same time; the
//! largest shards are started first.

use std::path::PathBuf;
use std::sync::Arc;

use bulkshuffle_common::{Storage, StorageBuilder, StorageConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::balancer::{ShardBalancer, files_in_tree};
use crate::config::ShuffleConfig;
use crate::count_index::{CountIndex, StoreCountIndexer};
use crate::decoder::{DecodedRecord, spawn_decoder};
use crate::error::{ShuffleError, ShuffleResult};
use crate::merge::{MergeEngine, MergeStats, ShuffleOutput};
use crate::metrics::ShuffleMetrics;

/// Totals for a finished shuffle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShuffleSummary {
    pub shards: usize,
    pub records: u64,
    pub key_groups: u64,
    pub batches: u64,
    pub files: u64,
}

impl ShuffleSummary {
    fn add(&mut self, stats: MergeStats) {
        self.shards += 1;
        self.records += stats.records;
        self.key_groups += stats.key_groups;
        self.batches += stats.batches;
    }
}

/// Runs the shuffle stage of a bulk load.
pub struct Shuffler {
    config: ShuffleConfig,
    metrics: Arc<ShuffleMetrics>,
}

/// Everything one reduce shard task needs.
struct ShardJob {
    shard: usize,
    dir: PathBuf,
    store: Arc<dyn Storage>,
    inputs: Vec<mpsc::Receiver<DecodedRecord>>,
    decoders: Vec<JoinHandle<ShuffleResult<u64>>>,
    batch_size: usize,
    output: mpsc::Sender<ShuffleOutput>,
    metrics: Arc<ShuffleMetrics>,
    permit: OwnedSemaphorePermit,
}

impl Shuffler {
    pub fn new(config: ShuffleConfig, metrics: Arc<ShuffleMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &ShuffleConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ShuffleMetrics> {
        &self.metrics
    }

    /// Run the shuffle, sending merged batches to `output`.
    ///
    /// `output` is dropped when this returns, so the receiving side sees the
    /// queue close once every shard is done. The first failing shard aborts
    /// all others.
    pub async fn run(self, output: mpsc::Sender<ShuffleOutput>) -> ShuffleResult<ShuffleSummary> {
        self.config.validate()?;

        let balancer = ShardBalancer::new(&self.config.tmp_dir, self.config.reduce_shards);
        let shard_dirs = tokio::task::spawn_blocking(move || balancer.rebalance()).await??;
        if shard_dirs.len() != self.config.reduce_shards {
            return Err(ShuffleError::config(format!(
                "expected {} reduce shard directories under {}, found {}",
                self.config.reduce_shards,
                self.config.tmp_dir.display(),
                shard_dirs.len()
            )));
        }

        info!(
            reduce_shards = shard_dirs.len(),
            num_shufflers = self.config.num_shufflers,
            "starting shuffle"
        );

        let limiter = Arc::new(Semaphore::new(self.config.num_shufflers));
        let mut tasks: JoinSet<ShuffleResult<MergeStats>> = JoinSet::new();
        let mut summary = ShuffleSummary::default();

        for (shard, dir) in shard_dirs.into_iter().enumerate() {
            let permit = Arc::clone(&limiter)
                .acquire_owned()
                .await
                .map_err(|e| ShuffleError::TaskFailed(format!("shuffler limiter closed: {}", e)))?;

            // A permit frees up when a shard task ends, successful or not.
            if let Err(e) = reap_finished(&mut tasks, &mut summary) {
                error!(error = %e, "shuffle failed, aborting remaining shards");
                tasks.abort_all();
                return Err(e);
            }

            let job = match self.prepare_shard(shard, dir, &output, permit).await {
                Ok(job) => job,
                Err(e) => {
                    error!(shard, error = %e, "failed to start reduce shard");
                    tasks.abort_all();
                    return Err(e);
                }
            };
            summary.files += job.inputs.len() as u64;
            tasks.spawn(shuffle_shard(job));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(ShuffleError::from).and_then(|r| r) {
                Ok(stats) => summary.add(stats),
                Err(e) => {
                    error!(error = %e, "shuffle failed, aborting remaining shards");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        drop(output);
        info!(
            shards = summary.shards,
            files = summary.files,
            records = summary.records,
            key_groups = summary.key_groups,
            batches = summary.batches,
            "shuffle finished"
        );
        Ok(summary)
    }

    /// Open the shard's store and start one decoder per map output file.
    async fn prepare_shard(
        &self,
        shard: usize,
        dir: PathBuf,
        output: &mpsc::Sender<ShuffleOutput>,
        permit: OwnedSemaphorePermit,
    ) -> ShuffleResult<ShardJob> {
        let store_dir = self.config.shard_output_dirs[shard].clone();
        let store = StorageBuilder::from_config(StorageConfig::for_bulk_load(
            &store_dir,
            self.config.store_write_buffer_entries,
        ))
        .build()
        .await?;

        let files = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || files_in_tree(&dir)).await??
        };
        info!(
            shard,
            dir = %dir.display(),
            store = %store_dir.display(),
            files = files.len(),
            "shuffling reduce shard"
        );

        let mut inputs = Vec::with_capacity(files.len());
        let mut decoders = Vec::with_capacity(files.len());
        for path in files {
            let (rx, handle) = spawn_decoder(
                path,
                self.config.read_buffer_size,
                self.config.channel_capacity,
            );
            self.metrics.record_file();
            inputs.push(rx);
            decoders.push(handle);
        }

        Ok(ShardJob {
            shard,
            dir,
            store,
            inputs,
            decoders,
            batch_size: self.config.batch_size,
            output: output.clone(),
            metrics: Arc::clone(&self.metrics),
            permit,
        })
    }
}

/// Counts a reduce shard as merging for as long as it lives.
struct ActiveShard(Arc<ShuffleMetrics>);

impl ActiveShard {
    fn new(metrics: Arc<ShuffleMetrics>) -> Self {
        metrics.shard_started();
        Self(metrics)
    }
}

impl Drop for ActiveShard {
    fn drop(&mut self) {
        self.0.shard_finished();
    }
}

async fn shuffle_shard(job: ShardJob) -> ShuffleResult<MergeStats> {
    let ShardJob {
        shard,
        dir,
        store,
        inputs,
        decoders,
        batch_size,
        output,
        metrics,
        permit,
    } = job;

    // Declared after `permit`, so it is released first on every exit path.
    let active = ActiveShard::new(Arc::clone(&metrics));

    let engine = MergeEngine::new(shard, Arc::clone(&store), batch_size, output, metrics);
    let mut count_index = Box::new(StoreCountIndexer::new(Arc::clone(&store)));
    let merged = engine.merge(inputs, count_index.as_mut()).await;

    let stats = match merged {
        Ok(stats) => stats,
        Err(e) => {
            for handle in &decoders {
                handle.abort();
            }
            return Err(e);
        }
    };

    for handle in decoders {
        handle.await??;
    }
    count_index.wait().await?;
    store.flush().await?;
    drop(active);
    drop(permit);

    debug!(
        shard,
        dir = %dir.display(),
        records = stats.records,
        key_groups = stats.key_groups,
        batches = stats.batches,
        "reduce shard finished"
    );
    Ok(stats)
}

/// Collect shard tasks that already finished without waiting on the rest.
fn reap_finished(
    tasks: &mut JoinSet<ShuffleResult<MergeStats>>,
    summary: &mut ShuffleSummary,
) -> ShuffleResult<()> {
    while let Some(joined) = tasks.try_join_next() {
        summary.add(joined??);
    }
    Ok(())
}
