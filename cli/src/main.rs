//! `bulkshuffle` - runs the shuffle stage of a bulk load from the command line.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bulkshuffle_common::Storage;
use bulkshuffle_core::{ShuffleConfig, ShuffleMetrics, ShuffleOutput, Shuffler};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{Level, info};

#[derive(Debug, Parser, PartialEq)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, help = "JSON configuration file; flags override its values")]
    config: Option<PathBuf>,

    #[arg(long, help = "Directory holding the map shards")]
    tmp_dir: Option<PathBuf>,

    #[arg(long, help = "Root directory of the per-shard output stores")]
    out_dir: Option<PathBuf>,

    #[arg(long, help = "Number of reduce shards", value_parser = parse_positive)]
    reduce_shards: Option<usize>,

    #[arg(
        long,
        help = "Reduce shards merged at once. Default: all available cores",
        value_parser = parse_positive
    )]
    shufflers: Option<usize>,

    #[arg(long, help = "Records per output batch", value_parser = parse_positive)]
    batch_size: Option<usize>,

    #[arg(long, help = "Capacity of each decoder channel", value_parser = parse_positive)]
    channel_capacity: Option<usize>,

    #[arg(long, help = "Capacity of the output queue", default_value_t = 1000)]
    queue_capacity: usize,

    #[arg(short, long, help = "Log at debug level")]
    verbose: bool,
}

impl Args {
    fn shuffle_config(&self) -> anyhow::Result<ShuffleConfig> {
        let mut config = match &self.config {
            Some(path) => ShuffleConfig::from_json_file(path)?,
            None => ShuffleConfig {
                num_shufflers: num_cpus::get(),
                ..Default::default()
            },
        };

        if let Some(tmp_dir) = &self.tmp_dir {
            config.tmp_dir = tmp_dir.clone();
        }
        if let Some(reduce_shards) = self.reduce_shards {
            config.reduce_shards = reduce_shards;
        }
        if let Some(shufflers) = self.shufflers {
            config.num_shufflers = shufflers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(out_dir) = &self.out_dir {
            config = config.with_output_root(out_dir);
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Default)]
struct ShardTally {
    batches: u64,
    records: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = args.shuffle_config()?;
    info!(
        tmp_dir = %config.tmp_dir.display(),
        reduce_shards = config.reduce_shards,
        num_shufflers = config.num_shufflers,
        batch_size = config.batch_size,
        "bulkshuffle starting"
    );

    let metrics = Arc::new(ShuffleMetrics::new());
    let (tx, rx) = mpsc::channel(args.queue_capacity.max(1));
    let drain = tokio::spawn(drain_queue(rx));

    let summary = Shuffler::new(config, Arc::clone(&metrics))
        .run(tx)
        .await
        .context("shuffle failed")?;
    let (tallies, stores) = drain.await.context("output drain task failed")?;

    for (shard, store) in stores {
        store
            .close()
            .await
            .with_context(|| format!("closing store of shard {}", shard))?;
    }
    for (shard, tally) in &tallies {
        info!(
            shard,
            batches = tally.batches,
            records = tally.records,
            "shard drained"
        );
    }

    let snapshot = metrics.snapshot();
    info!(
        shards = summary.shards,
        files = summary.files,
        records = summary.records,
        key_groups = summary.key_groups,
        batches = summary.batches,
        queued_reduce_jobs = snapshot.queued_reduce_jobs,
        "bulkshuffle finished"
    );
    Ok(())
}

/// Consume the output queue until the shuffler closes it.
async fn drain_queue(
    mut rx: mpsc::Receiver<ShuffleOutput>,
) -> (BTreeMap<usize, ShardTally>, BTreeMap<usize, Arc<dyn Storage>>) {
    let mut tallies: BTreeMap<usize, ShardTally> = BTreeMap::new();
    let mut stores = BTreeMap::new();
    while let Some(output) = rx.recv().await {
        let tally = tallies.entry(output.shard).or_default();
        tally.batches += 1;
        tally.records += output.entries.len() as u64;
        stores.entry(output.shard).or_insert(output.store);
    }
    (tallies, stores)
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Invalid positive number '{value}'")),
    }
}
