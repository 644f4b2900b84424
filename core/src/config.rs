//! Configuration for a shuffle run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::balancer::REDUCE_SHARD_PREFIX;
use crate::decoder::DEFAULT_READ_BUFFER_SIZE;
use crate::error::{ShuffleError, ShuffleResult};
use crate::merge::DEFAULT_BATCH_SIZE;

/// Settings consumed by [`crate::Shuffler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Root of the map shard tree. Reduce shards are created inside it.
    pub tmp_dir: PathBuf,
    /// Fixed number of reduce shards
    pub reduce_shards: usize,
    /// Maximum number of reduce shards merging at once
    pub num_shufflers: usize,
    /// One destination store directory per reduce shard
    pub shard_output_dirs: Vec<PathBuf>,
    /// Records per batch before a batch may close
    pub batch_size: usize,
    /// Capacity of each decoder's channel
    pub channel_capacity: usize,
    /// Read buffer in front of each map output file
    pub read_buffer_size: usize,
    /// Buffered store writes before a commit
    pub store_write_buffer_entries: usize,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("tmp"),
            reduce_shards: 1,
            num_shufflers: 1,
            shard_output_dirs: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: 1000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            store_write_buffer_entries: 4096,
        }
    }
}

impl ShuffleConfig {
    pub fn new<P: Into<PathBuf>>(tmp_dir: P, reduce_shards: usize, num_shufflers: usize) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            reduce_shards,
            num_shufflers,
            ..Default::default()
        }
    }

    /// Use `root/shard_{i}` as the output directory of every reduce shard.
    pub fn with_output_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        self.shard_output_dirs = (0..self.reduce_shards)
            .map(|i| root.join(format!("{}{}", REDUCE_SHARD_PREFIX, i)))
            .collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ShuffleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ShuffleError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            ShuffleError::config(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Check the preconditions of a run. Nothing is touched on disk.
    pub fn validate(&self) -> ShuffleResult<()> {
        if self.reduce_shards == 0 {
            return Err(ShuffleError::config("reduce_shards must be positive"));
        }
        if self.num_shufflers == 0 {
            return Err(ShuffleError::config("num_shufflers must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ShuffleError::config("batch_size must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(ShuffleError::config("channel_capacity must be positive"));
        }
        if self.shard_output_dirs.len() != self.reduce_shards {
            return Err(ShuffleError::config(format!(
                "{} shard output dirs configured for {} reduce shards",
                self.shard_output_dirs.len(),
                self.reduce_shards
            )));
        }
        Ok(())
    }
}
