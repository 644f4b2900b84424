//! Common test utilities and helpers for integration tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bulkshuffle_core::{Record, ShuffleConfig, ShuffleOutput, write_map_output};
use tokio::sync::mpsc;

/// Build records from `(key, payload)` pairs, sorted by key.
pub fn sorted_records(pairs: &[(&str, &str)]) -> Vec<Record> {
    let mut records: Vec<Record> = pairs
        .iter()
        .map(|(k, v)| Record::new(k.as_bytes(), v.as_bytes()))
        .collect();
    records.sort_by(|a, b| a.key().cmp(b.key()));
    records
}

/// Write one map output file at `tmp/<shard>/<file>`.
pub async fn write_map_file(tmp: &Path, shard: &str, file: &str, pairs: &[(&str, &str)]) -> PathBuf {
    let path = tmp.join(shard).join(file);
    write_map_output(&path, &sorted_records(pairs)).await.unwrap();
    path
}

/// Config with one output store per reduce shard under `out`.
pub fn test_config(tmp: &Path, out: &Path, reduce_shards: usize, num_shufflers: usize) -> ShuffleConfig {
    ShuffleConfig::new(tmp, reduce_shards, num_shufflers).with_output_root(out)
}

/// Drain the output queue until it closes.
pub fn spawn_collector(
    mut rx: mpsc::Receiver<ShuffleOutput>,
) -> tokio::task::JoinHandle<Vec<ShuffleOutput>> {
    tokio::spawn(async move {
        let mut outputs = Vec::new();
        while let Some(output) = rx.recv().await {
            outputs.push(output);
        }
        outputs
    })
}

/// Concatenate the keys of every batch per shard, in queue order.
pub fn keys_by_shard(outputs: &[ShuffleOutput]) -> BTreeMap<usize, Vec<Vec<u8>>> {
    let mut by_shard: BTreeMap<usize, Vec<Vec<u8>>> = BTreeMap::new();
    for output in outputs {
        by_shard
            .entry(output.shard)
            .or_default()
            .extend(output.entries.iter().map(|r| r.key().to_vec()));
    }
    by_shard
}

/// Names of the directories directly under `dir`, sorted.
#[allow(dead_code)]
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
