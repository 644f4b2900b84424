//! Rebalances map output directories across reduce shards.
//!
//! The map phase leaves one directory per map shard under the temporary
//! directory. Before merging, those directories are moved under a fixed
//! number of reduce shard directories so that every reduce shard receives a
//! similar amount of data. Moving is a rename, so no data is copied.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ShuffleError, ShuffleResult};

/// Directory name prefix of reduce shards under the temporary directory.
pub const REDUCE_SHARD_PREFIX: &str = "shard_";

/// A map shard directory and its size on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapShard {
    pub path: PathBuf,
    pub size: u64,
}

/// The map shards assigned to one reduce shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReduceShardPlan {
    pub index: usize,
    pub total_size: u64,
    pub map_shards: Vec<MapShard>,
}

/// Assign map shards to `reduce_shards` bins with the greedy longest
/// processing time heuristic: the largest remaining map shard always goes
/// to the currently smallest reduce shard.
///
/// The result has exactly `reduce_shards` entries. Its largest total never
/// exceeds `sum / reduce_shards + max(size)`.
pub fn plan_assignment(map_shards: &[MapShard], reduce_shards: usize) -> Vec<ReduceShardPlan> {
    let mut plans: Vec<ReduceShardPlan> = (0..reduce_shards)
        .map(|index| ReduceShardPlan {
            index,
            ..Default::default()
        })
        .collect();
    if reduce_shards == 0 {
        return plans;
    }

    let mut ordered: Vec<&MapShard> = map_shards.iter().collect();
    ordered.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    // Min-heap on (cumulative size, index); equal sizes pick the lower index.
    let mut loads: BinaryHeap<Reverse<(u64, usize)>> =
        (0..reduce_shards).map(|i| Reverse((0, i))).collect();
    for shard in ordered {
        if let Some(Reverse((load, index))) = loads.pop() {
            let plan = &mut plans[index];
            plan.total_size = load + shard.size;
            plan.map_shards.push(shard.clone());
            loads.push(Reverse((plan.total_size, index)));
        }
    }
    plans
}

/// Moves map shard directories into reduce shard directories.
#[derive(Debug, Clone)]
pub struct ShardBalancer {
    tmp_dir: PathBuf,
    reduce_shards: usize,
}

impl ShardBalancer {
    pub fn new<P: Into<PathBuf>>(tmp_dir: P, reduce_shards: usize) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            reduce_shards,
        }
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Path of reduce shard `index`.
    pub fn reduce_shard_path(&self, index: usize) -> PathBuf {
        self.tmp_dir
            .join(format!("{}{}", REDUCE_SHARD_PREFIX, index))
    }

    fn is_reduce_shard_name(name: &str) -> bool {
        name.strip_prefix(REDUCE_SHARD_PREFIX)
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Reject `shard_N` directories that do not belong to this layout.
    ///
    /// Such a directory would be neither moved nor merged, so the run must
    /// stop before any map shard is renamed.
    fn check_reduce_shard_names(&self) -> ShuffleResult<()> {
        for path in list_dirs(&self.tmp_dir)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !Self::is_reduce_shard_name(name) {
                continue;
            }
            let in_range = name[REDUCE_SHARD_PREFIX.len()..]
                .parse::<usize>()
                .is_ok_and(|index| index < self.reduce_shards);
            if !in_range {
                return Err(ShuffleError::config(format!(
                    "{} is not one of the {} reduce shards",
                    path.display(),
                    self.reduce_shards
                )));
            }
        }
        Ok(())
    }

    /// The map shard directories currently under the temporary directory.
    pub fn map_shards(&self) -> ShuffleResult<Vec<MapShard>> {
        let mut shards = Vec::new();
        for path in list_dirs(&self.tmp_dir)? {
            let is_reduce_shard = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(Self::is_reduce_shard_name);
            if is_reduce_shard {
                continue;
            }
            let size = dir_size(&path)?;
            shards.push(MapShard { path, size });
        }
        Ok(shards)
    }

    /// Create the reduce shard directories and move every map shard into
    /// one of them. Returns the reduce shard directories, largest first.
    ///
    /// This is destructive: the map shards no longer exist at their
    /// original paths afterwards.
    pub fn rebalance(&self) -> ShuffleResult<Vec<PathBuf>> {
        self.check_reduce_shard_names()?;
        let map_shards = self.map_shards()?;
        info!(
            tmp_dir = %self.tmp_dir.display(),
            map_shards = map_shards.len(),
            reduce_shards = self.reduce_shards,
            "rebalancing map shards"
        );

        for index in 0..self.reduce_shards {
            let dir = self.reduce_shard_path(index);
            fs::create_dir_all(&dir).map_err(|e| ShuffleError::io(&dir, e))?;
        }

        for plan in plan_assignment(&map_shards, self.reduce_shards) {
            let dest_dir = self.reduce_shard_path(plan.index);
            for shard in &plan.map_shards {
                let name = shard.path.file_name().ok_or_else(|| {
                    ShuffleError::config(format!(
                        "map shard path {} has no file name",
                        shard.path.display()
                    ))
                })?;
                let dest = dest_dir.join(name);
                fs::rename(&shard.path, &dest).map_err(|e| ShuffleError::io(&shard.path, e))?;
                debug!(
                    from = %shard.path.display(),
                    to = %dest.display(),
                    size = shard.size,
                    "moved map shard"
                );
            }
            debug!(
                shard = plan.index,
                total_size = plan.total_size,
                map_shards = plan.map_shards.len(),
                "reduce shard assigned"
            );
        }

        let dirs = self.reduce_shard_dirs()?;
        info!(reduce_shards = dirs.len(), "rebalancing finished");
        Ok(dirs)
    }

    /// Every directory under the temporary directory, largest first, so the
    /// biggest reduce shard is shuffled first.
    pub fn reduce_shard_dirs(&self) -> ShuffleResult<Vec<PathBuf>> {
        let mut sized = list_dirs(&self.tmp_dir)?
            .into_iter()
            .map(|path| dir_size(&path).map(|size| (path, size)))
            .collect::<ShuffleResult<Vec<_>>>()?;
        sized.sort_by(|(pa, a), (pb, b)| b.cmp(a).then_with(|| pa.cmp(pb)));
        Ok(sized.into_iter().map(|(path, _)| path).collect())
    }
}

fn list_dirs(dir: &Path) -> ShuffleResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ShuffleError::io(dir, e))? {
        let entry = entry.map_err(|e| ShuffleError::io(dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ShuffleError::io(entry.path(), e))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Total size of the regular files under `path`, recursively.
pub fn dir_size(path: &Path) -> ShuffleResult<u64> {
    let meta = fs::symlink_metadata(path).map_err(|e| ShuffleError::io(path, e))?;
    if !meta.is_dir() {
        return Ok(if meta.is_file() { meta.len() } else { 0 });
    }
    let mut total = 0;
    for entry in fs::read_dir(path).map_err(|e| ShuffleError::io(path, e))? {
        let entry = entry.map_err(|e| ShuffleError::io(path, e))?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

/// All regular files under `dir`, recursively, in sorted order.
pub fn files_in_tree(dir: &Path) -> ShuffleResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> ShuffleResult<()> {
    for entry in fs::read_dir(dir).map_err(|e| ShuffleError::io(dir, e))? {
        let entry = entry.map_err(|e| ShuffleError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| ShuffleError::io(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{TestResult, quickcheck};
    use tempfile::TempDir;

    fn shard(name: &str, size: u64) -> MapShard {
        MapShard {
            path: PathBuf::from(name),
            size,
        }
    }

    fn totals(plans: &[ReduceShardPlan]) -> Vec<u64> {
        plans.iter().map(|p| p.total_size).collect()
    }

    #[test]
    fn test_largest_goes_to_smallest() {
        let shards = vec![
            shard("a", 10),
            shard("b", 9),
            shard("c", 5),
            shard("d", 5),
        ];
        let plans = plan_assignment(&shards, 2);
        assert_eq!(totals(&plans), vec![15, 14]);
    }

    #[test]
    fn test_more_reduce_shards_than_map_shards() {
        let plans = plan_assignment(&[shard("a", 3)], 3);
        assert_eq!(plans.len(), 3);
        assert_eq!(totals(&plans), vec![3, 0, 0]);
        assert!(plans[1].map_shards.is_empty());
    }

    #[test]
    fn test_equal_loads_pick_lowest_index() {
        let plans = plan_assignment(&[shard("a", 4), shard("b", 4)], 2);
        assert_eq!(plans[0].map_shards[0].path, PathBuf::from("a"));
        assert_eq!(plans[1].map_shards[0].path, PathBuf::from("b"));
    }

    #[test]
    fn prop_every_shard_assigned_once_and_bounded() {
        fn prop(sizes: Vec<u32>, n: u8) -> TestResult {
            let n = n as usize % 16;
            if n == 0 {
                return TestResult::discard();
            }
            let shards: Vec<MapShard> = sizes
                .iter()
                .enumerate()
                .map(|(i, &s)| shard(&format!("m{:04}", i), s as u64))
                .collect();
            let plans = plan_assignment(&shards, n);

            let mut assigned: Vec<&PathBuf> = plans
                .iter()
                .flat_map(|p| p.map_shards.iter().map(|m| &m.path))
                .collect();
            assigned.sort();
            let mut expected: Vec<&PathBuf> = shards.iter().map(|m| &m.path).collect();
            expected.sort();
            if assigned != expected {
                return TestResult::failed();
            }

            let sum: u64 = shards.iter().map(|m| m.size).sum();
            let largest = shards.iter().map(|m| m.size).max().unwrap_or(0);
            let worst = plans.iter().map(|p| p.total_size).max().unwrap_or(0);
            TestResult::from_bool(plans.len() == n && worst <= sum / n as u64 + largest)
        }
        quickcheck(prop as fn(Vec<u32>, u8) -> TestResult);
    }

    fn make_map_shard(root: &Path, name: &str, files: &[usize]) {
        let dir = root.join(name).join("nested");
        fs::create_dir_all(&dir).unwrap();
        for (i, size) in files.iter().enumerate() {
            fs::write(dir.join(format!("{:03}.map", i)), vec![0u8; *size]).unwrap();
        }
    }

    #[test]
    fn test_rebalance_moves_every_map_shard() {
        let tmp = TempDir::new().unwrap();
        make_map_shard(tmp.path(), "map_a", &[6, 4]);
        make_map_shard(tmp.path(), "map_b", &[9]);
        make_map_shard(tmp.path(), "map_c", &[5]);
        make_map_shard(tmp.path(), "map_d", &[2, 3]);

        let balancer = ShardBalancer::new(tmp.path(), 2);
        assert_eq!(balancer.map_shards().unwrap().len(), 4);
        let dirs = balancer.rebalance().unwrap();

        assert_eq!(dirs.len(), 2);
        for name in ["map_a", "map_b", "map_c", "map_d"] {
            assert!(!tmp.path().join(name).exists());
            let homes = (0..2)
                .filter(|i| balancer.reduce_shard_path(*i).join(name).is_dir())
                .count();
            assert_eq!(homes, 1, "{} must live in exactly one reduce shard", name);
        }

        let sizes: Vec<u64> = dirs.iter().map(|d| dir_size(d).unwrap()).collect();
        assert_eq!(sizes, vec![15, 14]);
        assert!(balancer.map_shards().unwrap().is_empty());
    }

    #[test]
    fn test_rebalance_creates_empty_reduce_shards() {
        let tmp = TempDir::new().unwrap();
        make_map_shard(tmp.path(), "only", &[1]);
        let dirs = ShardBalancer::new(tmp.path(), 3).rebalance().unwrap();
        assert_eq!(dirs.len(), 3);
        assert_eq!(files_in_tree(&dirs[0]).unwrap().len(), 1);
        assert!(files_in_tree(&dirs[2]).unwrap().is_empty());
    }

    #[test]
    fn test_stray_reduce_shard_fails_before_moving() {
        let tmp = TempDir::new().unwrap();
        make_map_shard(tmp.path(), "map_a", &[4]);
        make_map_shard(tmp.path(), "shard_5", &[1]);

        let balancer = ShardBalancer::new(tmp.path(), 2);
        assert!(matches!(
            balancer.rebalance(),
            Err(ShuffleError::Config(_))
        ));
        assert!(tmp.path().join("map_a").is_dir());
        assert!(!balancer.reduce_shard_path(0).exists());
    }

    #[test]
    fn test_existing_reduce_shards_in_range_are_kept() {
        let tmp = TempDir::new().unwrap();
        make_map_shard(tmp.path(), "shard_1", &[3]);
        make_map_shard(tmp.path(), "map_a", &[4]);

        let dirs = ShardBalancer::new(tmp.path(), 2).rebalance().unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(!tmp.path().join("map_a").exists());
    }

    #[test]
    fn test_missing_tmp_dir_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let balancer = ShardBalancer::new(tmp.path().join("absent"), 2);
        assert!(matches!(
            balancer.rebalance(),
            Err(ShuffleError::Io { .. })
        ));
    }

    #[test]
    fn test_files_in_tree_is_recursive_and_sorted() {
        let tmp = TempDir::new().unwrap();
        make_map_shard(tmp.path(), "b", &[1, 1]);
        make_map_shard(tmp.path(), "a", &[1]);
        let files = files_in_tree(tmp.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.windows(2).all(|w| w[0] < w[1]));
        assert!(files[0].starts_with(tmp.path().join("a")));
    }
}
