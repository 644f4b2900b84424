//! Destination store abstraction using trait-based design.
//!
//! Each reduce shard writes into exactly one store handle. The handle is
//! backed by the object_store crate, either in memory or on the local
//! filesystem, and can buffer writes in memory when per-write durability
//! is not required.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    ObjectStore, PutPayload, local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath,
};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CommonError, Result};

/// Number of object puts issued concurrently when the write buffer is committed.
const COMMIT_CONCURRENCY: usize = 16;

/// Generic storage trait for async key-value operations.
///
/// This trait provides a unified interface for the per-shard output store
/// without exposing the underlying implementation details.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    /// Get a value from storage by key.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert a key-value pair into storage.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key from storage.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists in storage.
    async fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Get all key-value pairs with a given prefix, ordered by key.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Perform a batch write operation.
    async fn batch_write(&self, operations: Vec<BatchOperation>) -> Result<()>;

    /// Commit any buffered writes to the backend.
    async fn flush(&self) -> Result<()>;

    /// Get storage statistics.
    async fn stats(&self) -> StorageStats;

    /// Flush and release resources.
    async fn close(&self) -> Result<()>;
}

/// Batch operation for grouped writes.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Storage statistics.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub read_count: u64,
    pub write_count: u64,
    pub delete_count: u64,
    pub batch_count: u64,
    pub error_count: u64,
    pub commit_count: u64,
    pub buffered_entries: u64,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    /// In-memory storage for testing and development.
    #[default]
    Memory,
    /// Local filesystem storage rooted at `root_path`.
    LocalFileSystem { root_path: PathBuf },
}

/// Configuration for storage creation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage backend to use.
    pub backend: StorageBackend,
    /// Optional prefix for all keys.
    pub key_prefix: Option<String>,
    /// Write every put through to the backend before returning.
    pub sync_writes: bool,
    /// Number of buffered entries that triggers a commit when `sync_writes` is off.
    pub write_buffer_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            key_prefix: None,
            sync_writes: true,
            write_buffer_entries: 4096,
        }
    }
}

impl StorageConfig {
    /// Settings for a shuffle destination: local files, no per-write durability.
    ///
    /// The content is rebuildable from the reduce output, so writes are
    /// buffered and committed in bulk. No background maintenance is ever
    /// scheduled against the store.
    pub fn for_bulk_load<P: Into<PathBuf>>(dir: P, write_buffer_entries: usize) -> Self {
        Self {
            backend: StorageBackend::LocalFileSystem {
                root_path: dir.into(),
            },
            key_prefix: None,
            sync_writes: false,
            write_buffer_entries: write_buffer_entries.max(1),
        }
    }
}

/// Builder for creating storage instances.
pub struct StorageBuilder {
    config: StorageConfig,
}

impl StorageBuilder {
    /// Create a new storage builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: StorageConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Set the storage backend.
    pub fn backend(mut self, backend: StorageBackend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set a key prefix for all operations.
    pub fn key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.key_prefix = Some(prefix.into());
        self
    }

    /// Toggle write-through on every put.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.config.sync_writes = enabled;
        self
    }

    /// Set the write buffer size used when `sync_writes` is off.
    pub fn write_buffer_entries(mut self, entries: usize) -> Self {
        self.config.write_buffer_entries = entries.max(1);
        self
    }

    /// Build a storage instance with the specified configuration.
    pub async fn build(self) -> Result<Arc<dyn Storage>> {
        let storage = ObjectStoreStorage::new(self.config).await?;
        Ok(Arc::new(storage))
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal statistics tracker for storage operations.
#[derive(Debug, Default)]
struct InternalStorageStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
    errors: AtomicU64,
    commits: AtomicU64,
}

impl InternalStorageStats {
    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    fn get_stats(&self, buffered_entries: u64) -> StorageStats {
        StorageStats {
            read_count: self.reads.load(Ordering::Acquire),
            write_count: self.writes.load(Ordering::Acquire),
            delete_count: self.deletes.load(Ordering::Acquire),
            batch_count: self.batches.load(Ordering::Acquire),
            error_count: self.errors.load(Ordering::Acquire),
            commit_count: self.commits.load(Ordering::Acquire),
            buffered_entries,
        }
    }
}

/// Pending writes. `None` marks a buffered delete.
type WriteBuffer = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Object store-based storage implementation.
///
/// Buffered entries stay in `buffer` until the backend holds them, so a
/// read never falls between the two. Commits run one at a time under
/// `commit_lock`.
struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    config: StorageConfig,
    stats: Arc<InternalStorageStats>,
    buffer: Mutex<WriteBuffer>,
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for ObjectStoreStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreStorage")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ObjectStoreStorage {
    async fn new(config: StorageConfig) -> Result<Self> {
        let stats = Arc::new(InternalStorageStats::default());

        let store: Arc<dyn ObjectStore> = match &config.backend {
            StorageBackend::Memory => Arc::new(InMemory::new()),
            StorageBackend::LocalFileSystem { root_path } => {
                tokio::fs::create_dir_all(root_path).await.map_err(|e| {
                    CommonError::io_error_with_source(
                        format!("Failed to create store directory {}", root_path.display()),
                        e,
                    )
                })?;
                let fs = LocalFileSystem::new_with_prefix(root_path).map_err(|e| {
                    CommonError::storage_error_with_source(
                        format!(
                            "Failed to create local filesystem storage at {}",
                            root_path.display()
                        ),
                        e,
                    )
                })?;
                Arc::new(fs)
            }
        };

        Ok(Self {
            store,
            config,
            stats,
            buffer: Mutex::new(BTreeMap::new()),
            commit_lock: Mutex::new(()),
        })
    }

    /// Convert a byte key to an object store path.
    ///
    /// Keys are hex encoded behind a `k` marker so the empty key still
    /// names a file.
    fn key_to_path(&self, key: &[u8]) -> ObjectPath {
        let hex_key = format!("k{}", hex::encode(key));

        let path_str = if let Some(prefix) = &self.config.key_prefix {
            format!("{}/{}", prefix, hex_key)
        } else {
            hex_key
        };

        ObjectPath::from(path_str)
    }

    /// Convert an object store path back to a byte key.
    fn path_to_key(&self, path: &ObjectPath) -> Result<Vec<u8>> {
        let path_str = path.as_ref();

        let file_name = if let Some(prefix) = &self.config.key_prefix {
            let prefix_with_slash = format!("{}/", prefix);
            path_str.strip_prefix(&prefix_with_slash).ok_or_else(|| {
                CommonError::storage_error(format!(
                    "Path does not start with expected prefix: {}",
                    path_str
                ))
            })?
        } else {
            path_str
        };

        let hex_key = file_name.strip_prefix('k').ok_or_else(|| {
            CommonError::storage_error(format!("Path is not a store key: {}", path_str))
        })?;

        hex::decode(hex_key).map_err(|e| {
            CommonError::storage_error_with_source(
                format!("Failed to decode hex key {}", hex_key),
                e,
            )
        })
    }

    /// Convert object store error to CommonError.
    fn convert_error(error: object_store::Error) -> CommonError {
        CommonError::storage_error_with_source("Object store operation failed", error)
    }

    async fn store_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.key_to_path(key);
        match self.store.get(&path).await {
            Ok(get_result) => {
                let bytes = get_result.bytes().await.map_err(Self::convert_error)?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => {
                self.stats.record_error();
                Err(Self::convert_error(e))
            }
        }
    }

    async fn store_put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let path = self.key_to_path(key);
        if let Err(e) = self.store.put(&path, PutPayload::from(value)).await {
            self.stats.record_error();
            return Err(Self::convert_error(e));
        }
        Ok(())
    }

    async fn store_delete(&self, key: &[u8]) -> Result<()> {
        let path = self.key_to_path(key);
        match self.store.delete(&path).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => {
                self.stats.record_error();
                Err(Self::convert_error(e))
            }
        }
    }

    /// Write the buffered entries to the backend.
    ///
    /// Entries leave the buffer only after the backend holds them, and only
    /// if no newer write replaced them in the meantime.
    async fn commit(&self) -> Result<()> {
        let _commit = self.commit_lock.lock().await;
        let pending = self.buffer.lock().await.clone();
        if pending.is_empty() {
            return Ok(());
        }

        let entries = pending.len();
        futures::stream::iter(pending.clone())
            .map(|(key, value)| async move {
                match value {
                    Some(value) => self.store_put(&key, value).await,
                    None => self.store_delete(&key).await,
                }
            })
            .buffer_unordered(COMMIT_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        let mut buffer = self.buffer.lock().await;
        for (key, value) in pending {
            if buffer.get(&key) == Some(&value) {
                buffer.remove(&key);
            }
        }
        drop(buffer);

        self.stats.record_commit();
        debug!(entries, "committed store write buffer");
        Ok(())
    }

    /// Buffer a write, committing the buffer once it is full.
    async fn buffer_write(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<()> {
        let full = {
            let mut buffer = self.buffer.lock().await;
            buffer.insert(key.to_vec(), value);
            buffer.len() >= self.config.write_buffer_entries
        };
        if full {
            self.commit().await
        } else {
            Ok(())
        }
    }

    /// Look up a key in the write buffer. The outer `None` means "not buffered".
    async fn buffered(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.buffer.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl Storage for ObjectStoreStorage {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.stats.record_read();
        if let Some(buffered) = self.buffered(key).await {
            return Ok(buffered);
        }
        self.store_get(key).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.stats.record_write();
        if self.config.sync_writes {
            self.store_put(key, value.to_vec()).await
        } else {
            self.buffer_write(key, Some(value.to_vec())).await
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.stats.record_delete();
        if self.config.sync_writes {
            self.store_delete(key).await
        } else {
            self.buffer_write(key, None).await
        }
    }

    async fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.stats.record_read();
        if let Some(buffered) = self.buffered(key).await {
            return Ok(buffered.is_some());
        }

        let path = self.key_to_path(key);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => {
                self.stats.record_error();
                Err(Self::convert_error(e))
            }
        }
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.stats.record_read();
        // Listing and buffer must not straddle a commit.
        let _commit = self.commit_lock.lock().await;

        // Hex keys share one path segment, so list the key space and filter.
        let root = self
            .config
            .key_prefix
            .as_ref()
            .map(|p| ObjectPath::from(p.as_str()));
        let mut keys = Vec::new();
        let mut stream = self.store.list(root.as_ref());
        while let Some(result) = stream.next().await {
            let meta = result.map_err(|e| {
                self.stats.record_error();
                Self::convert_error(e)
            })?;
            if let Ok(key) = self.path_to_key(&meta.location) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.store_get(&key).await? {
                merged.insert(key, value);
            }
        }

        let buffer = self.buffer.lock().await;
        for (key, value) in buffer.iter().filter(|(k, _)| k.starts_with(prefix)) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    async fn batch_write(&self, operations: Vec<BatchOperation>) -> Result<()> {
        // Object stores don't support atomic batches, apply in order.
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.put(&key, &value).await?;
                }
                BatchOperation::Delete { key } => {
                    self.delete(&key).await?;
                }
            }
        }

        self.stats.record_batch();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.commit().await
    }

    async fn stats(&self) -> StorageStats {
        let buffered = self.buffer.lock().await.len() as u64;
        self.stats.get_stats(buffered)
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = StorageBuilder::new()
            .backend(StorageBackend::Memory)
            .build()
            .await
            .expect("Failed to create memory storage");

        storage
            .put(b"test_key", b"test_value")
            .await
            .expect("Failed to put");

        let value = storage.get(b"test_key").await.expect("Failed to get");
        assert_eq!(value, Some(b"test_value".to_vec()));

        assert!(
            storage
                .contains_key(b"test_key")
                .await
                .expect("Failed to check key")
        );
        assert!(
            !storage
                .contains_key(b"nonexistent")
                .await
                .expect("Failed to check key")
        );

        storage.delete(b"test_key").await.expect("Failed to delete");

        let value = storage.get(b"test_key").await.expect("Failed to get");
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_empty_key_is_storable() {
        let storage = StorageBuilder::new().build().await.unwrap();
        storage.put(b"", b"first").await.unwrap();
        assert_eq!(storage.get(b"").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_local_filesystem_storage_creates_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().join("nested").join("shard_0");

        let storage = StorageBuilder::new()
            .backend(StorageBackend::LocalFileSystem {
                root_path: root_path.clone(),
            })
            .build()
            .await
            .expect("Failed to create local filesystem storage");

        storage
            .put(b"fs_test_key", b"fs_test_value")
            .await
            .expect("Failed to put");

        let value = storage.get(b"fs_test_key").await.expect("Failed to get");
        assert_eq!(value, Some(b"fs_test_value".to_vec()));
        assert!(root_path.is_dir());
    }

    #[tokio::test]
    async fn test_write_buffer_commits_on_flush() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::for_bulk_load(temp_dir.path(), 100);

        let writer = StorageBuilder::from_config(config.clone())
            .build()
            .await
            .unwrap();
        writer.put(b"alpha", b"1").await.unwrap();
        assert_eq!(writer.get(b"alpha").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(writer.stats().await.buffered_entries, 1);

        // A second handle on the same directory only sees committed data.
        let reader = StorageBuilder::from_config(config).build().await.unwrap();
        assert_eq!(reader.get(b"alpha").await.unwrap(), None);

        writer.flush().await.unwrap();
        assert_eq!(reader.get(b"alpha").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(writer.stats().await.buffered_entries, 0);
    }

    #[tokio::test]
    async fn test_write_buffer_commits_when_full() {
        let storage = StorageBuilder::new()
            .sync_writes(false)
            .write_buffer_entries(2)
            .build()
            .await
            .unwrap();

        storage.put(b"a", b"1").await.unwrap();
        assert_eq!(storage.stats().await.commit_count, 0);
        storage.put(b"b", b"2").await.unwrap();

        let stats = storage.stats().await;
        assert_eq!(stats.commit_count, 1);
        assert_eq!(stats.buffered_entries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acknowledged_put_stays_readable_during_commit() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageBuilder::from_config(StorageConfig::for_bulk_load(temp_dir.path(), 64))
            .build()
            .await
            .unwrap();

        for round in 0..20 {
            let key = format!("z{}", round);
            storage.put(key.as_bytes(), b"v").await.unwrap();

            // 63 more puts fill the buffer and start a commit.
            let filler = {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move {
                    for i in 0..63 {
                        let key = format!("f{}_{}", round, i);
                        storage.put(key.as_bytes(), b"x").await.unwrap();
                    }
                })
            };

            while !filler.is_finished() {
                assert_eq!(
                    storage.get(key.as_bytes()).await.unwrap(),
                    Some(b"v".to_vec()),
                    "round {}",
                    round
                );
                tokio::task::yield_now().await;
            }
            filler.await.unwrap();
            assert_eq!(storage.get(key.as_bytes()).await.unwrap(), Some(b"v".to_vec()));
            assert!(storage.contains_key(key.as_bytes()).await.unwrap());
        }

        let stats = storage.stats().await;
        assert_eq!(stats.commit_count, 20);
        assert_eq!(stats.buffered_entries, 0);
    }

    #[tokio::test]
    async fn test_flush_after_threshold_commit_exposes_every_put() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::for_bulk_load(temp_dir.path(), 32);
        let storage = StorageBuilder::from_config(config.clone())
            .build()
            .await
            .unwrap();
        let reader = StorageBuilder::from_config(config).build().await.unwrap();

        for i in 0..32 {
            storage.put(format!("k{:02}", i).as_bytes(), b"1").await.unwrap();
        }
        storage.put(b"k99", b"2").await.unwrap();
        storage.flush().await.unwrap();

        // After flush returns, another handle sees every acknowledged put.
        let all = reader.scan_prefix(b"k").await.unwrap();
        assert_eq!(all.len(), 33);
    }

    #[tokio::test]
    async fn test_newer_buffered_value_survives_commit() {
        let storage = StorageBuilder::new()
            .sync_writes(false)
            .write_buffer_entries(100)
            .build()
            .await
            .unwrap();

        storage.put(b"key", b"old").await.unwrap();
        storage.flush().await.unwrap();
        storage.put(b"key", b"new").await.unwrap();
        storage.flush().await.unwrap();
        assert_eq!(storage.get(b"key").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(storage.stats().await.buffered_entries, 0);
    }

    #[tokio::test]
    async fn test_buffered_delete_hides_committed_value() {
        let storage = StorageBuilder::new()
            .sync_writes(false)
            .write_buffer_entries(10)
            .build()
            .await
            .unwrap();

        storage.put(b"gone", b"v").await.unwrap();
        storage.flush().await.unwrap();
        storage.delete(b"gone").await.unwrap();

        assert_eq!(storage.get(b"gone").await.unwrap(), None);
        assert!(!storage.contains_key(b"gone").await.unwrap());
        storage.close().await.unwrap();
        assert_eq!(storage.get(b"gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_merges_buffer_and_backend() {
        let storage = StorageBuilder::new()
            .sync_writes(false)
            .write_buffer_entries(100)
            .build()
            .await
            .unwrap();

        storage.put(b"prefix1_key1", b"value1").await.unwrap();
        storage.put(b"other_key", b"value4").await.unwrap();
        storage.flush().await.unwrap();
        storage.put(b"prefix1_key2", b"value2").await.unwrap();
        storage.put(b"prefix2_key1", b"value3").await.unwrap();

        let pairs = storage.scan_prefix(b"prefix1").await.expect("Failed to scan");
        assert_eq!(
            pairs,
            vec![
                (b"prefix1_key1".to_vec(), b"value1".to_vec()),
                (b"prefix1_key2".to_vec(), b"value2".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let storage = StorageBuilder::new().key_prefix("counts").build().await.unwrap();

        let operations = vec![
            BatchOperation::Put {
                key: b"batch_key1".to_vec(),
                value: b"batch_value1".to_vec(),
            },
            BatchOperation::Put {
                key: b"batch_key2".to_vec(),
                value: b"batch_value2".to_vec(),
            },
            BatchOperation::Delete {
                key: b"batch_key1".to_vec(),
            },
        ];

        storage
            .batch_write(operations)
            .await
            .expect("Failed to batch write");

        assert_eq!(storage.get(b"batch_key1").await.unwrap(), None);
        assert_eq!(
            storage.get(b"batch_key2").await.unwrap(),
            Some(b"batch_value2".to_vec())
        );
        assert_eq!(
            storage.scan_prefix(b"batch").await.unwrap(),
            vec![(b"batch_key2".to_vec(), b"batch_value2".to_vec())]
        );

        let stats = storage.stats().await;
        assert_eq!(stats.batch_count, 1);
        assert_eq!(stats.write_count, 2);
        assert_eq!(stats.delete_count, 1);
    }
}
