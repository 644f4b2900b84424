//! Bulkshuffle Core - the shuffle stage of an offline bulk loader
//!
//! The map phase leaves sorted, varint-framed record files grouped into map
//! shard directories. This crate rebalances those directories into a fixed
//! number of reduce shards and k-way merges every reduce shard into
//! key-group aligned batches, ready to be written into per-shard stores.

pub mod balancer;
pub mod codec;
pub mod config;
pub mod count_index;
pub mod decoder;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod record;
pub mod shuffler;

pub use balancer::{MapShard, ReduceShardPlan, ShardBalancer, files_in_tree, plan_assignment};
pub use codec::{RecordWriter, write_map_output};
pub use config::ShuffleConfig;
pub use count_index::{CountIndex, StoreCountIndexer, count_index_key, decode_count};
pub use decoder::{DecodedRecord, StreamDecoder, spawn_decoder};
pub use error::{ShuffleError, ShuffleResult};
pub use merge::{MergeEngine, MergeStats, ShuffleOutput};
pub use metrics::{MetricsSnapshot, ShuffleMetrics};
pub use record::Record;
pub use shuffler::{ShuffleSummary, Shuffler};
