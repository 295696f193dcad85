//! Append-only segmented record log for the Tephra storage engine.
//!
//! The log is the single shared persistence substrate: trees serialize
//! their nodes as records, the environment serializes its meta-tree root
//! markers, and the garbage collector reclaims superseded records. The
//! only mutation besides appending is [`Log::set_high_address`], the
//! truncate-forward rollback a failed commit relies on.

pub mod cache;
pub mod config;
pub mod log;
pub mod loggable;

pub use cache::BLOCK_SIZE;
pub use config::{
    LogConfig, LogRuntime, DEFAULT_READ_CACHE_BLOCKS, DEFAULT_SEGMENT_MAX_BYTES,
    DEFAULT_SYNC_PERIOD_MS,
};
pub use log::{Log, LOG_FILE_EXTENSION};
pub use loggable::{record_len, ExpiredLoggable, Loggable, PADDING_TYPE};
