//! Log construction parameters and the runtime-adjustable knobs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Default maximum segment size: 8 MiB.
pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 8 * 1024 * 1024;

/// Default background sync period in milliseconds.
pub const DEFAULT_SYNC_PERIOD_MS: u64 = 1000;

/// Default block read cache capacity, in blocks.
pub const DEFAULT_READ_CACHE_BLOCKS: usize = 1024;

/// Parameters the log is opened with.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the segment files.
    pub location: PathBuf,
    /// Maximum size of one segment file. Records never span segments;
    /// a record that does not fit pads the segment and rolls to a new one.
    pub segment_max_bytes: u64,
    /// How often non-durable appends are synced to disk.
    pub sync_period_ms: u64,
    /// Whether every append is synced before returning.
    pub durable_write: bool,
    /// Block read cache capacity, in blocks. Zero disables the cache.
    pub read_cache_blocks: usize,
}

impl LogConfig {
    /// Config with defaults for the given location.
    #[must_use]
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            sync_period_ms: DEFAULT_SYNC_PERIOD_MS,
            durable_write: false,
            read_cache_blocks: DEFAULT_READ_CACHE_BLOCKS,
        }
    }

    /// Override the maximum segment size.
    #[must_use]
    pub fn with_segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes;
        self
    }

    /// Override the durable-write flag.
    #[must_use]
    pub fn with_durable_write(mut self, durable: bool) -> Self {
        self.durable_write = durable;
        self
    }
}

/// The knobs the environment forwards configuration changes to while the
/// log is running.
#[derive(Debug)]
pub struct LogRuntime {
    sync_period_ms: AtomicU64,
    durable_write: AtomicBool,
}

impl LogRuntime {
    pub(crate) fn new(config: &LogConfig) -> Self {
        Self {
            sync_period_ms: AtomicU64::new(config.sync_period_ms),
            durable_write: AtomicBool::new(config.durable_write),
        }
    }

    /// Current sync period in milliseconds.
    #[must_use]
    pub fn sync_period_ms(&self) -> u64 {
        self.sync_period_ms.load(Ordering::Relaxed)
    }

    /// Adjust the sync period.
    pub fn set_sync_period_ms(&self, period: u64) {
        self.sync_period_ms.store(period, Ordering::Relaxed);
    }

    /// Whether appends sync before returning.
    #[must_use]
    pub fn durable_write(&self) -> bool {
        self.durable_write.load(Ordering::Relaxed)
    }

    /// Toggle durable writes.
    pub fn set_durable_write(&self, durable: bool) {
        self.durable_write.store(durable, Ordering::Relaxed);
    }
}
