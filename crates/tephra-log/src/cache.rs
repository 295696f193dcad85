//! Block read cache with FIFO eviction and hit-rate reporting.
//!
//! Blocks are keyed by their global block number (`address / BLOCK_SIZE`).
//! Only full blocks are cached; the partially written tail block is always
//! read from disk so concurrent appends stay visible.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cache block size in bytes.
pub const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Default)]
struct BlockCacheInner {
    map: HashMap<u64, Arc<[u8]>>,
    queue: VecDeque<u64>,
}

/// FIFO block cache. A capacity of zero disables caching entirely.
#[derive(Debug)]
pub(crate) struct BlockCache {
    inner: Mutex<BlockCacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BlockCacheInner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, block_no: u64) -> Option<Arc<[u8]>> {
        if self.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let inner = self.inner.lock();
        match inner.map.get(&block_no) {
            Some(block) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(block))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub(crate) fn insert(&self, block_no: u64, block: Arc<[u8]>) {
        if self.capacity == 0 || block.len() != usize::try_from(BLOCK_SIZE).unwrap_or(usize::MAX) {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.map.insert(block_no, block).is_none() {
            inner.queue.push_back(block_no);
            while inner.map.len() > self.capacity {
                if let Some(evicted) = inner.queue.pop_front() {
                    inner.map.remove(&evicted);
                } else {
                    break;
                }
            }
        }
    }

    /// Drop every cached block at or past `first_block`. Called on
    /// high-address rollback so stale tail data can never be served.
    pub(crate) fn purge_from(&self, first_block: u64) {
        let mut inner = self.inner.lock();
        inner.map.retain(|&block_no, _| block_no < first_block);
        inner.queue.retain(|&block_no| block_no < first_block);
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.queue.clear();
    }

    pub(crate) fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                hits as f64 / total as f64
            }
        }
    }
}
