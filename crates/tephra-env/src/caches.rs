//! Environment-level caches.
//!
//! Both caches are capped FIFO maps with hit-rate counters, rebuilt
//! wholesale when their configured size changes. Entries are keyed by log
//! addresses of immutable data (a published tree root, a node record), so
//! a cached value can never go stale; rollback of the log's high address is
//! handled by dropping the affected environment caches along with the
//! log's own block cache.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tephra_btree::{CachedNode, NodeCache};
use tephra_types::Address;

fn hit_rate(hits: &AtomicU64, misses: &AtomicU64) -> f64 {
    let hits = hits.load(Ordering::Relaxed);
    let misses = misses.load(Ordering::Relaxed);
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

// ---------------------------------------------------------------------------
// StoreGetCache
// ---------------------------------------------------------------------------

type StoreGetKey = (Address, Box<[u8]>);

#[derive(Debug, Default)]
struct StoreGetInner {
    map: HashMap<StoreGetKey, Arc<[u8]>>,
    queue: VecDeque<StoreGetKey>,
}

/// Caches committed store lookups, keyed by the store tree's root address
/// and the key bytes. The root address pins the version, so hits are
/// always consistent with the transaction's snapshot.
#[derive(Debug)]
pub struct StoreGetCache {
    inner: Mutex<StoreGetInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StoreGetCache {
    /// Cache with room for `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreGetInner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached value for `key` in the store version rooted at `root`.
    #[must_use]
    pub fn get(&self, root: Address, key: &[u8]) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        match inner.map.get(&(root, Box::from(key))) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.to_vec())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remember a committed lookup.
    pub fn insert(&self, root: Address, key: &[u8], value: &[u8]) {
        let mut inner = self.inner.lock();
        let cache_key: StoreGetKey = (root, Box::from(key));
        if inner.map.insert(cache_key.clone(), Arc::from(value)).is_none() {
            inner.queue.push_back(cache_key);
            while inner.map.len() > self.capacity {
                if let Some(evicted) = inner.queue.pop_front() {
                    inner.map.remove(&evicted);
                } else {
                    break;
                }
            }
        }
    }

    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        hit_rate(&self.hits, &self.misses)
    }
}

// ---------------------------------------------------------------------------
// TreeNodesCache
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TreeNodesInner {
    map: HashMap<Address, Arc<CachedNode>>,
    queue: VecDeque<Address>,
}

/// Caches decoded tree nodes by their log address.
#[derive(Debug)]
pub struct TreeNodesCache {
    inner: Mutex<TreeNodesInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TreeNodesCache {
    /// Cache with room for `capacity` nodes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TreeNodesInner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        hit_rate(&self.hits, &self.misses)
    }
}

impl NodeCache for TreeNodesCache {
    fn get(&self, address: Address) -> Option<Arc<CachedNode>> {
        let inner = self.inner.lock();
        match inner.map.get(&address) {
            Some(node) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(node))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, address: Address, node: Arc<CachedNode>) {
        let mut inner = self.inner.lock();
        if inner.map.insert(address, node).is_none() {
            inner.queue.push_back(address);
            while inner.map.len() > self.capacity {
                if let Some(evicted) = inner.queue.pop_front() {
                    inner.map.remove(&evicted);
                } else {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tephra_btree::Node;

    #[test]
    fn store_get_cache_is_version_keyed() {
        let cache = StoreGetCache::new(4);
        cache.insert(Address::new(100), b"k", b"v1");
        cache.insert(Address::new(200), b"k", b"v2");
        assert_eq!(cache.get(Address::new(100), b"k").as_deref(), Some(&b"v1"[..]));
        assert_eq!(cache.get(Address::new(200), b"k").as_deref(), Some(&b"v2"[..]));
        assert_eq!(cache.get(Address::new(300), b"k"), None);
        let rate = cache.hit_rate();
        assert!(rate > 0.5 && rate < 1.0);
    }

    #[test]
    fn store_get_cache_evicts_fifo() {
        let cache = StoreGetCache::new(2);
        cache.insert(Address::new(1), b"a", b"1");
        cache.insert(Address::new(1), b"b", b"2");
        cache.insert(Address::new(1), b"c", b"3");
        assert_eq!(cache.get(Address::new(1), b"a"), None);
        assert!(cache.get(Address::new(1), b"c").is_some());
    }

    #[test]
    fn tree_nodes_cache_round_trips() {
        let cache = TreeNodesCache::new(2);
        let node = Arc::new(CachedNode {
            node: Node::Leaf { entries: vec![] },
            length: 3,
        });
        cache.insert(Address::new(7), Arc::clone(&node));
        let cached = NodeCache::get(&cache, Address::new(7)).expect("cached node");
        assert_eq!(cached.length, 3);
        assert!(NodeCache::get(&cache, Address::new(8)).is_none());
    }
}
