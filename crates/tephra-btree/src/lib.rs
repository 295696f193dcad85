//! Copy-on-write persistent B-tree over the Tephra log.
//!
//! An immutable [`BTree`] is materialized from a root address and never
//! changes; a [`BTreeMutable`] overlays pending mutations on top of one and
//! [`BTreeMutable::save`] appends only the dirty nodes, returning the new
//! root together with every superseded node as an expired loggable. The
//! environment publishes new roots atomically, which is what gives
//! transactions snapshot isolation for free: a reader keeps resolving the
//! old root for as long as it likes.

pub mod mutable;
pub mod node;

pub use mutable::{BTreeMutable, TreeSave};
pub use node::{Node, INTERNAL_TYPE, LEAF_TYPE};

use std::sync::Arc;

use tephra_error::Result;
use tephra_log::Log;
use tephra_types::{Address, StructureId};

/// Node split threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancePolicy {
    max_entries: usize,
}

impl BalancePolicy {
    /// Default maximum entries per node.
    pub const DEFAULT_MAX_ENTRIES: usize = 128;

    /// Create a policy. `max_entries` below 4 is clamped up: a smaller
    /// bound cannot keep separators meaningful across splits.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(4),
        }
    }

    /// The split threshold.
    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

/// A decoded node plus its on-disk length, as held by a node cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNode {
    /// The decoded node.
    pub node: Node,
    /// On-disk record length, header included.
    pub length: u64,
}

/// Address-keyed cache of decoded nodes. Implemented by the environment;
/// the tree works fine without one.
pub trait NodeCache: Send + Sync {
    /// Look up a decoded node.
    fn get(&self, address: Address) -> Option<Arc<CachedNode>>;
    /// Remember a decoded node.
    fn insert(&self, address: Address, node: Arc<CachedNode>);
}

/// An immutable tree materialized from a root address.
#[derive(Clone)]
pub struct BTree {
    log: Arc<Log>,
    cache: Option<Arc<dyn NodeCache>>,
    policy: BalancePolicy,
    structure_id: StructureId,
    duplicates: bool,
    root: Option<Address>,
}

impl BTree {
    /// Materialize a tree from `root` (`None` for an empty tree).
    #[must_use]
    pub fn new(
        log: Arc<Log>,
        cache: Option<Arc<dyn NodeCache>>,
        policy: BalancePolicy,
        structure_id: StructureId,
        duplicates: bool,
        root: Option<Address>,
    ) -> Self {
        Self {
            log,
            cache,
            policy,
            structure_id,
            duplicates,
            root,
        }
    }

    /// The root address, or `None` for an empty tree.
    #[must_use]
    pub const fn root(&self) -> Option<Address> {
        self.root
    }

    /// This tree re-rooted at `root`, sharing the log, cache, and policy.
    #[must_use]
    pub fn with_root(&self, root: Option<Address>) -> Self {
        Self {
            root,
            ..self.clone()
        }
    }

    /// The structure id this tree belongs to.
    #[must_use]
    pub const fn structure_id(&self) -> StructureId {
        self.structure_id
    }

    /// Whether the tree holds several values per key.
    #[must_use]
    pub const fn duplicates(&self) -> bool {
        self.duplicates
    }

    /// The split policy.
    #[must_use]
    pub const fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// The log this tree reads from.
    #[must_use]
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// Whether the tree has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Look up `key`. For trees with duplicates this returns the smallest
    /// value bound to the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(mut address) = self.root else {
            return Ok(None);
        };
        loop {
            let cached = self.load_node(address)?;
            match &cached.node {
                Node::Leaf { entries } => {
                    let idx = entries.partition_point(|(k, _)| k.as_slice() < key);
                    return Ok(entries
                        .get(idx)
                        .filter(|(k, _)| k.as_slice() == key)
                        .map(|(_, v)| v.clone()));
                }
                Node::Internal { keys, children } => {
                    let idx = child_index(keys, key);
                    address = children[idx];
                }
            }
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// In-order iterator over all entries.
    #[must_use]
    pub fn iter(&self) -> BTreeIter<'_> {
        BTreeIter {
            tree: self,
            stack: match self.root {
                Some(root) => vec![Frame {
                    address: root,
                    node: None,
                    next: 0,
                }],
                None => Vec::new(),
            },
        }
    }

    /// Start a mutation overlay on this snapshot.
    #[must_use]
    pub fn mutable(&self) -> BTreeMutable {
        BTreeMutable::new(self.clone())
    }

    pub(crate) fn load_node(&self, address: Address) -> Result<Arc<CachedNode>> {
        if let Some(cache) = &self.cache {
            if let Some(node) = cache.get(address) {
                return Ok(node);
            }
        }
        let record = self.log.read(address)?;
        let node = Node::decode(record.type_id, &record.data)?;
        let cached = Arc::new(CachedNode {
            node,
            length: record.length,
        });
        if let Some(cache) = &self.cache {
            cache.insert(address, Arc::clone(&cached));
        }
        Ok(cached)
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("structure_id", &self.structure_id)
            .field("duplicates", &self.duplicates)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Index of the child whose subtree may contain `key`.
pub(crate) fn child_index(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|k| k.as_slice() <= key).saturating_sub(1)
}

struct Frame {
    address: Address,
    node: Option<Arc<CachedNode>>,
    next: usize,
}

/// In-order entry iterator. Yields `Err` once and stops on a broken tree.
pub struct BTreeIter<'a> {
    tree: &'a BTree,
    stack: Vec<Frame>,
}

impl Iterator for BTreeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let cached = match &frame.node {
                Some(cached) => Arc::clone(cached),
                None => match self.tree.load_node(frame.address) {
                    Ok(cached) => {
                        frame.node = Some(Arc::clone(&cached));
                        cached
                    }
                    Err(err) => {
                        self.stack.clear();
                        return Some(Err(err));
                    }
                },
            };
            match &cached.node {
                Node::Leaf { entries } => {
                    if frame.next < entries.len() {
                        let entry = entries[frame.next].clone();
                        frame.next += 1;
                        return Some(Ok(entry));
                    }
                    self.stack.pop();
                }
                Node::Internal { children, .. } => {
                    if frame.next < children.len() {
                        let child = children[frame.next];
                        frame.next += 1;
                        self.stack.push(Frame {
                            address: child,
                            node: None,
                            next: 0,
                        });
                    } else {
                        self.stack.pop();
                    }
                }
            }
        }
    }
}
