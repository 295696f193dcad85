//! Mutation overlay and copy-on-write save path.
//!
//! A [`BTreeMutable`] loads nodes lazily along the mutation paths. Loading
//! a node for writing marks its on-disk version expired; `save` then
//! appends the rewritten nodes bottom-up and returns the new root. Nodes
//! off the mutation paths are shared with the base snapshot by address.

use tephra_error::Result;
use tephra_log::ExpiredLoggable;
use tephra_types::Address;

use crate::node::Node;
use crate::{child_index, BTree};

/// Result of saving a mutation overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSave {
    /// New root address, or `None` when the tree ended up empty.
    pub root: Option<Address>,
    /// Every on-disk node superseded by this save.
    pub expired: Vec<ExpiredLoggable>,
}

enum MutChild {
    OnDisk(Address),
    Mem(Box<MutNode>),
}

enum MutNode {
    Leaf {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<MutChild>,
    },
}

impl MutNode {
    fn from_node(node: &Node) -> Self {
        match node {
            Node::Leaf { entries } => Self::Leaf {
                entries: entries.clone(),
            },
            Node::Internal { keys, children } => Self::Internal {
                keys: keys.clone(),
                children: children.iter().copied().map(MutChild::OnDisk).collect(),
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Leaf { entries } => entries.len(),
            Self::Internal { children, .. } => children.len(),
        }
    }

    fn min_key(&self) -> Vec<u8> {
        match self {
            Self::Leaf { entries } => entries.first().map(|(k, _)| k.clone()).unwrap_or_default(),
            Self::Internal { keys, .. } => keys.first().cloned().unwrap_or_default(),
        }
    }
}

struct InsertOutcome {
    changed: bool,
    split: Option<(Vec<u8>, MutNode)>,
}

/// A mutation overlay on one immutable snapshot.
pub struct BTreeMutable {
    base: BTree,
    root: Option<MutChild>,
    expired: Vec<ExpiredLoggable>,
    changed: bool,
}

impl BTreeMutable {
    pub(crate) fn new(base: BTree) -> Self {
        let root = base.root().map(MutChild::OnDisk);
        Self {
            base,
            root,
            expired: Vec::new(),
            changed: false,
        }
    }

    /// Whether any mutation actually changed the tree.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.changed
    }

    /// The snapshot this overlay started from.
    #[must_use]
    pub const fn base(&self) -> &BTree {
        &self.base
    }

    /// Bind `value` to `key`.
    ///
    /// Without duplicates an existing binding is replaced; with duplicates
    /// the pair is added unless it is already present. Returns whether the
    /// tree changed.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let Some(root) = self.root.as_mut() else {
            self.root = Some(MutChild::Mem(Box::new(MutNode::Leaf {
                entries: vec![(key.to_vec(), value.to_vec())],
            })));
            self.changed = true;
            return Ok(true);
        };
        let node = materialize(&self.base, &mut self.expired, root)?;
        let outcome = insert_into(&self.base, &mut self.expired, node, key, value)?;
        if let Some((sep, right)) = outcome.split {
            let Some(MutChild::Mem(left)) = self.root.take() else {
                unreachable!("root was just materialized");
            };
            let left_min = left.min_key();
            self.root = Some(MutChild::Mem(Box::new(MutNode::Internal {
                keys: vec![left_min, sep],
                children: vec![MutChild::Mem(left), MutChild::Mem(Box::new(right))],
            })));
        }
        self.changed |= outcome.changed;
        Ok(outcome.changed)
    }

    /// Remove every binding of `key`. Returns whether anything was
    /// removed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let Some(root) = self.root.as_mut() else {
            return Ok(false);
        };
        let node = materialize(&self.base, &mut self.expired, root)?;
        let removed = delete_from(&self.base, &mut self.expired, node, key)?;
        // Collapse a shrunken root.
        loop {
            let Some(root) = self.root.take() else {
                break;
            };
            match root {
                MutChild::Mem(node) if node.len() == 0 => break,
                MutChild::Mem(mut node) => {
                    if let MutNode::Internal { children, .. } = &mut *node {
                        if children.len() == 1 {
                            self.root = Some(children.pop().expect("single child"));
                            continue;
                        }
                    }
                    self.root = Some(MutChild::Mem(node));
                    break;
                }
                on_disk => {
                    self.root = Some(on_disk);
                    break;
                }
            }
        }
        self.changed |= removed;
        Ok(removed)
    }

    /// Look up `key` through the overlay.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.root {
            None => Ok(None),
            Some(child) => self.get_in(child, key),
        }
    }

    /// Whether `key` is bound through the overlay.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Append all dirty nodes and return the new root plus the superseded
    /// records. A no-op overlay returns the base root and nothing expired.
    pub fn save(self) -> Result<TreeSave> {
        if !self.changed {
            return Ok(TreeSave {
                root: self.base.root(),
                expired: Vec::new(),
            });
        }
        let root = match self.root {
            None => None,
            Some(child) => Some(save_child(&self.base, child)?),
        };
        Ok(TreeSave {
            root,
            expired: self.expired,
        })
    }

    fn get_in(&self, child: &MutChild, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match child {
            MutChild::OnDisk(address) => self.base.with_root(Some(*address)).get(key),
            MutChild::Mem(node) => match &**node {
                MutNode::Leaf { entries } => {
                    let idx = entries.partition_point(|(k, _)| k.as_slice() < key);
                    Ok(entries
                        .get(idx)
                        .filter(|(k, _)| k.as_slice() == key)
                        .map(|(_, v)| v.clone()))
                }
                MutNode::Internal { keys, children } => {
                    let idx = child_index(keys, key);
                    self.get_in(&children[idx], key)
                }
            },
        }
    }

}

/// Turn an on-disk child into an in-memory one, expiring its record.
fn materialize<'a>(
    base: &BTree,
    expired: &mut Vec<ExpiredLoggable>,
    child: &'a mut MutChild,
) -> Result<&'a mut MutNode> {
    if let MutChild::OnDisk(address) = child {
        let cached = base.load_node(*address)?;
        expired.push(ExpiredLoggable {
            address: *address,
            length: cached.length,
        });
        *child = MutChild::Mem(Box::new(MutNode::from_node(&cached.node)));
    }
    match child {
        MutChild::Mem(node) => Ok(node),
        MutChild::OnDisk(_) => unreachable!("materialized above"),
    }
}

fn insert_into(
    base: &BTree,
    expired: &mut Vec<ExpiredLoggable>,
    node: &mut MutNode,
    key: &[u8],
    value: &[u8],
) -> Result<InsertOutcome> {
    let max_entries = base.policy().max_entries();
    match node {
        MutNode::Leaf { entries } => {
            let changed = if base.duplicates() {
                let probe = (key.to_vec(), value.to_vec());
                match entries.binary_search(&probe) {
                    Ok(_) => false,
                    Err(idx) => {
                        entries.insert(idx, probe);
                        true
                    }
                }
            } else {
                let idx = entries.partition_point(|(k, _)| k.as_slice() < key);
                match entries.get_mut(idx) {
                    Some((k, v)) if k.as_slice() == key => {
                        if v.as_slice() == value {
                            false
                        } else {
                            *v = value.to_vec();
                            true
                        }
                    }
                    _ => {
                        entries.insert(idx, (key.to_vec(), value.to_vec()));
                        true
                    }
                }
            };
            let split = (entries.len() > max_entries).then(|| {
                let right = entries.split_off(entries.len() / 2);
                let sep = right[0].0.clone();
                (sep, MutNode::Leaf { entries: right })
            });
            Ok(InsertOutcome { changed, split })
        }
        MutNode::Internal { keys, children } => {
            let idx = child_index(keys, key);
            if idx == 0 && keys.first().is_some_and(|k| key < k.as_slice()) {
                keys[0] = key.to_vec();
            }
            let outcome = {
                let child = materialize(base, expired, &mut children[idx])?;
                insert_into(base, expired, child, key, value)?
            };
            if let Some((sep, right)) = outcome.split {
                keys.insert(idx + 1, sep);
                children.insert(idx + 1, MutChild::Mem(Box::new(right)));
            }
            let split = (children.len() > max_entries).then(|| {
                let mid = children.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_children = children.split_off(mid);
                let sep = right_keys[0].clone();
                (
                    sep,
                    MutNode::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )
            });
            Ok(InsertOutcome {
                changed: outcome.changed,
                split,
            })
        }
    }
}

fn delete_from(
    base: &BTree,
    expired: &mut Vec<ExpiredLoggable>,
    node: &mut MutNode,
    key: &[u8],
) -> Result<bool> {
    match node {
        MutNode::Leaf { entries } => {
            let before = entries.len();
            entries.retain(|(k, _)| k.as_slice() != key);
            Ok(entries.len() != before)
        }
        MutNode::Internal { keys, children } => {
            // Duplicate runs can straddle a separator, so visit every
            // child whose range may contain the key.
            let first = child_index(keys, key);
            let mut removed = false;
            let mut idx = first;
            while idx < children.len() && (idx == first || keys[idx].as_slice() <= key) {
                let child_removed = {
                    let child = materialize(base, expired, &mut children[idx])?;
                    delete_from(base, expired, child, key)?
                };
                removed |= child_removed;
                let empty = matches!(&children[idx], MutChild::Mem(node) if node.len() == 0);
                if empty {
                    children.remove(idx);
                    keys.remove(idx);
                } else {
                    idx += 1;
                }
            }
            Ok(removed)
        }
    }
}

impl std::fmt::Debug for BTreeMutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeMutable")
            .field("base", &self.base)
            .field("changed", &self.changed)
            .field("expired", &self.expired.len())
            .finish()
    }
}

fn save_child(base: &BTree, child: MutChild) -> Result<Address> {
    match child {
        MutChild::OnDisk(address) => Ok(address),
        MutChild::Mem(node) => {
            let encoded = match *node {
                MutNode::Leaf { entries } => Node::Leaf { entries },
                MutNode::Internal { keys, children } => {
                    let mut addresses = Vec::with_capacity(children.len());
                    for child in children {
                        addresses.push(save_child(base, child)?);
                    }
                    Node::Internal {
                        keys,
                        children: addresses,
                    }
                }
            };
            base.log().append(encoded.type_id(), &encoded.encode())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BalancePolicy;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tephra_log::{Log, LogConfig};
    use tephra_types::StructureId;

    fn open_log(dir: &std::path::Path) -> Arc<Log> {
        Arc::new(Log::open(&LogConfig::new(dir)).expect("log should open"))
    }

    fn empty_tree(log: &Arc<Log>, duplicates: bool, max_entries: usize) -> BTree {
        BTree::new(
            Arc::clone(log),
            None,
            BalancePolicy::new(max_entries),
            StructureId::new(0x102),
            duplicates,
            None,
        )
    }

    fn reload(tree: &BTree, save: &TreeSave) -> BTree {
        BTree::new(
            Arc::clone(tree.log()),
            None,
            tree.policy(),
            tree.structure_id(),
            tree.duplicates(),
            save.root,
        )
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 8).mutable();
        assert!(mutable.put(b"b", b"2").expect("put"));
        assert!(mutable.put(b"a", b"1").expect("put"));
        assert_eq!(mutable.get(b"a").expect("get").as_deref(), Some(&b"1"[..]));
        let save = mutable.save().expect("save");
        let tree = reload(&empty_tree(&log, false, 8), &save);
        assert_eq!(tree.get(b"a").expect("get").as_deref(), Some(&b"1"[..]));
        assert_eq!(tree.get(b"b").expect("get").as_deref(), Some(&b"2"[..]));
        assert_eq!(tree.get(b"c").expect("get"), None);
    }

    #[test]
    fn overwrite_replaces_without_duplicates() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 8).mutable();
        assert!(mutable.put(b"k", b"old").expect("put"));
        assert!(mutable.put(b"k", b"new").expect("put"));
        assert!(!mutable.put(b"k", b"new").expect("identical put"));
        assert_eq!(mutable.get(b"k").expect("get").as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn duplicates_keep_both_values() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, true, 8).mutable();
        assert!(mutable.put(b"k", b"x").expect("put"));
        assert!(mutable.put(b"k", b"a").expect("put"));
        assert!(!mutable.put(b"k", b"a").expect("repeat pair"));
        let save = mutable.save().expect("save");
        let tree = reload(&empty_tree(&log, true, 8), &save);
        // The smallest value wins a plain lookup.
        assert_eq!(tree.get(b"k").expect("get").as_deref(), Some(&b"a"[..]));
        let entries: Vec<_> = tree.iter().collect::<Result<_>>().expect("iter");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn splits_keep_order_across_many_entries() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 4).mutable();
        for i in (0u32..200).rev() {
            let key = format!("key-{i:04}");
            mutable.put(key.as_bytes(), &i.to_be_bytes()).expect("put");
        }
        let save = mutable.save().expect("save");
        let tree = reload(&empty_tree(&log, false, 4), &save);
        let entries: Vec<_> = tree.iter().collect::<Result<_>>().expect("iter");
        assert_eq!(entries.len(), 200);
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "iteration should be in key order");
        assert_eq!(
            tree.get(b"key-0123").expect("get").as_deref(),
            Some(&123u32.to_be_bytes()[..])
        );
    }

    #[test]
    fn save_reports_expired_nodes() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 4).mutable();
        for i in 0u32..32 {
            mutable.put(&i.to_be_bytes(), b"v").expect("put");
        }
        let first = mutable.save().expect("save");
        assert!(first.expired.is_empty(), "fresh tree supersedes nothing");

        let tree = reload(&empty_tree(&log, false, 4), &first);
        let mut mutable = tree.mutable();
        mutable.put(&5u32.to_be_bytes(), b"w").expect("put");
        let second = mutable.save().expect("save");
        assert!(
            !second.expired.is_empty(),
            "rewriting a path supersedes its nodes"
        );
        for expired in &second.expired {
            assert!(expired.address < log.high_address());
        }
        let tree = reload(&tree, &second);
        assert_eq!(
            tree.get(&5u32.to_be_bytes()).expect("get").as_deref(),
            Some(&b"w"[..])
        );
        // Untouched keys survive the rewrite.
        assert_eq!(
            tree.get(&31u32.to_be_bytes()).expect("get").as_deref(),
            Some(&b"v"[..])
        );
    }

    #[test]
    fn unchanged_overlay_saves_nothing() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 8).mutable();
        mutable.put(b"a", b"1").expect("put");
        let first = mutable.save().expect("save");
        let high = log.high_address();

        let tree = reload(&empty_tree(&log, false, 8), &first);
        let mut mutable = tree.mutable();
        assert!(!mutable.put(b"a", b"1").expect("identical put"));
        assert!(!mutable.has_changes());
        let second = mutable.save().expect("save");
        assert_eq!(second.root, first.root);
        assert!(second.expired.is_empty());
        assert_eq!(log.high_address(), high, "no log writes for a no-op save");
    }

    #[test]
    fn delete_empties_tree() {
        let dir = tempdir().expect("tempdir");
        let log = open_log(dir.path());
        let mut mutable = empty_tree(&log, false, 4).mutable();
        for i in 0u32..16 {
            mutable.put(&i.to_be_bytes(), b"v").expect("put");
        }
        for i in 0u32..16 {
            assert!(mutable.delete(&i.to_be_bytes()).expect("delete"));
        }
        assert!(!mutable.delete(b"absent").expect("delete absent"));
        let save = mutable.save().expect("save");
        assert_eq!(save.root, None, "fully drained tree has no root");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn behaves_like_a_sorted_map(
            ops in proptest::collection::vec(
                (any::<bool>(), 0u8..24, any::<u8>()),
                1..120,
            ),
        ) {
            let dir = tempdir().expect("tempdir");
            let log = open_log(dir.path());
            let mut model = std::collections::BTreeMap::new();
            let mut tree = empty_tree(&log, false, 4);

            // Apply in batches so coverage includes the save/reload cycle.
            for chunk in ops.chunks(16) {
                let mut mutable = tree.mutable();
                for &(is_put, key, value) in chunk {
                    let key = [key];
                    if is_put {
                        mutable.put(&key, &[value]).expect("put");
                        model.insert(key.to_vec(), vec![value]);
                    } else {
                        mutable.delete(&key).expect("delete");
                        model.remove(&key.to_vec());
                    }
                }
                let save = mutable.save().expect("save");
                tree = reload(&tree, &save);
            }

            let entries: Vec<_> = tree.iter().collect::<Result<_>>().expect("iter");
            let expected: Vec<_> = model
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            prop_assert_eq!(entries, expected);
        }
    }
}
