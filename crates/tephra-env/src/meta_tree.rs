//! The meta tree: one committed version of the environment.
//!
//! The meta tree is a B-tree under the reserved structure id 1, holding two
//! kinds of entries:
//!
//! - store-name key → encoded [`TreeMetaInfo`] (flags + structure id, no
//!   root);
//! - structure-id key → varint root address of that store's tree, present
//!   only while the store has entries.
//!
//! After every commit a distinguished `ROOT` loggable records the meta
//! tree's own root and the last allocated structure id. Recovery scans for
//! the most recent `ROOT` record; its address doubles as the version the
//! transaction machinery orders itself by: conflict detection, deferred
//! task stamps, and GC bounds all compare these addresses.

use std::sync::Arc;

use tephra_btree::{BTree, BTreeMutable, BalancePolicy, NodeCache};
use tephra_error::{Result, TephraError};
use tephra_log::{record_len, ExpiredLoggable, Log};
use tephra_types::{
    key_to_store_name, read_varint, store_name_to_key, structure_id_to_key, write_varint, Address,
    StructureId, TreeMetaInfo,
};

/// Loggable type of the per-commit meta tree root marker.
pub const META_ROOT_TYPE: u8 = 8;

const ROOT_FLAG_HAS_TREE: u8 = 0b0000_0001;

/// One committed version of the environment's store directory. Immutable
/// after publication; cheap to clone.
#[derive(Debug, Clone)]
pub struct MetaTree {
    tree: BTree,
    /// Address of the `ROOT` loggable publishing this version, or `None`
    /// for the pristine state of an empty log.
    root: Option<Address>,
    /// On-disk length of that `ROOT` loggable.
    root_length: u64,
}

impl MetaTree {
    /// Recover the current meta tree from the log, returning it together
    /// with the largest structure id in use.
    pub fn create(
        log: &Arc<Log>,
        cache: Option<Arc<dyn NodeCache>>,
        policy: BalancePolicy,
    ) -> Result<(Self, StructureId)> {
        let mut newest: Option<(Address, u64, Option<Address>, u32)> = None;
        log.scan(Address::ZERO, |record| {
            if record.type_id == META_ROOT_TYPE {
                if let Some((tree_root, last_id)) = decode_root_record(&record.data) {
                    newest = Some((record.address, record.length, tree_root, last_id));
                }
            }
            true
        })?;
        let (root, root_length, tree_root, last_id) = match newest {
            Some((address, length, tree_root, last_id)) => {
                (Some(address), length, tree_root, last_id)
            }
            None => (None, 0, None, StructureId::META_TREE.get()),
        };
        let tree = BTree::new(
            Arc::clone(log),
            cache,
            policy,
            StructureId::META_TREE,
            false,
            tree_root,
        );
        Ok((
            Self {
                tree,
                root,
                root_length,
            },
            StructureId::new(last_id),
        ))
    }

    /// The version this meta tree was published under.
    #[must_use]
    pub const fn root(&self) -> Option<Address> {
        self.root
    }

    /// Metadata of the named store, root included, or `None` when the
    /// store does not exist in this version.
    pub fn get_meta_info(&self, name: &str) -> Result<Option<TreeMetaInfo>> {
        let Some(value) = self.tree.get(&store_name_to_key(name))? else {
            return Ok(None);
        };
        let info = TreeMetaInfo::decode(&value).ok_or_else(|| {
            TephraError::log_corrupt(format!("undecodable meta info for store '{name}'"))
        })?;
        let root = self.tree_root(info.structure_id)?;
        Ok(Some(info.with_root(root)))
    }

    /// Current root of the tree with the given structure id.
    pub fn tree_root(&self, structure_id: StructureId) -> Result<Option<Address>> {
        let Some(value) = self.tree.get(&structure_id_to_key(structure_id))? else {
            return Ok(None);
        };
        let (root, len) = read_varint(&value).ok_or_else(|| {
            TephraError::log_corrupt(format!("undecodable root entry for {structure_id}"))
        })?;
        if len != value.len() {
            return Err(TephraError::log_corrupt(format!(
                "trailing bytes in root entry for {structure_id}"
            )));
        }
        Ok(Some(Address::new(root)))
    }

    /// Names of all stores in this version, in key order.
    pub fn all_store_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.tree.iter() {
            let (key, _) = entry?;
            if let Some(name) = key_to_store_name(&key) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Start accumulating the next version.
    #[must_use]
    pub fn mutate(&self) -> MetaTreeMutable {
        MetaTreeMutable {
            previous_root: self.root.map(|address| ExpiredLoggable {
                address,
                length: self.root_length,
            }),
            tree: self.tree.mutable(),
        }
    }
}

/// Accumulates store directory changes during a commit and publishes them
/// as a new [`MetaTree`] version.
#[derive(Debug)]
pub struct MetaTreeMutable {
    previous_root: Option<ExpiredLoggable>,
    tree: BTreeMutable,
}

impl MetaTreeMutable {
    /// Record a newly created store.
    pub fn store_created(&mut self, name: &str, info: &TreeMetaInfo) -> Result<()> {
        // The root lives under the structure-id key; the name entry only
        // carries the flags and the id.
        let detached = info.with_root(None);
        self.tree.put(&store_name_to_key(name), &detached.encode())?;
        if let Some(root) = info.root {
            self.set_tree_root(info.structure_id, Some(root))?;
        }
        Ok(())
    }

    /// Remove a store's entries.
    pub fn store_removed(&mut self, name: &str, structure_id: StructureId) -> Result<()> {
        self.tree.delete(&store_name_to_key(name))?;
        self.tree.delete(&structure_id_to_key(structure_id))?;
        Ok(())
    }

    /// Point a store's tree at a new root (or drop the entry for an empty
    /// tree).
    pub fn set_tree_root(
        &mut self,
        structure_id: StructureId,
        root: Option<Address>,
    ) -> Result<()> {
        let key = structure_id_to_key(structure_id);
        match root {
            Some(root) => {
                let mut value = Vec::with_capacity(10);
                write_varint(&mut value, root.get());
                self.tree.put(&key, &value)?;
            }
            None => {
                self.tree.delete(&key)?;
            }
        }
        Ok(())
    }

    /// Serialize the accumulated version: append the dirty meta tree
    /// nodes, then the `ROOT` marker. Returns the published version and
    /// everything it superseded (the previous `ROOT` marker included).
    pub fn save(
        self,
        log: &Arc<Log>,
        last_structure_id: StructureId,
    ) -> Result<(MetaTree, Vec<ExpiredLoggable>)> {
        let base = self.tree.base().clone();
        let save = self.tree.save()?;
        let payload = encode_root_record(save.root, last_structure_id);
        let root_address = log.append(META_ROOT_TYPE, &payload)?;
        let mut expired = save.expired;
        expired.extend(self.previous_root);
        Ok((
            MetaTree {
                tree: base.with_root(save.root),
                root: Some(root_address),
                root_length: record_len(payload.len() as u64),
            },
            expired,
        ))
    }
}

fn encode_root_record(tree_root: Option<Address>, last_structure_id: StructureId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    match tree_root {
        Some(root) => {
            payload.push(ROOT_FLAG_HAS_TREE);
            write_varint(&mut payload, root.get());
        }
        None => payload.push(0),
    }
    write_varint(&mut payload, u64::from(last_structure_id.get()));
    payload
}

fn decode_root_record(payload: &[u8]) -> Option<(Option<Address>, u32)> {
    let (&flags, mut rest) = payload.split_first()?;
    let tree_root = if flags & ROOT_FLAG_HAS_TREE == 0 {
        None
    } else {
        let (root, len) = read_varint(rest)?;
        rest = &rest[len..];
        Some(Address::new(root))
    };
    let (last_id, len) = read_varint(rest)?;
    if len != rest.len() {
        return None;
    }
    Some((tree_root, u32::try_from(last_id).ok()?))
}
