//! Transactions: a meta tree snapshot plus pending mutations.
//!
//! A transaction observes the meta tree version captured at begin (or at
//! the last successful flush/revert) for its whole lifetime. Pending
//! mutations live in per-store mutable tree overlays and in the
//! created/removed store maps; nothing touches the log until the
//! environment's commit path serializes them.
//!
//! Every exit path must end in `abort` (or a successful `commit`);
//! dropping an unfinished transaction aborts it.

use std::collections::BTreeMap;
use std::time::Instant;

use tephra_btree::BTreeMutable;
use tephra_error::{Result, TephraError};
use tephra_log::ExpiredLoggable;
use tephra_types::{Address, StructureId, TreeMetaInfo};

use crate::environment::Environment;
use crate::meta_tree::MetaTree;
use crate::store::Store;
use crate::txn_set::TxnEntry;

/// A read or write transaction against one environment.
///
/// Mutated only by its owning thread. Borrows the environment; the
/// environment outlives every transaction it begins.
pub struct Transaction<'env> {
    env: &'env Environment,
    id: u64,
    readonly: bool,
    snapshot: MetaTree,
    mutable_trees: BTreeMap<u32, BTreeMutable>,
    created_stores: BTreeMap<String, TreeMetaInfo>,
    removed_stores: BTreeMap<String, StructureId>,
    commit_hook: Option<Box<dyn FnOnce()>>,
    started: Instant,
    thread: Option<String>,
    finished: bool,
}

impl<'env> Transaction<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        id: u64,
        readonly: bool,
        snapshot: MetaTree,
        thread: Option<String>,
    ) -> Self {
        Self {
            env,
            id,
            readonly,
            snapshot,
            mutable_trees: BTreeMap::new(),
            created_stores: BTreeMap::new(),
            removed_stores: BTreeMap::new(),
            commit_hook: None,
            started: Instant::now(),
            thread,
            finished: false,
        }
    }

    /// Transaction identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether this transaction refuses writes.
    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether the transaction has been committed or aborted.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// The meta tree version this transaction observes.
    #[must_use]
    pub const fn snapshot_root(&self) -> Option<Address> {
        self.snapshot.root()
    }

    /// Whether a flush would be a no-op: no pending mutations, creations,
    /// or removals.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.created_stores.is_empty()
            && self.removed_stores.is_empty()
            && self.mutable_trees.values().all(|tree| !tree.has_changes())
    }

    /// How long the transaction has been running.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Register a hook that runs under the meta lock right after this
    /// transaction's commit is installed.
    pub fn set_commit_hook(&mut self, hook: impl FnOnce() + 'static) {
        self.commit_hook = Some(Box::new(hook));
    }

    /// Write pending mutations to the log and publish them.
    ///
    /// Returns `Ok(false)` on a version conflict: another transaction
    /// committed first and the caller must [`revert`](Self::revert) and
    /// retry. A readonly transaction always returns `Ok(true)`.
    pub fn flush(&mut self) -> Result<bool> {
        assert!(!self.finished, "transaction is finished");
        let env = self.env;
        env.flush_transaction(self, false)
    }

    /// Like [`flush`](Self::flush), but commits even an idempotent
    /// transaction, advancing the meta tree version.
    pub fn force_flush(&mut self) -> Result<bool> {
        assert!(!self.finished, "transaction is finished");
        let env = self.env;
        env.flush_transaction(self, true)
    }

    /// Flush and finish: on success the transaction leaves the live set
    /// and deferred tasks get a drain opportunity.
    pub fn commit(&mut self) -> Result<bool> {
        assert!(!self.finished, "transaction is finished");
        let env = self.env;
        env.commit_transaction(self)
    }

    /// Throw away pending mutations and recapture the current meta tree.
    /// The transaction keeps its identity and its age ordering.
    pub fn revert(&mut self) -> Result<()> {
        assert!(!self.finished, "transaction is finished");
        if self.readonly {
            return Err(TephraError::ReadonlyViolation);
        }
        self.reset_pending();
        let env = self.env;
        self.snapshot = env.capture_meta_tree(None);
        env.register_transaction(self.entry());
        Ok(())
    }

    /// Finish without publishing anything. Safe on every exit path;
    /// aborting twice is a no-op.
    pub fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.reset_pending();
        self.finished = true;
        let env = self.env;
        env.finish_transaction(self.id);
    }

    /// Names of all stores visible to this transaction, creations and
    /// removals included, in name order.
    pub fn get_all_store_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.snapshot.all_store_names()?;
        names.extend(self.created_stores.keys().cloned());
        names.retain(|name| !self.removed_stores.contains_key(name));
        names.sort();
        names.dedup();
        Ok(names)
    }

    // --- internals used by the environment and stores ---

    pub(crate) fn entry(&self) -> TxnEntry {
        TxnEntry {
            id: self.id,
            root: self.snapshot.root(),
            started: self.started,
            thread: self.thread.clone(),
            readonly: self.readonly,
        }
    }

    /// Pending creation first, then the snapshot's store directory.
    pub(crate) fn current_meta_info(&self, name: &str) -> Result<Option<TreeMetaInfo>> {
        if let Some(info) = self.created_stores.get(name) {
            return Ok(Some(info.clone()));
        }
        self.snapshot.get_meta_info(name)
    }

    pub(crate) fn store_created(&mut self, name: String, info: TreeMetaInfo) {
        self.created_stores.insert(name, info);
    }

    pub(crate) fn store_removed(&mut self, name: &str, structure_id: StructureId) {
        self.created_stores.remove(name);
        self.mutable_trees.remove(&structure_id.get());
        self.removed_stores.insert(name.to_owned(), structure_id);
    }

    /// The store's tree root as this transaction sees it.
    fn resolve_root(&self, store: &Store) -> Result<Option<Address>> {
        if let Some(info) = self.created_stores.get(store.name()) {
            return Ok(info.root);
        }
        self.snapshot.tree_root(store.structure_id())
    }

    pub(crate) fn store_get(&self, store: &Store, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(tree) = self.mutable_trees.get(&store.structure_id().get()) {
            return tree.get(key);
        }
        let Some(root) = self.resolve_root(store)? else {
            return Ok(None);
        };
        // Committed data under a pinned root: safe to serve from the
        // store-get cache.
        let cache = self.env.store_get_cache();
        if let Some(cache) = &cache {
            if let Some(value) = cache.get(root, key) {
                return Ok(Some(value));
            }
        }
        let tree = self.env.store_tree(store.meta(), Some(root));
        let value = tree.get(key)?;
        if let (Some(cache), Some(value)) = (cache, &value) {
            cache.insert(root, key, value);
        }
        Ok(value)
    }

    pub(crate) fn store_put(&mut self, store: &Store, key: &[u8], value: &[u8]) -> Result<bool> {
        self.mutable_tree(store)?.put(key, value)
    }

    pub(crate) fn store_delete(&mut self, store: &Store, key: &[u8]) -> Result<bool> {
        self.mutable_tree(store)?.delete(key)
    }

    fn mutable_tree(&mut self, store: &Store) -> Result<&mut BTreeMutable> {
        let sid = store.structure_id().get();
        if !self.mutable_trees.contains_key(&sid) {
            let root = self.resolve_root(store)?;
            let tree = self.env.store_tree(store.meta(), root);
            self.mutable_trees.insert(sid, tree.mutable());
        }
        Ok(self
            .mutable_trees
            .get_mut(&sid)
            .expect("inserted just above"))
    }

    /// Serialize pending mutations: per-store trees first, then the meta
    /// tree, then the version marker. Consumes the pending state; the
    /// error path is followed by rollback and abort.
    pub(crate) fn do_commit(&mut self) -> Result<(MetaTree, Vec<ExpiredLoggable>)> {
        let env = self.env;
        let mut meta_mut = self.snapshot.mutate();
        let mut expired = Vec::new();
        for (name, structure_id) in std::mem::take(&mut self.removed_stores) {
            meta_mut.store_removed(&name, structure_id)?;
        }
        for (name, info) in std::mem::take(&mut self.created_stores) {
            meta_mut.store_created(&name, &info)?;
        }
        for (sid, tree) in std::mem::take(&mut self.mutable_trees) {
            let base_root = tree.base().root();
            let save = tree.save()?;
            expired.extend(save.expired);
            if save.root != base_root {
                meta_mut.set_tree_root(StructureId::new(sid), save.root)?;
            }
        }
        let (new_meta, meta_expired) = meta_mut.save(env.log(), env.last_structure_id())?;
        expired.extend(meta_expired);
        Ok((new_meta, expired))
    }

    /// Install the freshly published version as this transaction's
    /// snapshot.
    pub(crate) fn set_snapshot(&mut self, meta: MetaTree) {
        self.snapshot = meta;
    }

    pub(crate) fn run_commit_hook(&mut self) {
        if let Some(hook) = self.commit_hook.take() {
            hook();
        }
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }

    fn reset_pending(&mut self) {
        self.mutable_trees.clear();
        self.created_stores.clear();
        self.removed_stores.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("readonly", &self.readonly)
            .field("root", &self.snapshot.root())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
