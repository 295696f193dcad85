//! The environment coordinator.
//!
//! Owns the commit lock, the meta lock, the structure-id counter, the
//! live-transaction set, the deferred task queue, the caches, and the
//! inoperative marker. Lock order is fixed: commit lock first, meta lock
//! nested inside it, never the reverse; the deferred-task queue lock is
//! independent and tasks always run outside it.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tephra_btree::{BTree, BalancePolicy, NodeCache};
use tephra_error::{Result, TephraError};
use tephra_log::{Log, LogConfig};
use tephra_types::{Address, StoreConfig, StructureId, TreeMetaInfo};
use tracing::{debug, error, info};

use crate::caches::{StoreGetCache, TreeNodesCache};
use crate::config::{
    EnvironmentConfig, ListenerId, ENV_IS_READONLY, ENV_STOREGET_CACHE_SIZE,
    ENV_TREE_NODES_CACHE_SIZE, LOG_DURABLE_WRITE, LOG_SYNC_PERIOD,
};
use crate::gc::GarbageCollector;
use crate::meta_tree::MetaTree;
use crate::monitor::StuckTransactionMonitor;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::txn_set::{TransactionSet, TxnEntry};

type StoreGetCacheSlot = Arc<RwLock<Option<Arc<StoreGetCache>>>>;
type TreeNodesCacheSlot = Arc<RwLock<Option<Arc<TreeNodesCache>>>>;

struct DeferredTask {
    /// Newest live transaction root at enqueue time; the task runs once
    /// every transaction at or below this root has finished.
    txn_root: Option<Address>,
    task: Box<dyn FnOnce() + Send>,
}

/// A transactional environment over one append-only log.
pub struct Environment {
    log: Arc<Log>,
    config: Arc<EnvironmentConfig>,
    /// The current meta tree, guarded by the meta lock. Swapped only
    /// while the commit lock is also held.
    meta: RwLock<MetaTree>,
    commit_lock: Mutex<()>,
    structure_id: AtomicU32,
    txns: TransactionSet,
    txn_safe_tasks: Mutex<VecDeque<DeferredTask>>,
    store_get_cache: StoreGetCacheSlot,
    tree_nodes_cache: TreeNodesCacheSlot,
    gc: Arc<GarbageCollector>,
    monitor: Mutex<Option<StuckTransactionMonitor>>,
    /// Set after an unrecoverable commit failure (or close). Once set, no
    /// transaction begins or commits; the environment stays that way.
    throwable_on_commit: RwLock<Option<Arc<TephraError>>>,
    closed: AtomicBool,
    settings_listener: ListenerId,
    next_txn_id: AtomicU64,
}

impl Environment {
    /// Open the environment at `location` with a default configuration.
    pub fn open(location: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(location, EnvironmentConfig::default())
    }

    /// Open the environment at `location`.
    pub fn open_with_config(location: impl AsRef<Path>, config: EnvironmentConfig) -> Result<Self> {
        let location = location.as_ref();
        std::fs::create_dir_all(location)?;
        let config = Arc::new(config);
        config.apply_sidecar(location)?;

        let log_config = LogConfig {
            location: location.to_path_buf(),
            segment_max_bytes: config.log_file_size_kb() * 1024,
            sync_period_ms: config.log_sync_period(),
            durable_write: config.log_durable_write(),
            read_cache_blocks: config.log_cache_block_count(),
        };
        let log = Arc::new(Log::open(&log_config)?);

        let store_get_cache: StoreGetCacheSlot =
            Arc::new(RwLock::new(build_store_get_cache(&config)));
        let tree_nodes_cache: TreeNodesCacheSlot =
            Arc::new(RwLock::new(build_tree_nodes_cache(&config)));

        let policy = BalancePolicy::new(config.env_max_tree_page_size());
        let node_cache = tree_nodes_cache
            .read()
            .clone()
            .map(|cache| cache as Arc<dyn NodeCache>);
        let (meta, last_structure_id) = MetaTree::create(&log, node_cache, policy)?;

        let txns = TransactionSet::new();
        let gc = Arc::new(GarbageCollector::new(
            Arc::clone(&log),
            txns.clone(),
            log.segment_size(),
        ));

        let settings_listener = {
            let config_weak = Arc::downgrade(&config);
            let log = Arc::clone(&log);
            let gc = Arc::clone(&gc);
            let store_get_slot = Arc::clone(&store_get_cache);
            let tree_nodes_slot = Arc::clone(&tree_nodes_cache);
            config.add_changed_settings_listener(move |key| {
                let Some(config) = config_weak.upgrade() else {
                    return;
                };
                match key {
                    ENV_STOREGET_CACHE_SIZE => {
                        *store_get_slot.write() = build_store_get_cache(&config);
                    }
                    ENV_TREE_NODES_CACHE_SIZE => {
                        *tree_nodes_slot.write() = build_tree_nodes_cache(&config);
                    }
                    LOG_SYNC_PERIOD => log.config().set_sync_period_ms(config.log_sync_period()),
                    LOG_DURABLE_WRITE => log.config().set_durable_write(config.log_durable_write()),
                    ENV_IS_READONLY => {
                        if config.env_is_readonly() {
                            gc.suspend();
                        } else {
                            gc.resume();
                        }
                    }
                    _ => {}
                }
            })
        };

        let monitor = {
            let timeout = config.env_monitor_txns_timeout();
            (timeout > 0).then(|| StuckTransactionMonitor::spawn(txns.clone(), timeout))
        };

        info!(location = %location.display(), "environment created");
        Ok(Self {
            log,
            config,
            meta: RwLock::new(meta),
            commit_lock: Mutex::new(()),
            structure_id: AtomicU32::new(last_structure_id.get()),
            txns,
            txn_safe_tasks: Mutex::new(VecDeque::new()),
            store_get_cache,
            tree_nodes_cache,
            gc,
            monitor: Mutex::new(monitor),
            throwable_on_commit: RwLock::new(None),
            closed: AtomicBool::new(false),
            settings_listener,
            next_txn_id: AtomicU64::new(0),
        })
    }

    // --- observers ---

    /// The directory the environment lives in.
    #[must_use]
    pub fn location(&self) -> &Path {
        self.log.location()
    }

    /// Creation timestamp, milliseconds since the epoch.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.log.created()
    }

    /// The environment's configuration registry.
    #[must_use]
    pub fn environment_config(&self) -> &Arc<EnvironmentConfig> {
        &self.config
    }

    /// Whether the environment has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Total size of the log files on disk.
    pub fn get_disk_usage(&self) -> Result<u64> {
        self.log.disk_usage()
    }

    /// The underlying log.
    #[must_use]
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// Names of all stores visible to `txn`.
    pub fn get_all_store_names(&self, txn: &Transaction<'_>) -> Result<Vec<String>> {
        txn.get_all_store_names()
    }

    /// Whether the named store exists in `txn`'s view.
    pub fn store_exists(&self, name: &str, txn: &Transaction<'_>) -> Result<bool> {
        Ok(txn.current_meta_info(name)?.is_some())
    }

    // --- transactions ---

    /// Begin a write transaction (readonly when the environment is).
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        self.begin(self.config.env_is_readonly(), None)
    }

    /// Begin a write transaction whose `hook` runs under the meta lock, so
    /// it observes exactly the snapshot the transaction captures.
    pub fn begin_transaction_with_hook(&self, hook: impl FnOnce()) -> Result<Transaction<'_>> {
        self.begin(self.config.env_is_readonly(), Some(Box::new(hook)))
    }

    /// Begin a write transaction on a detached clone of the current meta
    /// tree. Snapshots are immutable, so the clone is free; the variant
    /// exists for callers that must not share the published instance.
    pub fn begin_transaction_with_cloned_meta_tree(&self) -> Result<Transaction<'_>> {
        self.begin(self.config.env_is_readonly(), None)
    }

    /// Begin a readonly transaction.
    pub fn begin_readonly_transaction(&self) -> Result<Transaction<'_>> {
        self.begin(true, None)
    }

    /// Begin a readonly transaction with a begin hook (see
    /// [`Environment::begin_transaction_with_hook`]).
    pub fn begin_readonly_transaction_with_hook(
        &self,
        hook: impl FnOnce(),
    ) -> Result<Transaction<'_>> {
        self.begin(true, Some(Box::new(hook)))
    }

    fn begin(
        &self,
        readonly: bool,
        hook: Option<Box<dyn FnOnce() + '_>>,
    ) -> Result<Transaction<'_>> {
        self.check_operative()?;
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let thread = (self.config.env_monitor_txns_timeout() > 0)
            .then(|| std::thread::current().name().unwrap_or("<unnamed>").to_owned());
        let snapshot = self.capture_meta_tree(hook);
        let txn = Transaction::new(self, id, readonly, snapshot, thread);
        self.txns.add(txn.entry());
        Ok(txn)
    }

    /// Run `body` in a write transaction, retrying on conflict until the
    /// flush succeeds.
    pub fn execute_in_transaction<F>(&self, mut body: F) -> Result<()>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<()>,
    {
        self.compute_in_transaction(|txn| body(txn))
    }

    /// Run `body` in a write transaction, retrying on conflict, and return
    /// its last result.
    pub fn compute_in_transaction<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T>,
    {
        let mut txn = self.begin_transaction()?;
        loop {
            let result = body(&mut txn)?;
            if txn.flush()? {
                txn.abort();
                return Ok(result);
            }
            txn.revert()?;
        }
    }

    /// Run `body` in a readonly transaction. Single attempt.
    pub fn execute_in_readonly_transaction<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        self.compute_in_readonly_transaction(body)
    }

    /// Run `body` in a readonly transaction and return its result.
    pub fn compute_in_readonly_transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut txn = self.begin_readonly_transaction()?;
        let result = body(&mut txn);
        txn.abort();
        result
    }

    // --- stores ---

    /// Open the named store, creating it when absent.
    pub fn open_store(
        &self,
        name: &str,
        config: StoreConfig,
        txn: &mut Transaction<'_>,
    ) -> Result<Store> {
        Ok(self
            .open_store_opt(name, config, txn, true)?
            .expect("creation-required open always yields a store"))
    }

    /// Open the named store. With `creation_required` false, an absent
    /// store yields `None` instead of being created.
    pub fn open_store_opt(
        &self,
        name: &str,
        config: StoreConfig,
        txn: &mut Transaction<'_>,
        creation_required: bool,
    ) -> Result<Option<Store>> {
        let meta_info = txn.current_meta_info(name)?;
        if meta_info.is_none() && !creation_required {
            return Ok(None);
        }
        self.open_store_impl(name, config, txn, meta_info).map(Some)
    }

    fn open_store_impl(
        &self,
        name: &str,
        mut config: StoreConfig,
        txn: &mut Transaction<'_>,
        meta_info: Option<TreeMetaInfo>,
    ) -> Result<Store> {
        if config.use_existing {
            match &meta_info {
                None => return Err(TephraError::store_not_found(name)),
                Some(info) => config = info.to_config(),
            }
        }
        match meta_info {
            None => {
                if self.config.env_is_readonly() && self.config.env_readonly_empty_stores() {
                    return Ok(Store::temporary_empty(name.to_owned()));
                }
                if txn.is_readonly() {
                    return Err(TephraError::ReadonlyViolation);
                }
                let structure_id = self.allocate_structure_id();
                let info = TreeMetaInfo::new(structure_id, config.duplicates, config.prefixing);
                txn.store_created(name.to_owned(), info.clone());
                debug!(store = name, %structure_id, "store created");
                Ok(Store::new(name.to_owned(), info))
            }
            Some(mut info) => {
                if info.duplicates != config.duplicates {
                    return Err(TephraError::config_mismatch(
                        name,
                        format!(
                            "opened with duplicates = {} but created with duplicates = {}",
                            config.duplicates, info.duplicates
                        ),
                    ));
                }
                if info.prefixing != config.prefixing {
                    if info.prefixing {
                        return Err(TephraError::config_mismatch(
                            name,
                            "opened with prefixing = false but created with prefixing = true",
                        ));
                    }
                    // Prefixing was requested but never physically realized
                    // for this store; fall back to the store's actual
                    // layout.
                    info.prefixing = false;
                }
                Ok(Store::new(name.to_owned(), info))
            }
        }
    }

    /// Logically empty the named store: the name survives under a freshly
    /// allocated structure id and the old structure becomes reclaimable.
    pub fn truncate_store(&self, name: &str, txn: &mut Transaction<'_>) -> Result<Store> {
        let store = self
            .open_store_opt(name, StoreConfig::USE_EXISTING, txn, false)?
            .ok_or_else(|| TephraError::store_not_found(name))?;
        txn.store_removed(name, store.structure_id());
        let info = store.meta().clone_with_id(self.allocate_structure_id());
        txn.store_created(name.to_owned(), info.clone());
        debug!(store = name, old = %store.structure_id(), new = %info.structure_id, "store truncated");
        Ok(Store::new(name.to_owned(), info))
    }

    /// Mark the named store for removal in `txn`.
    pub fn remove_store(&self, name: &str, txn: &mut Transaction<'_>) -> Result<()> {
        let store = self
            .open_store_opt(name, StoreConfig::USE_EXISTING, txn, false)?
            .ok_or_else(|| TephraError::store_not_found(name))?;
        txn.store_removed(name, store.structure_id());
        Ok(())
    }

    // --- deferred tasks ---

    /// Run `task` once every currently live transaction has finished.
    /// With no live transaction it runs inline.
    pub fn execute_transaction_safe_task(&self, task: impl FnOnce() + Send + 'static) {
        match self.txns.newest() {
            None => task(),
            Some(newest) => {
                self.txn_safe_tasks.lock().push_back(DeferredTask {
                    txn_root: newest.root,
                    task: Box::new(task),
                });
            }
        }
    }

    /// Pop and run every deferred task stamped strictly below the oldest
    /// live transaction root. Tasks run outside the queue lock.
    fn run_transaction_safe_tasks(&self) {
        // `None < Some(_)`: a pristine-root bound releases nothing, and no
        // live transaction at all releases everything.
        let oldest: Option<Option<Address>> = self.txns.oldest().map(|entry| entry.root);
        let mut ready = Vec::new();
        {
            let mut tasks = self.txn_safe_tasks.lock();
            while let Some(front) = tasks.front() {
                let runnable = match oldest {
                    None => true,
                    Some(oldest_root) => front.txn_root < oldest_root,
                };
                if !runnable {
                    break;
                }
                ready.push(tasks.pop_front().expect("front exists").task);
            }
        }
        for task in ready {
            task();
        }
    }

    /// Pop and run every deferred task unconditionally (close and clear).
    fn run_all_transaction_safe_tasks(&self) {
        let drained: Vec<DeferredTask> = self.txn_safe_tasks.lock().drain(..).collect();
        for deferred in drained {
            (deferred.task)();
        }
    }

    // --- commit path ---

    pub(crate) fn flush_transaction(&self, txn: &mut Transaction<'_>, force: bool) -> Result<bool> {
        if txn.is_readonly() {
            return Ok(true);
        }
        if !force && txn.is_idempotent() {
            return Ok(true);
        }
        let expired;
        {
            let _commit_guard = self.commit_lock.lock();
            if self.config.env_is_readonly() {
                return Err(TephraError::ReadonlyViolation);
            }
            self.check_operative()?;
            {
                // The meta tree is only swapped under the commit lock we
                // hold, so this read cannot race a writer.
                let meta = self.meta.read();
                if txn.snapshot_root() != meta.root() {
                    return Ok(false);
                }
            }
            let high_address = self.log.high_address();
            match txn.do_commit() {
                Ok((new_meta, commit_expired)) => {
                    {
                        let mut meta = self.meta.write();
                        *meta = new_meta.clone();
                        txn.set_snapshot(new_meta);
                        txn.run_commit_hook();
                    }
                    self.txns.add(txn.entry());
                    expired = commit_expired;
                }
                Err(commit_err) => {
                    error!(error = %commit_err, "failed to flush transaction");
                    let commit_err = Arc::new(commit_err);
                    match self.log.set_high_address(high_address) {
                        Ok(()) => {
                            self.invalidate_caches();
                            return Err(TephraError::FlushFailed { cause: commit_err });
                        }
                        Err(rollback_err) => {
                            // The log tail is in an unknown state; nothing
                            // may commit against it again.
                            *self.throwable_on_commit.write() = Some(Arc::clone(&commit_err));
                            error!(
                                error = %rollback_err,
                                "failed to rollback high address; environment is inoperative"
                            );
                            return Err(TephraError::FlushFailed {
                                cause: Arc::new(rollback_err),
                            });
                        }
                    }
                }
            }
        }
        // Feed the GC outside the commit lock; the records are already
        // unreachable from the published version.
        self.gc.fetch_expired_loggables(expired);
        Ok(true)
    }

    pub(crate) fn commit_transaction(&self, txn: &mut Transaction<'_>) -> Result<bool> {
        if self.flush_transaction(txn, false)? {
            txn.mark_finished();
            self.finish_transaction(txn.id());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn finish_transaction(&self, txn_id: u64) {
        self.txns.remove(txn_id);
        self.run_transaction_safe_tasks();
    }

    pub(crate) fn register_transaction(&self, entry: TxnEntry) {
        // A reverted transaction re-registers under the same identity; the
        // set keeps its age.
        self.txns.add(entry);
    }

    pub(crate) fn capture_meta_tree(&self, hook: Option<Box<dyn FnOnce() + '_>>) -> MetaTree {
        let meta = self.meta.read();
        if let Some(hook) = hook {
            hook();
        }
        meta.clone()
    }

    pub(crate) fn store_get_cache(&self) -> Option<Arc<StoreGetCache>> {
        self.store_get_cache.read().clone()
    }

    pub(crate) fn store_tree(&self, info: &TreeMetaInfo, root: Option<Address>) -> BTree {
        let cache = self
            .tree_nodes_cache
            .read()
            .clone()
            .map(|cache| cache as Arc<dyn NodeCache>);
        BTree::new(
            Arc::clone(&self.log),
            cache,
            BalancePolicy::new(self.config.env_max_tree_page_size()),
            info.structure_id,
            info.duplicates,
            root,
        )
    }

    pub(crate) fn last_structure_id(&self) -> StructureId {
        StructureId::new(self.structure_id.load(Ordering::SeqCst))
    }

    /// Allocate a structure id whose low byte is nonzero, so its meta-tree
    /// key never collides with a zero-terminated store-name key.
    fn allocate_structure_id(&self) -> StructureId {
        loop {
            let id = self.structure_id.fetch_add(1, Ordering::SeqCst) + 1;
            if id & 0xff != 0 {
                return StructureId::new(id);
            }
        }
    }

    /// Drop both environment caches; they are rebuilt lazily from the
    /// configured sizes. Required after a high-address rollback, when
    /// cached addresses may be reassigned to different records.
    fn invalidate_caches(&self) {
        *self.store_get_cache.write() = build_store_get_cache(&self.config);
        *self.tree_nodes_cache.write() = build_tree_nodes_cache(&self.config);
    }

    fn check_operative(&self) -> Result<()> {
        if let Some(cause) = self.throwable_on_commit.read().as_ref() {
            return Err(match &**cause {
                TephraError::Closed { location } => TephraError::Closed {
                    location: location.clone(),
                },
                _ => TephraError::Inoperative {
                    cause: Arc::clone(cause),
                },
            });
        }
        Ok(())
    }

    fn check_inactive(&self, tolerate: bool) -> Result<()> {
        let count = self.txns.size();
        if count == 0 {
            return Ok(());
        }
        if tolerate {
            info!(count, "environment is active");
            return Ok(());
        }
        error!(count, "environment is active");
        for entry in self.txns.snapshot() {
            debug!(
                txn = entry.id,
                readonly = entry.readonly,
                thread = entry.thread.as_deref().unwrap_or("<unnamed>"),
                "alive transaction"
            );
        }
        Err(TephraError::EnvironmentActive {
            location: self.location().to_path_buf(),
            count,
        })
    }

    // --- gc ---

    /// Trigger a garbage collection pass.
    pub fn gc(&self) {
        self.gc.wake();
    }

    /// Pause garbage collection.
    pub fn suspend_gc(&self) {
        self.gc.suspend();
    }

    /// Resume garbage collection.
    pub fn resume_gc(&self) {
        self.gc.resume();
    }

    /// The collector, for inspection.
    #[must_use]
    pub fn garbage_collector(&self) -> &Arc<GarbageCollector> {
        &self.gc
    }

    // --- lifecycle ---

    /// Delete every store and every log record. Requires no live
    /// transactions. The environment stays open with a pristine state.
    pub fn clear(&self) -> Result<()> {
        self.suspend_gc();
        let result = self.clear_locked();
        self.resume_gc();
        result
    }

    fn clear_locked(&self) -> Result<()> {
        let _commit_guard = self.commit_lock.lock();
        let mut meta = self.meta.write();
        self.check_operative()?;
        self.check_inactive(false)?;
        self.log.clear()?;
        self.run_all_transaction_safe_tasks();
        self.invalidate_caches();
        let node_cache = self
            .tree_nodes_cache
            .read()
            .clone()
            .map(|cache| cache as Arc<dyn NodeCache>);
        let policy = BalancePolicy::new(self.config.env_max_tree_page_size());
        let (fresh, last_structure_id) = MetaTree::create(&self.log, node_cache, policy)?;
        *meta = fresh;
        self.structure_id
            .store(last_structure_id.get(), Ordering::SeqCst);
        Ok(())
    }

    /// Close the environment. Fails while transactions are live unless
    /// `closeForcedly` is configured; closing twice is an error.
    pub fn close(&self) -> Result<()> {
        // Finish the GC outside the commit lock: its own passes may block
        // on transaction state, and close must not deadlock with them.
        // Finishing repeatedly is safe.
        self.gc.finish();
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        let (log_hit_rate, store_get_hit_rate, tree_nodes_hit_rate);
        {
            let _commit_guard = self.commit_lock.lock();
            if !self.is_open() {
                return Err(TephraError::Closed {
                    location: self.location().to_path_buf(),
                });
            }
            // An inoperative environment only closes forcedly.
            if !self.config.env_close_forcedly() {
                self.check_operative()?;
            }
            self.check_inactive(self.config.env_close_forcedly())?;
            if !self.config.env_is_readonly() {
                self.gc.save_utilization_profile()?;
            }
            self.config
                .remove_changed_settings_listener(self.settings_listener);
            log_hit_rate = self.log.cache_hit_rate();
            store_get_hit_rate = self
                .store_get_cache
                .read()
                .as_ref()
                .map_or(0.0, |cache| cache.hit_rate());
            tree_nodes_hit_rate = self
                .tree_nodes_cache
                .read()
                .as_ref()
                .map_or(0.0, |cache| cache.hit_rate());
            self.log.close()?;
            self.closed.store(true, Ordering::Release);
            *self.throwable_on_commit.write() = Some(Arc::new(TephraError::Closed {
                location: self.location().to_path_buf(),
            }));
        }
        self.run_all_transaction_safe_tasks();
        info!(
            store_get_hit_rate,
            tree_nodes_hit_rate, log_hit_rate, "environment closed"
        );
        Ok(())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        self.gc.finish();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("location", &self.location())
            .field("open", &self.is_open())
            .field("live_txns", &self.txns.size())
            .finish_non_exhaustive()
    }
}

fn build_store_get_cache(config: &EnvironmentConfig) -> Option<Arc<StoreGetCache>> {
    let size = config.env_store_get_cache_size();
    (size > 0).then(|| Arc::new(StoreGetCache::new(size)))
}

fn build_tree_nodes_cache(config: &EnvironmentConfig) -> Option<Arc<TreeNodesCache>> {
    let size = config.env_tree_nodes_cache_size();
    (size > 0).then(|| Arc::new(TreeNodesCache::new(size)))
}
