//! The Tephra environment: snapshot-isolated transactions over named
//! key-value stores backed by one append-only log.
//!
//! The [`Environment`] coordinates everything: it admits transactions
//! against the current meta tree version, serializes commits under a
//! single commit lock, swaps the published version under a nested meta
//! lock, feeds superseded records to the garbage collector, and defers
//! transaction-safe tasks until every transaction that could observe
//! pre-task state has finished.

pub mod caches;
pub mod config;
pub mod environment;
pub mod gc;
pub mod meta_tree;
pub mod monitor;
pub mod store;
pub mod transaction;
pub mod txn_set;

pub use caches::{StoreGetCache, TreeNodesCache};
pub use config::{
    ConfigurationStrategy, EnvironmentConfig, ListenerId, SettingValue,
    ENVIRONMENT_PROPERTIES_FILE,
};
pub use environment::Environment;
pub use gc::{GarbageCollector, UtilizationProfile, UTILIZATION_PROFILE_FILE};
pub use meta_tree::{MetaTree, MetaTreeMutable, META_ROOT_TYPE};
pub use monitor::StuckTransactionMonitor;
pub use store::Store;
pub use transaction::Transaction;
pub use txn_set::{TransactionSet, TxnEntry};
