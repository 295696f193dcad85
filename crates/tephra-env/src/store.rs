//! Store handles.
//!
//! A [`Store`] is a lightweight handle: name plus metadata captured at
//! open time. All data access goes through a transaction, which resolves
//! the store's current tree root against its own snapshot, so a handle
//! stays valid across flushes of the owning transaction.

use tephra_error::{Result, TephraError};
use tephra_types::{StoreConfig, StructureId, TreeMetaInfo};

use crate::transaction::Transaction;

/// A named key-value store.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    meta: TreeMetaInfo,
    temporary_empty: bool,
}

impl Store {
    pub(crate) fn new(name: String, meta: TreeMetaInfo) -> Self {
        Self {
            name,
            meta,
            temporary_empty: false,
        }
    }

    /// An unpersisted stand-in used by readonly environments configured
    /// with `readonlyEmptyStores`.
    pub(crate) fn temporary_empty(name: String) -> Self {
        Self {
            name,
            meta: TreeMetaInfo::new(StructureId::new(0), false, false),
            temporary_empty: true,
        }
    }

    /// The store's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store's structure id.
    #[must_use]
    pub const fn structure_id(&self) -> StructureId {
        self.meta.structure_id
    }

    /// The configuration the store was created with.
    #[must_use]
    pub const fn config(&self) -> StoreConfig {
        self.meta.to_config()
    }

    pub(crate) const fn meta(&self) -> &TreeMetaInfo {
        &self.meta
    }

    /// Whether this is a temporary empty stand-in rather than a persisted
    /// store.
    #[must_use]
    pub const fn is_temporary_empty(&self) -> bool {
        self.temporary_empty
    }

    /// Look up `key` in the transaction's view of this store.
    pub fn get(&self, txn: &Transaction<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.temporary_empty {
            return Ok(None);
        }
        txn.store_get(self, key)
    }

    /// Whether `key` is bound in the transaction's view of this store.
    pub fn exists(&self, txn: &Transaction<'_>, key: &[u8]) -> Result<bool> {
        Ok(self.get(txn, key)?.is_some())
    }

    /// Bind `value` to `key`. Returns whether the store changed.
    pub fn put(&self, txn: &mut Transaction<'_>, key: &[u8], value: &[u8]) -> Result<bool> {
        self.check_writable(txn)?;
        txn.store_put(self, key, value)
    }

    /// Remove every binding of `key`. Returns whether anything was
    /// removed.
    pub fn delete(&self, txn: &mut Transaction<'_>, key: &[u8]) -> Result<bool> {
        self.check_writable(txn)?;
        txn.store_delete(self, key)
    }

    fn check_writable(&self, txn: &Transaction<'_>) -> Result<()> {
        if self.temporary_empty || txn.is_readonly() {
            return Err(TephraError::ReadonlyViolation);
        }
        Ok(())
    }
}
