//! The live-transaction set.
//!
//! Registrations are kept in first-registration order (FIFO age). A
//! reverted transaction re-registers under the same identity with a fresh
//! snapshot root, so age order does not track root order: an old
//! registration can sit on the newest root while a younger one still holds
//! an older snapshot. The `oldest`/`newest` selectors therefore key on the
//! snapshot root (`None` pristine sorting below any address), with a FIFO
//! tie-break on equal roots; the deferred-task drain and the GC bound both
//! need the true minimum and maximum roots, not the extremes of age.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tephra_types::Address;

/// One live transaction's registration data.
#[derive(Debug, Clone)]
pub struct TxnEntry {
    /// Transaction identity.
    pub id: u64,
    /// Snapshot root at (re-)registration: the address of the meta tree
    /// version the transaction observes. `None` for the pristine state.
    pub root: Option<Address>,
    /// When the transaction began.
    pub started: Instant,
    /// Creating thread, recorded only when the stuck-transaction monitor
    /// is enabled.
    pub thread: Option<String>,
    /// Whether the transaction is readonly.
    pub readonly: bool,
}

#[derive(Debug, Default)]
struct TxnSetInner {
    /// Entries in first-registration order.
    entries: Vec<TxnEntry>,
}

/// Concurrent ordered set of live transactions. Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct TransactionSet {
    inner: Arc<Mutex<TxnSetInner>>,
}

impl TransactionSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a transaction. Re-registration (after a
    /// revert) updates the root in place and keeps the original age.
    pub fn add(&self, entry: TxnEntry) {
        let mut inner = self.inner.lock();
        match inner.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => existing.root = entry.root,
            None => inner.entries.push(entry),
        }
    }

    /// Deregister a transaction. Returns whether it was present.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        inner.entries.len() != before
    }

    /// Whether the transaction is registered.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().entries.iter().any(|e| e.id == id)
    }

    /// Number of live transactions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// The transaction with the minimum snapshot root; among equal roots,
    /// the first registered.
    #[must_use]
    pub fn oldest(&self) -> Option<TxnEntry> {
        let inner = self.inner.lock();
        let mut oldest: Option<&TxnEntry> = None;
        for entry in &inner.entries {
            if oldest.is_none_or(|best| entry.root < best.root) {
                oldest = Some(entry);
            }
        }
        oldest.cloned()
    }

    /// The transaction with the maximum snapshot root; among equal roots,
    /// the last registered.
    #[must_use]
    pub fn newest(&self) -> Option<TxnEntry> {
        let inner = self.inner.lock();
        let mut newest: Option<&TxnEntry> = None;
        for entry in &inner.entries {
            if newest.is_none_or(|best| entry.root >= best.root) {
                newest = Some(entry);
            }
        }
        newest.cloned()
    }

    /// All registrations, in age order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TxnEntry> {
        self.inner.lock().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, root: Option<u64>) -> TxnEntry {
        TxnEntry {
            id,
            root: root.map(Address::new),
            started: Instant::now(),
            thread: None,
            readonly: false,
        }
    }

    #[test]
    fn selectors_key_on_root_not_age() {
        let set = TransactionSet::new();
        set.add(entry(1, Some(10)));
        set.add(entry(2, Some(10)));
        // Transaction 1 reverts onto the advanced root while the younger
        // transaction 2 still holds the old snapshot: the minimum root
        // must come from 2, the maximum from 1.
        set.add(entry(1, Some(30)));
        assert_eq!(set.size(), 2);
        let oldest = set.oldest().expect("oldest");
        assert_eq!(oldest.id, 2);
        assert_eq!(oldest.root, Some(Address::new(10)));
        let newest = set.newest().expect("newest");
        assert_eq!(newest.id, 1);
        assert_eq!(newest.root, Some(Address::new(30)));
    }

    #[test]
    fn reinsertion_updates_root_in_place() {
        let set = TransactionSet::new();
        set.add(entry(1, Some(10)));
        set.add(entry(2, Some(20)));
        set.add(entry(1, Some(30)));
        assert_eq!(set.size(), 2);
        let roots: Vec<_> = set.snapshot().iter().map(|e| (e.id, e.root)).collect();
        assert_eq!(
            roots,
            vec![
                (1, Some(Address::new(30))),
                (2, Some(Address::new(20))),
            ],
            "re-registration keeps the original position"
        );
    }

    #[test]
    fn pristine_root_sorts_below_any_address() {
        let set = TransactionSet::new();
        set.add(entry(1, Some(5)));
        set.add(entry(2, None));
        assert_eq!(set.oldest().expect("oldest").id, 2);
        assert_eq!(set.newest().expect("newest").id, 1);
    }

    #[test]
    fn remove_and_contains() {
        let set = TransactionSet::new();
        set.add(entry(7, None));
        assert!(set.contains(7));
        assert!(set.remove(7));
        assert!(!set.remove(7));
        assert!(!set.contains(7));
        assert_eq!(set.oldest().map(|e| e.id), None);
    }

    #[test]
    fn fifo_tie_break_for_equal_roots() {
        let set = TransactionSet::new();
        set.add(entry(1, Some(5)));
        set.add(entry(2, Some(5)));
        assert_eq!(set.oldest().expect("oldest").id, 1);
        assert_eq!(set.newest().expect("newest").id, 2);
    }
}
