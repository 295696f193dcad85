//! Core value types shared across the Tephra storage engine.
//!
//! This crate is intentionally small: it defines the newtypes the log,
//! B-tree, and environment layers exchange, plus the key bindings that
//! keep store-name keys and structure-id keys disjoint in the meta tree.

pub mod binding;
pub mod meta_info;

pub use binding::{
    key_to_store_name, read_varint, store_name_to_key, structure_id_to_key, write_varint,
};
pub use meta_info::TreeMetaInfo;

use std::fmt;

/// An offset into the append-only log.
///
/// Addresses are dense 64-bit byte offsets spanning segment files; the
/// log's `high_address` is the next free offset. An address is only
/// meaningful for the log that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// The first byte of the log.
    pub const ZERO: Self = Self(0);

    /// Create an address from a raw offset.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Get the raw byte offset.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The address `len` bytes past this one.
    #[inline]
    #[must_use]
    pub const fn advance(self, len: u64) -> Self {
        Self(self.0 + len)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Process-stable identifier of a store's tree, encoded into meta-tree keys.
///
/// Id 1 is reserved for the meta tree itself. Every id allocated for a user
/// store satisfies `id & 0xff != 0`, so its key encoding never ends with a
/// zero byte (see [`binding`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct StructureId(u32);

impl StructureId {
    /// The distinguished id of the meta tree.
    pub const META_TREE: Self = Self(1);

    /// Create a structure id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this id is valid for a user store: positive, not the meta
    /// tree id, and with a nonzero low byte.
    #[inline]
    #[must_use]
    pub const fn is_valid_store_id(self) -> bool {
        self.0 > 1 && (self.0 & 0xff) != 0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration a store is opened with.
///
/// `duplicates` and `prefixing` describe the physical tree; `use_existing`
/// asks the environment to recover the flags from the persisted
/// [`TreeMetaInfo`] instead of validating against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreConfig {
    /// Whether the store may hold several values under one key.
    pub duplicates: bool,
    /// Whether keys are stored with common-prefix compression.
    pub prefixing: bool,
    /// Open with whatever configuration the store was created with.
    pub use_existing: bool,
}

impl StoreConfig {
    /// Plain store: one value per key, no prefix compression.
    pub const WITHOUT_DUPLICATES: Self = Self::new(false, false);
    /// Multi-value store.
    pub const WITH_DUPLICATES: Self = Self::new(true, false);
    /// Plain store with key-prefix compression.
    pub const WITHOUT_DUPLICATES_WITH_PREFIXING: Self = Self::new(false, true);
    /// Multi-value store with key-prefix compression.
    pub const WITH_DUPLICATES_WITH_PREFIXING: Self = Self::new(true, true);
    /// Recover the configuration from the persisted meta information.
    pub const USE_EXISTING: Self = Self {
        duplicates: false,
        prefixing: false,
        use_existing: true,
    };

    const fn new(duplicates: bool, prefixing: bool) -> Self {
        Self {
            duplicates,
            prefixing,
            use_existing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_ordering_and_display() {
        let a = Address::new(16);
        let b = a.advance(4096);
        assert!(a < b);
        assert_eq!(b.get(), 4112);
        assert_eq!(a.to_string(), "0x10");
    }

    #[test]
    fn meta_tree_id_is_reserved() {
        assert_eq!(StructureId::META_TREE.get(), 1);
        assert!(!StructureId::META_TREE.is_valid_store_id());
        assert!(!StructureId::new(0x100).is_valid_store_id());
        assert!(StructureId::new(0x101).is_valid_store_id());
    }

    #[test]
    fn store_config_constants() {
        assert!(StoreConfig::WITH_DUPLICATES.duplicates);
        assert!(!StoreConfig::WITH_DUPLICATES.prefixing);
        assert!(StoreConfig::WITHOUT_DUPLICATES_WITH_PREFIXING.prefixing);
        assert!(StoreConfig::USE_EXISTING.use_existing);
        assert!(!StoreConfig::WITHOUT_DUPLICATES.use_existing);
    }
}
