//! Per-store metadata persisted as meta-tree values.

use crate::{read_varint, write_varint, Address, StoreConfig, StructureId};

const FLAG_DUPLICATES: u8 = 0b0000_0001;
const FLAG_PREFIXING: u8 = 0b0000_0010;
const FLAG_HAS_ROOT: u8 = 0b0000_0100;

/// Metadata describing one named store: its structure id, physical tree
/// flags, and the address of its current root (absent for empty stores).
///
/// Instances are immutable once written; truncation clones the info under a
/// freshly allocated structure id with an empty tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMetaInfo {
    /// The id the store's tree is keyed by.
    pub structure_id: StructureId,
    /// Whether the store holds several values per key.
    pub duplicates: bool,
    /// Whether keys are stored with common-prefix compression.
    pub prefixing: bool,
    /// Root address of the store's tree, or `None` for an empty store.
    pub root: Option<Address>,
}

impl TreeMetaInfo {
    /// Metadata for a newly created, still-empty store.
    #[must_use]
    pub const fn new(structure_id: StructureId, duplicates: bool, prefixing: bool) -> Self {
        Self {
            structure_id,
            duplicates,
            prefixing,
            root: None,
        }
    }

    /// Clone under a fresh structure id with an empty tree. The old
    /// structure becomes reclaimable.
    #[must_use]
    pub const fn clone_with_id(&self, structure_id: StructureId) -> Self {
        Self {
            structure_id,
            duplicates: self.duplicates,
            prefixing: self.prefixing,
            root: None,
        }
    }

    /// This metadata with a new tree root.
    #[must_use]
    pub const fn with_root(&self, root: Option<Address>) -> Self {
        Self {
            structure_id: self.structure_id,
            duplicates: self.duplicates,
            prefixing: self.prefixing,
            root,
        }
    }

    /// The store configuration this metadata was created with.
    #[must_use]
    pub const fn to_config(&self) -> StoreConfig {
        StoreConfig {
            duplicates: self.duplicates,
            prefixing: self.prefixing,
            use_existing: false,
        }
    }

    /// Encode as a meta-tree value: flags byte, then varint id, then the
    /// root address when present.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        let mut flags = 0u8;
        if self.duplicates {
            flags |= FLAG_DUPLICATES;
        }
        if self.prefixing {
            flags |= FLAG_PREFIXING;
        }
        if self.root.is_some() {
            flags |= FLAG_HAS_ROOT;
        }
        buf.push(flags);
        write_varint(&mut buf, u64::from(self.structure_id.get()));
        if let Some(root) = self.root {
            write_varint(&mut buf, root.get());
        }
        buf
    }

    /// Decode a meta-tree value. Returns `None` on any malformation.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (&flags, rest) = buf.split_first()?;
        if flags & !(FLAG_DUPLICATES | FLAG_PREFIXING | FLAG_HAS_ROOT) != 0 {
            return None;
        }
        let (raw_id, id_len) = read_varint(rest)?;
        let structure_id = StructureId::new(u32::try_from(raw_id).ok()?);
        let rest = &rest[id_len..];
        let root = if flags & FLAG_HAS_ROOT == 0 {
            if !rest.is_empty() {
                return None;
            }
            None
        } else {
            let (raw_root, root_len) = read_varint(rest)?;
            if rest.len() != root_len {
                return None;
            }
            Some(Address::new(raw_root))
        };
        Some(Self {
            structure_id,
            duplicates: flags & FLAG_DUPLICATES != 0,
            prefixing: flags & FLAG_PREFIXING != 0,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_empty_store() {
        let info = TreeMetaInfo::new(StructureId::new(0x102), true, false);
        let decoded = TreeMetaInfo::decode(&info.encode()).expect("value should decode");
        assert_eq!(decoded, info);
        assert_eq!(decoded.root, None);
    }

    #[test]
    fn encode_decode_with_root() {
        let info = TreeMetaInfo::new(StructureId::new(0x203), false, true)
            .with_root(Some(Address::new(0xdead_beef)));
        let decoded = TreeMetaInfo::decode(&info.encode()).expect("value should decode");
        assert_eq!(decoded, info);
    }

    #[test]
    fn clone_with_id_resets_root() {
        let info = TreeMetaInfo::new(StructureId::new(0x102), true, true)
            .with_root(Some(Address::new(64)));
        let cloned = info.clone_with_id(StructureId::new(0x103));
        assert_eq!(cloned.structure_id, StructureId::new(0x103));
        assert!(cloned.duplicates);
        assert!(cloned.prefixing);
        assert_eq!(cloned.root, None);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(TreeMetaInfo::decode(&[]), None);
        assert_eq!(TreeMetaInfo::decode(&[0xff, 1]), None);
        // has-root flag set but no root varint
        assert_eq!(TreeMetaInfo::decode(&[FLAG_HAS_ROOT, 2]), None);
        // trailing bytes
        assert_eq!(TreeMetaInfo::decode(&[0, 2, 9]), None);
    }

    #[test]
    fn config_round_trip() {
        let info = TreeMetaInfo::new(StructureId::new(0x102), true, false);
        let cfg = info.to_config();
        assert!(cfg.duplicates);
        assert!(!cfg.prefixing);
        assert!(!cfg.use_existing);
    }
}
