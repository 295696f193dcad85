//! Byte-level bindings for meta-tree keys and variable-length integers.
//!
//! The meta tree multiplexes two key spaces:
//!
//! - store names, bound as UTF-8 bytes followed by a single terminal zero
//!   byte;
//! - structure ids, bound as big-endian bytes with leading zeros stripped.
//!
//! Structure ids are allocated so that their low byte is never zero, which
//! keeps the two spaces disjoint: a name key always ends in `0x00`, an id
//! key never does.

use crate::StructureId;

/// Bind a store name as a meta-tree key.
#[must_use]
pub fn store_name_to_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

/// Recover a store name from a meta-tree key.
///
/// Returns `None` for keys that are not name-bound (no terminal zero byte,
/// or invalid UTF-8).
#[must_use]
pub fn key_to_store_name(key: &[u8]) -> Option<String> {
    let Some((&0, name_bytes)) = key.split_last() else {
        return None;
    };
    String::from_utf8(name_bytes.to_vec()).ok()
}

/// Bind a structure id as a meta-tree key.
#[must_use]
pub fn structure_id_to_key(id: StructureId) -> Vec<u8> {
    let raw = id.get();
    let be = raw.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    // An id of zero never reaches the meta tree, but bind it as a single
    // zero byte rather than an empty key.
    if skip == be.len() {
        return vec![0];
    }
    be[skip..].to_vec()
}

/// Append an unsigned LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Read an unsigned LEB128 varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// buffer is truncated or the encoding overflows 64 bits.
#[must_use]
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn name_keys_are_zero_terminated() {
        let key = store_name_to_key("users");
        assert_eq!(key.last(), Some(&0));
        assert_eq!(key_to_store_name(&key).as_deref(), Some("users"));
    }

    #[test]
    fn empty_name_still_binds() {
        let key = store_name_to_key("");
        assert_eq!(key, vec![0]);
        assert_eq!(key_to_store_name(&key).as_deref(), Some(""));
    }

    #[test]
    fn id_keys_never_end_with_zero_for_valid_ids() {
        for raw in [2u32, 0x101, 0x1ff, 0xab_cdef] {
            let key = structure_id_to_key(StructureId::new(raw));
            assert_ne!(key.last(), Some(&0), "id {raw:#x} key ends with zero");
        }
    }

    #[test]
    fn id_key_strips_leading_zeros() {
        assert_eq!(structure_id_to_key(StructureId::new(2)), vec![2]);
        assert_eq!(structure_id_to_key(StructureId::new(0x0102)), vec![1, 2]);
    }

    #[test]
    fn varint_rejects_truncation() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX);
        assert!(read_varint(&buf[..buf.len() - 1]).is_none());
        assert!(read_varint(&[]).is_none());
    }

    proptest! {
        #[test]
        fn varint_round_trips(value: u64) {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            prop_assert_eq!(read_varint(&buf), Some((value, buf.len())));
        }

        #[test]
        fn name_and_id_key_spaces_are_disjoint(name in "\\PC*", raw in 2u32..) {
            prop_assume!((raw & 0xff) != 0);
            let name_key = store_name_to_key(&name);
            let id_key = structure_id_to_key(StructureId::new(raw));
            prop_assert_ne!(name_key, id_key);
        }
    }
}
