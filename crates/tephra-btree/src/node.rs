//! On-disk node representation.
//!
//! A node is one log record. Leaves hold the entries inline; internal
//! nodes hold separator keys and child addresses. The separator of a child
//! is a lower bound for every key in its subtree, except for the leftmost
//! child which acts as a catch-all.

use tephra_error::{Result, TephraError};
use tephra_types::{read_varint, write_varint, Address};

/// Loggable type of a leaf node.
pub const LEAF_TYPE: u8 = 2;

/// Loggable type of an internal node.
pub const INTERNAL_TYPE: u8 = 3;

/// A decoded tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Entries sorted by key (and by value within one key for trees with
    /// duplicates).
    Leaf { entries: Vec<(Vec<u8>, Vec<u8>)> },
    /// `keys[i]` separates `children[i]`; `keys.len() == children.len()`.
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<Address>,
    },
}

impl Node {
    /// The loggable type this node serializes as.
    #[must_use]
    pub const fn type_id(&self) -> u8 {
        match self {
            Self::Leaf { .. } => LEAF_TYPE,
            Self::Internal { .. } => INTERNAL_TYPE,
        }
    }

    /// Number of entries (leaf) or children (internal).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf { entries } => entries.len(),
            Self::Internal { children, .. } => children.len(),
        }
    }

    /// Whether the node holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to a loggable payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Leaf { entries } => {
                write_varint(&mut buf, entries.len() as u64);
                for (key, value) in entries {
                    write_varint(&mut buf, key.len() as u64);
                    write_varint(&mut buf, value.len() as u64);
                    buf.extend_from_slice(key);
                    buf.extend_from_slice(value);
                }
            }
            Self::Internal { keys, children } => {
                write_varint(&mut buf, children.len() as u64);
                for (key, child) in keys.iter().zip(children) {
                    write_varint(&mut buf, key.len() as u64);
                    buf.extend_from_slice(key);
                    write_varint(&mut buf, child.get());
                }
            }
        }
        buf
    }

    /// Decode a node from a loggable of the given type.
    pub fn decode(type_id: u8, payload: &[u8]) -> Result<Self> {
        match type_id {
            LEAF_TYPE => decode_leaf(payload),
            INTERNAL_TYPE => decode_internal(payload),
            other => Err(TephraError::log_corrupt(format!(
                "unexpected loggable type {other} for a tree node"
            ))),
        }
    }
}

fn take_varint(payload: &[u8], pos: &mut usize) -> Result<u64> {
    let (value, len) = read_varint(&payload[*pos..])
        .ok_or_else(|| TephraError::log_corrupt("truncated varint in tree node"))?;
    *pos += len;
    Ok(value)
}

fn take_bytes<'a>(payload: &'a [u8], pos: &mut usize, len: u64) -> Result<&'a [u8]> {
    let len = usize::try_from(len)
        .map_err(|_| TephraError::log_corrupt("oversized field in tree node"))?;
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| TephraError::log_corrupt("truncated field in tree node"))?;
    let bytes = &payload[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn decode_leaf(payload: &[u8]) -> Result<Node> {
    let mut pos = 0;
    let count = take_varint(payload, &mut pos)?;
    let mut entries = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for _ in 0..count {
        let key_len = take_varint(payload, &mut pos)?;
        let value_len = take_varint(payload, &mut pos)?;
        let key = take_bytes(payload, &mut pos, key_len)?.to_vec();
        let value = take_bytes(payload, &mut pos, value_len)?.to_vec();
        entries.push((key, value));
    }
    if pos != payload.len() {
        return Err(TephraError::log_corrupt("trailing bytes in leaf node"));
    }
    Ok(Node::Leaf { entries })
}

fn decode_internal(payload: &[u8]) -> Result<Node> {
    let mut pos = 0;
    let count = take_varint(payload, &mut pos)?;
    let mut keys = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    let mut children = Vec::with_capacity(keys.capacity());
    for _ in 0..count {
        let key_len = take_varint(payload, &mut pos)?;
        let key = take_bytes(payload, &mut pos, key_len)?.to_vec();
        let child = take_varint(payload, &mut pos)?;
        keys.push(key);
        children.push(Address::new(child));
    }
    if pos != payload.len() {
        return Err(TephraError::log_corrupt("trailing bytes in internal node"));
    }
    Ok(Node::Internal { keys, children })
}
