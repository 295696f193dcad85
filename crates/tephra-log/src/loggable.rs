//! Log records and the expired-record descriptor consumed by the GC.

use tephra_types::Address;

/// Record type reserved for segment padding. Padding carries no length and
/// no payload; it fills a segment so that records never span segment files.
pub const PADDING_TYPE: u8 = 0;

/// A single log record: header (type byte + varint payload length) followed
/// by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loggable {
    /// Address of the record's first header byte.
    pub address: Address,
    /// Record type tag. Never [`PADDING_TYPE`] for a materialized record.
    pub type_id: u8,
    /// Record payload.
    pub data: Vec<u8>,
    /// Total on-disk length, header included.
    pub length: u64,
}

impl Loggable {
    /// Address of the first byte past this record.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> Address {
        Address::new(self.address.get() + self.length)
    }
}

/// On-disk length of a record with the given payload length: type byte,
/// varint length, payload.
#[must_use]
pub const fn record_len(payload_len: u64) -> u64 {
    let mut varint_len = 1u64;
    let mut rest = payload_len >> 7;
    while rest != 0 {
        varint_len += 1;
        rest >>= 7;
    }
    1 + varint_len + payload_len
}

/// A record superseded by a newer version, eligible for reclamation once no
/// live transaction can reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiredLoggable {
    /// Address of the superseded record.
    pub address: Address,
    /// On-disk length of the superseded record, header included.
    pub length: u64,
}
