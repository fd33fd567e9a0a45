//! Deletion packet layout.
//!
//! ```text
//! +-------+----------+---------+-------+----------------------+
//! | flags | sequence | sent_at | count | ids (16 B x count)   |
//! |  u8   |   u16    |   u64   |  u16  |                      |
//! +-------+----------+---------+-------+----------------------+
//! ```
//!
//! Integers are little-endian; entity ids are their 16 wire bytes.

use crate::error::{Result, WireError};
use sexton_core::{EntityId, Timestamp, ENTITY_ID_LEN};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 1 + 2 + 8 + 2;

const COUNT_OFFSET: usize = 11;

/// Fixed header carried by every deletion packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: u8,
    pub sequence: u16,
    pub sent_at: Timestamp,
    pub count: u16,
}

impl PacketHeader {
    /// Append the header to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.flags);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.sent_at.as_micros().to_le_bytes());
        buf.extend_from_slice(&self.count.to_le_bytes());
    }

    /// Parse a header from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut sent_at = [0u8; 8];
        sent_at.copy_from_slice(&bytes[3..11]);

        Ok(PacketHeader {
            flags: bytes[0],
            sequence: u16::from_le_bytes([bytes[1], bytes[2]]),
            sent_at: Timestamp::from_micros(u64::from_le_bytes(sent_at)),
            count: u16::from_le_bytes([bytes[COUNT_OFFSET], bytes[COUNT_OFFSET + 1]]),
        })
    }
}

/// Per-session packet counter that wraps on overflow.
///
/// Receivers use the sequence only to spot gaps, so wrapping is harmless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceNumber(u16);

impl SequenceNumber {
    pub fn new(start: u16) -> Self {
        SequenceNumber(start)
    }

    /// Return the current value and advance.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u16 {
        let current = self.0;
        self.0 = self.0.wrapping_add(1);
        current
    }

    pub fn peek(&self) -> u16 {
        self.0
    }
}

/// A finalized, immutable packet ready for the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    header: PacketHeader,
    bytes: Vec<u8>,
}

impl EncodedPacket {
    /// Frame `ids` behind a header whose count is taken from `ids`.
    pub(crate) fn frame(flags: u8, sequence: u16, sent_at: Timestamp, ids: &[EntityId]) -> Self {
        let header = PacketHeader {
            flags,
            sequence,
            sent_at,
            count: ids.len() as u16,
        };

        let mut bytes = Vec::with_capacity(HEADER_LEN + ids.len() * ENTITY_ID_LEN);
        header.write_to(&mut bytes);
        for id in ids {
            bytes.extend_from_slice(&id.to_bytes());
        }

        EncodedPacket { header, bytes }
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn count(&self) -> u16 {
        self.header.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the packet carries no ids (header only).
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }
}

/// A packet as seen by the receiving side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionPacket {
    pub header: PacketHeader,
    pub ids: Vec<EntityId>,
}

impl DeletionPacket {
    /// Parse a packet, checking the declared count against the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::read_from(bytes)?;
        let payload = &bytes[HEADER_LEN..];

        if payload.len() != header.count as usize * ENTITY_ID_LEN {
            return Err(WireError::CountMismatch {
                declared: header.count,
                payload_bytes: payload.len(),
            });
        }

        let ids = payload
            .chunks_exact(ENTITY_ID_LEN)
            .map(|chunk| {
                let mut raw = [0u8; ENTITY_ID_LEN];
                raw.copy_from_slice(chunk);
                EntityId::from_bytes(raw)
            })
            .collect();

        Ok(DeletionPacket { header, ids })
    }
}
