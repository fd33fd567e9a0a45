//! Packing entity ids into fixed-capacity deletion packets.
//!
//! The encoder is pure: it takes the ids a dispatch decided to send and
//! returns finished packets. Each packet's ids are gathered first and the
//! header is written once the count is known, so nothing is ever patched
//! after the fact.

use crate::error::{Result, WireError};
use crate::packet::{EncodedPacket, HEADER_LEN};
use sexton_core::{EntityId, Timestamp, ENTITY_ID_LEN};

/// Largest packet whose id count still fits the 16-bit count field.
pub const MAX_PACKET_BYTES: usize = HEADER_LEN + u16::MAX as usize * ENTITY_ID_LEN;

/// Smallest packet that can carry a header and one id.
pub const MIN_PACKET_BYTES: usize = HEADER_LEN + ENTITY_ID_LEN;

/// Splits id sequences across packets of at most `max_packet_bytes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionPacketEncoder {
    max_packet_bytes: usize,
    ids_per_packet: usize,
}

impl DeletionPacketEncoder {
    /// Create an encoder for packets of at most `max_packet_bytes`.
    ///
    /// Fails if a packet could not hold even a single id, since the encoder
    /// would otherwise never make progress.
    pub fn new(max_packet_bytes: usize) -> Result<Self> {
        if max_packet_bytes < MIN_PACKET_BYTES {
            return Err(WireError::PacketTooSmall {
                max_packet_bytes,
                required: MIN_PACKET_BYTES,
            });
        }
        if max_packet_bytes > MAX_PACKET_BYTES {
            return Err(WireError::PacketTooLarge {
                max_packet_bytes,
                limit: MAX_PACKET_BYTES,
            });
        }

        Ok(DeletionPacketEncoder {
            max_packet_bytes,
            ids_per_packet: (max_packet_bytes - HEADER_LEN) / ENTITY_ID_LEN,
        })
    }

    pub fn max_packet_bytes(&self) -> usize {
        self.max_packet_bytes
    }

    /// How many ids fit behind one header.
    pub fn ids_per_packet(&self) -> usize {
        self.ids_per_packet
    }

    /// Number of packets `id_count` ids will occupy (always at least one).
    pub fn packets_needed(&self, id_count: usize) -> usize {
        id_count.div_ceil(self.ids_per_packet).max(1)
    }

    /// Pack `ids` into packets sharing `flags` and `sent_at`.
    ///
    /// Each packet takes a fresh number from `next_sequence`. At least one
    /// packet is produced even when `ids` is empty.
    pub fn encode<I, F>(
        &self,
        flags: u8,
        sent_at: Timestamp,
        mut next_sequence: F,
        ids: I,
    ) -> Vec<EncodedPacket>
    where
        I: IntoIterator<Item = EntityId>,
        F: FnMut() -> u16,
    {
        let mut packets = Vec::new();
        let mut pending: Vec<EntityId> = Vec::with_capacity(self.ids_per_packet);

        for id in ids {
            if pending.len() == self.ids_per_packet {
                packets.push(EncodedPacket::frame(flags, next_sequence(), sent_at, &pending));
                pending.clear();
            }
            pending.push(id);
        }

        if !pending.is_empty() || packets.is_empty() {
            packets.push(EncodedPacket::frame(flags, next_sequence(), sent_at, &pending));
        }

        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DeletionPacket, SequenceNumber};

    fn ids(n: u128) -> Vec<EntityId> {
        (1..=n).map(EntityId::from_u128).collect()
    }

    /// Encoder with room for exactly `per_packet` ids.
    fn encoder_for(per_packet: usize) -> DeletionPacketEncoder {
        DeletionPacketEncoder::new(HEADER_LEN + per_packet * ENTITY_ID_LEN).unwrap()
    }

    #[test]
    fn test_rejects_packet_too_small() {
        let err = DeletionPacketEncoder::new(MIN_PACKET_BYTES - 1).unwrap_err();
        assert_eq!(
            err,
            WireError::PacketTooSmall {
                max_packet_bytes: MIN_PACKET_BYTES - 1,
                required: MIN_PACKET_BYTES
            }
        );
        assert!(DeletionPacketEncoder::new(MIN_PACKET_BYTES).is_ok());
    }

    #[test]
    fn test_rejects_packet_too_large() {
        assert!(matches!(
            DeletionPacketEncoder::new(MAX_PACKET_BYTES + 1),
            Err(WireError::PacketTooLarge { .. })
        ));
        assert!(DeletionPacketEncoder::new(MAX_PACKET_BYTES).is_ok());
    }

    #[test]
    fn test_capacity_rounds_down() {
        let encoder = DeletionPacketEncoder::new(HEADER_LEN + 2 * ENTITY_ID_LEN + 15).unwrap();
        assert_eq!(encoder.ids_per_packet(), 2);
    }

    #[test]
    fn test_five_ids_two_per_packet() {
        let encoder = encoder_for(2);
        let mut seq = SequenceNumber::default();

        let packets = encoder.encode(0, Timestamp::from_micros(42), || seq.next(), ids(5));

        let counts: Vec<_> = packets.iter().map(|p| p.count()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        let sequences: Vec<_> = packets.iter().map(|p| p.sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(packets
            .iter()
            .all(|p| p.header().sent_at == Timestamp::from_micros(42)));
    }

    #[test]
    fn test_empty_input_yields_header_only_packet() {
        let encoder = encoder_for(4);
        let mut seq = SequenceNumber::new(7);

        let packets = encoder.encode(0, Timestamp::ZERO, || seq.next(), Vec::new());

        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_empty());
        assert_eq!(packets[0].len(), HEADER_LEN);
        assert_eq!(packets[0].sequence(), 7);
        assert_eq!(encoder.packets_needed(0), 1);
    }

    #[test]
    fn test_exact_fill_has_no_trailing_empty_packet() {
        let encoder = encoder_for(3);
        let mut seq = SequenceNumber::default();

        let packets = encoder.encode(0, Timestamp::ZERO, || seq.next(), ids(6));

        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.count() == 3));
        assert_eq!(encoder.packets_needed(6), 2);
    }

    #[test]
    fn test_packets_never_exceed_capacity() {
        let encoder = DeletionPacketEncoder::new(200).unwrap();
        let mut seq = SequenceNumber::default();

        let packets = encoder.encode(0, Timestamp::ZERO, || seq.next(), ids(100));

        assert!(packets.iter().all(|p| p.len() <= 200));
        assert_eq!(packets.len(), encoder.packets_needed(100));
    }

    #[test]
    fn test_ids_come_back_in_order() {
        let encoder = encoder_for(2);
        let mut seq = SequenceNumber::default();
        let input = ids(5);

        let packets = encoder.encode(3, Timestamp::from_micros(9), || seq.next(), input.clone());
        let decoded: Vec<EntityId> = packets
            .iter()
            .flat_map(|p| DeletionPacket::decode(p.as_bytes()).unwrap().ids)
            .collect();

        assert_eq!(decoded, input);
    }
}
