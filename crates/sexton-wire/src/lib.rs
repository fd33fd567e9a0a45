//! # sexton-wire
//!
//! Framing for deletion updates sent to viewer sessions.
//!
//! A single dispatch may need to announce more deletions than one packet
//! can carry. The [`DeletionPacketEncoder`] splits the ids across as many
//! packets as needed; every packet of one dispatch shares its flags and
//! send time, and takes its own sequence number.
//!
//! ## Example
//!
//! ```rust
//! use sexton_core::{EntityId, Timestamp};
//! use sexton_wire::{DeletionPacket, DeletionPacketEncoder, SequenceNumber};
//!
//! let encoder = DeletionPacketEncoder::new(1400).unwrap();
//! let mut seq = SequenceNumber::default();
//! let ids = vec![EntityId::new(), EntityId::new()];
//!
//! let packets = encoder.encode(0, Timestamp::from_micros(1), || seq.next(), ids.clone());
//! assert_eq!(packets.len(), 1);
//!
//! let decoded = DeletionPacket::decode(packets[0].as_bytes()).unwrap();
//! assert_eq!(decoded.ids, ids);
//! ```

mod encoder;
mod error;
mod packet;

pub use encoder::{DeletionPacketEncoder, MAX_PACKET_BYTES, MIN_PACKET_BYTES};
pub use error::{Result, WireError};
pub use packet::{DeletionPacket, EncodedPacket, PacketHeader, SequenceNumber, HEADER_LEN};
