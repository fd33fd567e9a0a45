//! Error types for deletion packet framing.

use thiserror::Error;

/// Errors raised while configuring the encoder or decoding packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Packet capacity of {max_packet_bytes} bytes cannot hold a header and one entity id ({required} bytes)")]
    PacketTooSmall {
        max_packet_bytes: usize,
        required: usize,
    },

    #[error("Packet capacity of {max_packet_bytes} bytes exceeds the {limit} bytes a 16-bit count can describe")]
    PacketTooLarge {
        max_packet_bytes: usize,
        limit: usize,
    },

    #[error("Packet truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Declared count {declared} does not match a payload of {payload_bytes} bytes")]
    CountMismatch { declared: u16, payload_bytes: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
