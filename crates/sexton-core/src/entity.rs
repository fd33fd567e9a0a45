//! Fixed-width identifiers for entities in the shared tree.
//!
//! Entity ids travel on the wire as 16 raw bytes, so the identifier is a
//! plain 128-bit value. New ids are minted from ULIDs, which keeps freshly
//! created entities roughly time-ordered without any coordination.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Number of bytes an entity id occupies on the wire.
pub const ENTITY_ID_LEN: usize = 16;

/// A 128-bit entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u128);

impl EntityId {
    /// Mint a new, unique entity id.
    pub fn new() -> Self {
        EntityId(Ulid::new().0)
    }

    /// Wrap a raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        EntityId(value)
    }

    /// Raw 128-bit value.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Create an id from its wire bytes (big-endian, RFC 4122 byte order).
    pub fn from_bytes(bytes: [u8; ENTITY_ID_LEN]) -> Self {
        EntityId(u128::from_be_bytes(bytes))
    }

    /// Wire bytes of this id.
    pub fn to_bytes(&self) -> [u8; ENTITY_ID_LEN] {
        self.0.to_be_bytes()
    }

    /// The nil id (all zero bits).
    pub const fn nil() -> Self {
        EntityId(0)
    }

    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// Truncated display (first 8 hex chars).
    pub fn short(&self) -> String {
        format!("{:032x}", self.0)[..8].to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        EntityId::nil()
    }
}

impl From<Ulid> for EntityId {
    fn from(ulid: Ulid) -> Self {
        EntityId(ulid.0)
    }
}

impl From<EntityId> for Ulid {
    fn from(id: EntityId) -> Self {
        Ulid(id.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}...)", self.short())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = format!("{:032x}", self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}
