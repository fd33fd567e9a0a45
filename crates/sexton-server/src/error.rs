//! Error types for the deletion service.

use sexton_core::SessionId;
use sexton_wire::WireError;
use thiserror::Error;

/// Errors raised when building a service from its configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid packet capacity: {0}")]
    Wire(#[from] WireError),

    #[error("Skew tolerance must be at least one microsecond")]
    ZeroSkewTolerance,

    #[error("Dispatch interval must be greater than zero")]
    ZeroDispatchInterval,

    #[error("Prune interval must be greater than zero")]
    ZeroPruneInterval,

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when handing a packet to a session's connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No connection registered for session {0}")]
    UnknownSession(SessionId),

    #[error("Outbound queue for session {0} is full")]
    QueueFull(SessionId),

    #[error("Connection for session {0} is closed")]
    Closed(SessionId),
}

/// Errors raised while flushing deletions to a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Session not found: {0}")]
    UnknownSession(SessionId),

    #[error("Failed to send packet {packet_index} to session {session}: {source}")]
    Transport {
        session: SessionId,
        packet_index: usize,
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    /// The session the failed flush was for.
    pub fn session(&self) -> &SessionId {
        match self {
            DispatchError::UnknownSession(session) => session,
            DispatchError::Transport { session, .. } => session,
        }
    }
}
