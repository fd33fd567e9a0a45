//! # sexton-server
//!
//! Deletion dispatch and collection for an entity server.
//!
//! This crate provides:
//! - `DeletionService`: records deletions, flushes them, runs collection
//! - `DeletionDispatcher`: per-session flush with cursor advance
//! - `Transport` and the in-process `ChannelTransport`
//! - `DeletionConfig` and its builder
//!
//! ## Quick Start
//!
//! ```rust
//! use sexton_server::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(MemorySessionRegistry::new());
//! let transport = Arc::new(ChannelTransport::new());
//! let clock = ManualClock::new(Timestamp::from_micros(1_000_000));
//!
//! let viewer = SessionId::new("viewer");
//! registry.attach(viewer.clone(), Timestamp::from_micros(500_000));
//! let mut inbox = transport.register(viewer.clone(), 16);
//!
//! let service =
//!     DeletionService::new(DeletionConfig::default(), registry, transport, clock).unwrap();
//! service.record_deletion(EntityId::from_u128(42), Timestamp::from_micros(900_000));
//!
//! let stats = service.flush_deletions(&viewer).unwrap();
//! assert_eq!(stats.ids_sent, 1);
//!
//! let packet = DeletionPacket::decode(&inbox.try_recv().unwrap()).unwrap();
//! assert_eq!(packet.ids, vec![EntityId::from_u128(42)]);
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod service;
pub mod transport;

pub use config::{DeletionConfig, DeletionConfigBuilder};
pub use dispatcher::{DeletionDispatcher, DispatchRoundStats, FlushStats};
pub use error::{ConfigError, DispatchError, TransportError};
pub use service::{DeletionService, ServiceHandle};
pub use transport::{ChannelTransport, Transport};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{DeletionConfig, DeletionConfigBuilder};
    pub use crate::dispatcher::{DispatchRoundStats, FlushStats};
    pub use crate::error::{ConfigError, DispatchError, TransportError};
    pub use crate::service::{DeletionService, ServiceHandle};
    pub use crate::transport::{ChannelTransport, Transport};
    pub use sexton_core::{
        Clock, EntityId, ManualClock, MemorySessionRegistry, MonotonicClock, SessionId,
        SessionRegistry, SystemClock, Timestamp,
    };
    pub use sexton_gc::{EmptyRegistryPolicy, PruneOutcome};
    pub use sexton_wire::DeletionPacket;
}
