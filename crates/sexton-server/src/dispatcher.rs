//! Per-session deletion dispatch.
//!
//! A flush sends a session every tombstone newer than its cursor, minus the
//! skew tolerance, then moves the cursor to the time captured before the
//! ledger was read. Anything recorded while the flush was running is at or
//! after that time and goes out with the next flush.

use crate::config::DeletionConfig;
use crate::error::{ConfigError, DispatchError};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use sexton_core::{Clock, SessionId, SessionRegistry, SharedLedger, Timestamp};
use sexton_wire::DeletionPacketEncoder;
use std::sync::Arc;

/// Totals for one successful flush.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushStats {
    pub packets_sent: usize,
    pub bytes_sent: usize,
    pub ids_sent: usize,
    /// The session's cursor after the flush.
    pub snapshot: Timestamp,
}

/// Totals for one pass over every connected session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRoundStats {
    pub sessions_considered: usize,
    pub sessions_flushed: usize,
    pub failures: usize,
    pub packets_sent: usize,
    pub bytes_sent: usize,
    pub ids_sent: usize,
}

impl DispatchRoundStats {
    fn absorb(&mut self, flush: &FlushStats) {
        self.sessions_flushed += 1;
        self.packets_sent += flush.packets_sent;
        self.bytes_sent += flush.bytes_sent;
        self.ids_sent += flush.ids_sent;
    }
}

/// Sends pending deletions to sessions and advances their cursors.
pub struct DeletionDispatcher<R: SessionRegistry + ?Sized, T: Transport + ?Sized, C: Clock> {
    ledger: SharedLedger,
    registry: Arc<R>,
    transport: Arc<T>,
    clock: C,
    encoder: DeletionPacketEncoder,
    flags: u8,
    skew_tolerance_us: u64,
}

impl<R: SessionRegistry + ?Sized, T: Transport + ?Sized, C: Clock> DeletionDispatcher<R, T, C> {
    pub fn new(
        ledger: SharedLedger,
        registry: Arc<R>,
        transport: Arc<T>,
        clock: C,
        config: &DeletionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger,
            registry,
            transport,
            clock,
            encoder: config.encoder()?,
            flags: config.packet_flags,
            skew_tolerance_us: config.skew_tolerance_us,
        })
    }

    pub fn encoder(&self) -> &DeletionPacketEncoder {
        &self.encoder
    }

    fn query_bound(&self, cursor: Timestamp) -> Timestamp {
        cursor.saturating_sub_micros(self.skew_tolerance_us)
    }

    /// Whether `session` has deletions it has not been sent yet.
    ///
    /// Unknown sessions have nothing pending.
    pub fn has_pending(&self, session: &SessionId) -> bool {
        match self.registry.cursor_of(session) {
            Some(cursor) => self.ledger.read().has_any_since(self.query_bound(cursor)),
            None => false,
        }
    }

    /// Send `session` everything deleted since its cursor.
    ///
    /// Always sends at least one packet, header-only when nothing is
    /// pending. If the transport refuses a packet the rest are dropped and
    /// the cursor stays put, so the next flush covers the same window.
    pub fn flush(&self, session: &SessionId) -> Result<FlushStats, DispatchError> {
        let cursor = self
            .registry
            .cursor_of(session)
            .ok_or_else(|| DispatchError::UnknownSession(session.clone()))?;

        let snapshot = self.clock.now();
        let ids = self.ledger.read().ids_since(self.query_bound(cursor));

        let packets = self.encoder.encode(
            self.flags,
            snapshot,
            || self.registry.next_sequence_number(session).unwrap_or_default(),
            ids.iter().copied(),
        );

        let mut stats = FlushStats {
            ids_sent: ids.len(),
            snapshot,
            ..FlushStats::default()
        };

        for (packet_index, packet) in packets.into_iter().enumerate() {
            let len = packet.len();
            if let Err(source) = self.transport.send(session, packet.into_bytes()) {
                self.registry
                    .record_sent(session, stats.packets_sent as u64, stats.bytes_sent as u64);
                return Err(DispatchError::Transport {
                    session: session.clone(),
                    packet_index,
                    source,
                });
            }
            stats.packets_sent += 1;
            stats.bytes_sent += len;
        }

        self.registry
            .record_sent(session, stats.packets_sent as u64, stats.bytes_sent as u64);
        if !self.registry.set_cursor(session, snapshot) {
            tracing::debug!(session = %session, "session detached during flush");
        }

        tracing::debug!(
            session = %session,
            ids = stats.ids_sent,
            packets = stats.packets_sent,
            bytes = stats.bytes_sent,
            cursor = snapshot.as_micros(),
            "flushed deletions"
        );

        Ok(stats)
    }

    /// Flush every connected session that has something pending.
    ///
    /// Idle sessions are left alone, cursor included. A failed session is
    /// logged and left for the next round; the others are still served.
    pub fn dispatch_round(&self) -> DispatchRoundStats {
        let mut sessions = Vec::new();
        self.registry
            .for_each_connected(&mut |id, _| sessions.push(id.clone()));

        let mut round = DispatchRoundStats {
            sessions_considered: sessions.len(),
            ..DispatchRoundStats::default()
        };

        for session in &sessions {
            if !self.has_pending(session) {
                continue;
            }
            match self.flush(session) {
                Ok(stats) => round.absorb(&stats),
                Err(DispatchError::UnknownSession(_)) => {}
                Err(err) => {
                    round.failures += 1;
                    tracing::warn!(session = %session, error = %err, "deletion flush failed");
                }
            }
        }

        round
    }
}
