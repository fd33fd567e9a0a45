//! Outbound packet hand-off.
//!
//! Dispatch never waits on the network: `send` is a non-blocking enqueue
//! onto whatever the session's connection drains from.

use crate::error::TransportError;
use parking_lot::RwLock;
use sexton_core::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Hands finished packets to a session's connection.
pub trait Transport: Send + Sync {
    /// Enqueue one packet for `session`. Must not block.
    fn send(&self, session: &SessionId, packet: Vec<u8>) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, session: &SessionId, packet: Vec<u8>) -> Result<(), TransportError> {
        (**self).send(session, packet)
    }
}

/// In-process transport backed by one bounded channel per session.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    queues: RwLock<HashMap<SessionId, mpsc::Sender<Vec<u8>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue of `capacity` packets for `session` and return its
    /// receiving end. Registering again replaces the previous queue.
    pub fn register(&self, session: SessionId, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.queues.write().insert(session, tx);
        rx
    }

    /// Drop the queue for `session`. Returns `false` if none was registered.
    pub fn unregister(&self, session: &SessionId) -> bool {
        self.queues.write().remove(session).is_some()
    }

    pub fn is_registered(&self, session: &SessionId) -> bool {
        self.queues.read().contains_key(session)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, session: &SessionId, packet: Vec<u8>) -> Result<(), TransportError> {
        let queues = self.queues.read();
        let tx = queues
            .get(session)
            .ok_or_else(|| TransportError::UnknownSession(session.clone()))?;

        tx.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(session.clone()),
            TrySendError::Closed(_) => TransportError::Closed(session.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_receive() {
        let transport = ChannelTransport::new();
        let session = SessionId::new("viewer");
        let mut rx = transport.register(session.clone(), 4);

        transport.send(&session, vec![1, 2, 3]).unwrap();

        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_session() {
        let transport = ChannelTransport::new();
        let session = SessionId::new("ghost");

        assert_eq!(
            transport.send(&session, vec![0]),
            Err(TransportError::UnknownSession(session))
        );
    }

    #[test]
    fn test_full_queue() {
        let transport = ChannelTransport::new();
        let session = SessionId::new("slow");
        let _rx = transport.register(session.clone(), 1);

        transport.send(&session, vec![0]).unwrap();
        assert_eq!(
            transport.send(&session, vec![1]),
            Err(TransportError::QueueFull(session))
        );
    }

    #[test]
    fn test_closed_queue() {
        let transport = ChannelTransport::new();
        let session = SessionId::new("gone");
        let rx = transport.register(session.clone(), 4);
        drop(rx);

        assert_eq!(
            transport.send(&session, vec![0]),
            Err(TransportError::Closed(session))
        );
    }

    #[test]
    fn test_unregister() {
        let transport = ChannelTransport::new();
        let session = SessionId::new("viewer");
        let _rx = transport.register(session.clone(), 4);

        assert!(transport.unregister(&session));
        assert!(!transport.is_registered(&session));
        assert!(!transport.unregister(&session));
    }
}
