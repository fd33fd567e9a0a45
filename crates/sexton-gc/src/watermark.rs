//! Watermark computation over connected sessions.
//!
//! The watermark is the earliest cursor among connected sessions: every
//! session has been told about everything deleted before it, so tombstones
//! older than the watermark can go.

use serde::{Deserialize, Serialize};
use sexton_core::{SessionId, SessionRegistry, Timestamp};
use std::time::Duration;

/// What bounds the watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkSource {
    /// The slowest connected session.
    Session(SessionId),

    /// Every cursor is ahead of the clock; the watermark is capped at `now + 1µs`.
    Now,

    /// No session is connected; the watermark sits just past `now`.
    NoSessions,
}

/// Earliest time every connected session has been informed up to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub value: Timestamp,
    pub source: WatermarkSource,
    /// Number of sessions considered.
    pub sessions: usize,
}

impl Watermark {
    /// Compute the watermark from the registry's current cursors.
    ///
    /// With no connected session the watermark is `now + 1µs`, so a prune at
    /// that watermark forgets everything recorded up to now. The same cap
    /// applies when every cursor is ahead of `now`, so records stamped in
    /// the future are never collected. Ties between sessions resolve to the
    /// smallest session id.
    pub fn compute<R: SessionRegistry + ?Sized>(registry: &R, now: Timestamp) -> Self {
        let mut slowest: Option<(SessionId, Timestamp)> = None;
        let mut sessions = 0;

        registry.for_each_connected(&mut |id, cursor| {
            sessions += 1;
            let replace = match &slowest {
                None => true,
                Some((best_id, best)) => cursor < *best || (cursor == *best && id < best_id),
            };
            if replace {
                slowest = Some((id.clone(), cursor));
            }
        });

        let cap = now.saturating_add_micros(1);
        match slowest {
            Some((_, cursor)) if cursor > cap => Watermark {
                value: cap,
                source: WatermarkSource::Now,
                sessions,
            },
            Some((id, cursor)) => Watermark {
                value: cursor,
                source: WatermarkSource::Session(id),
                sessions,
            },
            None => Watermark {
                value: cap,
                source: WatermarkSource::NoSessions,
                sessions: 0,
            },
        }
    }

    /// Whether no session bounded this watermark.
    pub fn is_unbounded(&self) -> bool {
        self.source == WatermarkSource::NoSessions
    }

    /// The session holding the watermark back, if any.
    pub fn bounding_session(&self) -> Option<&SessionId> {
        match &self.source {
            WatermarkSource::Session(id) => Some(id),
            WatermarkSource::Now | WatermarkSource::NoSessions => None,
        }
    }
}

/// A session whose cursor trails the current time by more than a threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaggingSession {
    pub session: SessionId,
    pub cursor: Timestamp,
    pub lag: Duration,
}

/// Sessions whose cursor is more than `max_lag` behind `now`, slowest first.
///
/// These are the sessions preventing tombstone collection. Nothing here
/// evicts them; that is the session layer's call.
pub fn lagging_sessions<R: SessionRegistry + ?Sized>(
    registry: &R,
    now: Timestamp,
    max_lag: Duration,
) -> Vec<LaggingSession> {
    let mut lagging = Vec::new();

    registry.for_each_connected(&mut |id, cursor| {
        let lag = now.duration_since(cursor);
        if lag > max_lag {
            lagging.push(LaggingSession {
                session: id.clone(),
                cursor,
                lag,
            });
        }
    });

    lagging.sort_by(|a, b| a.cursor.cmp(&b.cursor).then_with(|| a.session.cmp(&b.session)));
    lagging
}

#[cfg(test)]
mod tests {
    use super::*;
    use sexton_core::MemorySessionRegistry;

    fn ts(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn test_watermark_is_slowest_cursor() {
        let registry = MemorySessionRegistry::new();
        registry.attach(SessionId::new("x"), ts(10));
        registry.attach(SessionId::new("y"), ts(20));

        let watermark = Watermark::compute(&registry, ts(1_000));

        assert_eq!(watermark.value, ts(10));
        assert_eq!(watermark.bounding_session(), Some(&SessionId::new("x")));
        assert_eq!(watermark.sessions, 2);
        assert!(!watermark.is_unbounded());
    }

    #[test]
    fn test_watermark_without_sessions_is_just_past_now() {
        let registry = MemorySessionRegistry::new();

        let watermark = Watermark::compute(&registry, ts(1_000));

        assert_eq!(watermark.value, ts(1_001));
        assert!(watermark.is_unbounded());
        assert_eq!(watermark.bounding_session(), None);
    }

    #[test]
    fn test_watermark_never_passes_the_clock() {
        let registry = MemorySessionRegistry::new();
        registry.attach(SessionId::new("ahead"), ts(5_000));

        let watermark = Watermark::compute(&registry, ts(1_000));

        assert_eq!(watermark.value, ts(1_001));
        assert_eq!(watermark.source, WatermarkSource::Now);
        assert_eq!(watermark.sessions, 1);
        assert!(!watermark.is_unbounded());
        assert_eq!(watermark.bounding_session(), None);
    }

    #[test]
    fn test_watermark_tie_breaks_on_session_id() {
        let registry = MemorySessionRegistry::new();
        registry.attach(SessionId::new("b"), ts(10));
        registry.attach(SessionId::new("a"), ts(10));

        let watermark = Watermark::compute(&registry, ts(50));
        assert_eq!(watermark.bounding_session(), Some(&SessionId::new("a")));
    }

    #[test]
    fn test_detach_moves_watermark_forward() {
        let registry = MemorySessionRegistry::new();
        registry.attach(SessionId::new("x"), ts(10));
        registry.attach(SessionId::new("y"), ts(20));

        registry.detach(&SessionId::new("x"));

        assert_eq!(Watermark::compute(&registry, ts(99)).value, ts(20));
    }

    #[test]
    fn test_lagging_sessions() {
        let registry = MemorySessionRegistry::new();
        registry.attach(SessionId::new("fast"), ts(9_000));
        registry.attach(SessionId::new("slow"), ts(1_000));
        registry.attach(SessionId::new("slower"), ts(500));

        let lagging = lagging_sessions(&registry, ts(10_000), Duration::from_micros(5_000));

        let names: Vec<_> = lagging.iter().map(|l| l.session.as_str()).collect();
        assert_eq!(names, vec!["slower", "slow"]);
        assert_eq!(lagging[0].lag, Duration::from_micros(9_500));
    }
}
