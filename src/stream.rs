// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Stream abstraction over a per-oracle transaction feed.
//!
//! A stream client hands back a channel of [`StreamItem`]s for one oracle,
//! starting strictly after the given cursor. Implementations must deliver
//! events with non-decreasing logical time and without duplicates; the
//! [`OrderingGuard`] enforces that contract at the edge so downstream code
//! can rely on it.

use crate::error::IndexerResult;
use crate::events::OracleEvent;
use crate::types::Pair;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Resume position within an oracle's transaction history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// No alarm recorded yet, read the feed from its beginning.
    Oldest,
    /// Resume strictly after this logical time.
    After(u64),
}

impl Cursor {
    pub fn from_latest_lt(latest: Option<u64>) -> Self {
        match latest {
            Some(lt) => Cursor::After(lt),
            None => Cursor::Oldest,
        }
    }

    /// Whether an event at this logical time belongs to the stream.
    pub fn admits(&self, lt: u64) -> bool {
        match self {
            Cursor::Oldest => true,
            Cursor::After(cursor) => lt > *cursor,
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Oldest => write!(f, "oldest"),
            Cursor::After(lt) => write!(f, "after({lt})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// First item on every subscription.
    Started { oracle: String, cursor: Cursor },
    Event(OracleEvent),
    /// The feed has no further history right now.
    CaughtUp { oracle: String },
    StreamError { error: String, recoverable: bool },
    Stopped { reason: String },
}

#[async_trait]
pub trait OracleStreamClient: Send + Sync {
    /// Open a stream of events for `pair`'s oracle starting after `cursor`.
    /// The returned channel closes when the feed ends or `cancel` fires.
    async fn subscribe(
        &self,
        pair: &Pair,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> IndexerResult<mpsc::Receiver<StreamItem>>;
}

/// Enforces the delivery contract on a raw feed: events at or before the
/// cursor are dropped, logical time must not decrease, and redelivered
/// transactions are filtered out.
pub struct OrderingGuard {
    cursor: Cursor,
    last_lt: Option<u64>,
    /// Keys seen at `last_lt` only. Anything older is already rejected by
    /// the non-decreasing lt check, so the set stays bounded on a
    /// long-lived subscription.
    seen_at_last_lt: HashSet<String>,
}

impl OrderingGuard {
    pub fn new(cursor: Cursor) -> Self {
        Self {
            cursor,
            last_lt: None,
            seen_at_last_lt: HashSet::new(),
        }
    }

    fn dedup_key(event: &OracleEvent) -> String {
        let hash = &event.tx().hash;
        if !hash.is_empty() {
            return hash.clone();
        }
        // Feeds without tx hashes fall back to the event identity
        match event {
            OracleEvent::Tick(e) => format!("tick:{}:{}", e.tx.lt, e.new_alarm_id),
            OracleEvent::Ring(e) => format!("ring:{}:{}", e.tx.lt, e.alarm_id),
            OracleEvent::Wind(e) => format!("wind:{}:{}", e.tx.lt, e.new_alarm_id),
        }
    }

    /// Returns true if the event passes through, false if it is filtered.
    pub fn admit(&mut self, event: &OracleEvent) -> bool {
        let lt = event.lt();
        if !self.cursor.admits(lt) {
            return false;
        }
        if let Some(last) = self.last_lt {
            if lt < last {
                return false;
            }
            if lt > last {
                self.seen_at_last_lt.clear();
            }
        }
        if !self.seen_at_last_lt.insert(Self::dedup_key(event)) {
            return false;
        }
        self.last_lt = Some(lt);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RingEvent, TickEvent, TxMeta};

    fn tx(lt: u64, hash: &str) -> TxMeta {
        TxMeta {
            lt,
            time: 1_700_000_000,
            msg: String::new(),
            hash: hash.to_string(),
        }
    }

    fn tick(lt: u64, hash: &str, id: u64) -> OracleEvent {
        OracleEvent::Tick(TickEvent {
            new_alarm_id: id,
            watchmaker: "EQW".to_string(),
            base_asset_price: 2.5,
            tx: tx(lt, hash),
        })
    }

    #[test]
    fn test_cursor_admits() {
        assert!(Cursor::Oldest.admits(0));
        assert!(Cursor::Oldest.admits(u64::MAX));
        assert!(!Cursor::After(100).admits(99));
        assert!(!Cursor::After(100).admits(100));
        assert!(Cursor::After(100).admits(101));
    }

    #[test]
    fn test_cursor_from_latest_lt() {
        assert_eq!(Cursor::from_latest_lt(None), Cursor::Oldest);
        assert_eq!(Cursor::from_latest_lt(Some(42)), Cursor::After(42));
    }

    #[test]
    fn test_guard_drops_events_at_or_before_cursor() {
        let mut guard = OrderingGuard::new(Cursor::After(100));
        assert!(!guard.admit(&tick(99, "a", 1)));
        assert!(!guard.admit(&tick(100, "b", 2)));
        assert!(guard.admit(&tick(101, "c", 3)));
    }

    #[test]
    fn test_guard_rejects_decreasing_lt() {
        let mut guard = OrderingGuard::new(Cursor::Oldest);
        assert!(guard.admit(&tick(200, "a", 1)));
        assert!(!guard.admit(&tick(150, "b", 2)));
        // Equal lt is allowed, distinct transactions can share one block time
        assert!(guard.admit(&tick(200, "c", 3)));
    }

    #[test]
    fn test_guard_deduplicates_by_hash() {
        let mut guard = OrderingGuard::new(Cursor::Oldest);
        assert!(guard.admit(&tick(100, "h1", 1)));
        assert!(!guard.admit(&tick(100, "h1", 1)));
        assert!(guard.admit(&tick(100, "h2", 2)));
    }

    #[test]
    fn test_guard_dedup_window_stays_bounded() {
        let mut guard = OrderingGuard::new(Cursor::Oldest);
        for lt in 1..=1000u64 {
            assert!(guard.admit(&tick(lt, &format!("h{lt}"), lt)));
            assert_eq!(guard.seen_at_last_lt.len(), 1);
        }
        // Several transactions at one lt are all tracked
        assert!(guard.admit(&tick(1001, "a", 1001)));
        assert!(guard.admit(&tick(1001, "b", 1002)));
        assert!(!guard.admit(&tick(1001, "a", 1001)));
        assert_eq!(guard.seen_at_last_lt.len(), 2);
        // Advancing drops them again
        assert!(guard.admit(&tick(1002, "c", 1003)));
        assert_eq!(guard.seen_at_last_lt.len(), 1);
    }

    #[test]
    fn test_guard_dedup_without_hash() {
        let mut guard = OrderingGuard::new(Cursor::Oldest);
        let ring = OracleEvent::Ring(RingEvent {
            alarm_id: 7,
            receiver: "EQR".to_string(),
            reward: 1.0,
            tx: tx(100, ""),
        });
        assert!(guard.admit(&ring));
        assert!(!guard.admit(&ring));
    }
}
