// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence abstraction over alarm and reward ledger records.
//!
//! The dispatcher and subscription manager only depend on this trait; the
//! engine behind it is swappable. Every write is framed so that redelivering
//! the same event converges to the same state:
//! - `upsert_alarm` is a full replace keyed by `(oracle, alarm_id)`
//! - `update_alarm` only touches the fields a transition changes
//! - `add_reward` is the single increment-style write, guarded by the
//!   dispatcher's closed-status precondition so it runs once per alarm
//!
//! Each individual write is atomic per key; no cross-record transaction is
//! required because a Wind's two writes are individually idempotent.

mod memory;

pub use memory::MemoryAlarmStore;

use crate::error::IndexerResult;
use crate::types::{Alarm, AlarmFilter, AlarmUpdate, RewardLedgerEntry};
use async_trait::async_trait;

#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Insert or fully replace the alarm keyed by `(oracle, alarm.id)`.
    async fn upsert_alarm(&self, alarm: Alarm) -> IndexerResult<()>;

    /// Apply a partial update to an existing alarm.
    /// Returns false when no alarm exists under the key.
    async fn update_alarm(
        &self,
        oracle: &str,
        alarm_id: u64,
        update: AlarmUpdate,
    ) -> IndexerResult<bool>;

    async fn get_alarm(&self, oracle: &str, alarm_id: u64) -> IndexerResult<Option<Alarm>>;

    /// Logical time of the most recently created alarm for this oracle;
    /// None when the oracle has no alarms yet (replay entire history).
    async fn latest_lt(&self, oracle: &str) -> IndexerResult<Option<u64>>;

    /// Atomically add `amount` to the ledger entry of `address`, creating it
    /// on first reward. Returns the new accumulated total.
    async fn add_reward(&self, address: &str, amount: f64) -> IndexerResult<f64>;

    async fn get_reward(&self, address: &str) -> IndexerResult<Option<RewardLedgerEntry>>;

    /// Alarms of one pair, most recently created first.
    async fn alarms_by_pair(
        &self,
        pair_id: &str,
        filter: AlarmFilter,
    ) -> IndexerResult<Vec<Alarm>>;

    /// Alarms opened by one watchmaker, most recently created first.
    async fn alarms_by_watchmaker(
        &self,
        watchmaker: &str,
        filter: AlarmFilter,
    ) -> IndexerResult<Vec<Alarm>>;

    /// Highest accumulated rewards, descending.
    async fn top_rewards(&self, limit: usize) -> IndexerResult<Vec<RewardLedgerEntry>>;
}
