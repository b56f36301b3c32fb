// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory alarm store.
//!
//! Default engine wired by the binary and by tests. Alarms are kept in a
//! BTreeMap ordered by `(oracle, id)` so cursor lookups and per-oracle scans
//! are range operations.

use super::AlarmStore;
use crate::error::IndexerResult;
use crate::types::{Alarm, AlarmFilter, AlarmKey, AlarmUpdate, RewardLedgerEntry};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct MemoryAlarmStore {
    alarms: RwLock<BTreeMap<AlarmKey, Alarm>>,
    ledger: RwLock<HashMap<String, f64>>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn oracle_range(oracle: &str) -> std::ops::RangeInclusive<AlarmKey> {
        AlarmKey::new(oracle, 0)..=AlarmKey::new(oracle, u64::MAX)
    }

    fn collect_sorted(mut alarms: Vec<Alarm>) -> Vec<Alarm> {
        // Most recently created first; lt breaks ties within one second
        alarms.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.lt.cmp(&a.lt))
        });
        alarms
    }
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
    async fn upsert_alarm(&self, alarm: Alarm) -> IndexerResult<()> {
        let key = alarm.key();
        let mut alarms = self.alarms.write().await;
        let replaced = alarms.insert(key.clone(), alarm).is_some();
        debug!(%key, replaced, "upsert alarm");
        Ok(())
    }

    async fn update_alarm(
        &self,
        oracle: &str,
        alarm_id: u64,
        update: AlarmUpdate,
    ) -> IndexerResult<bool> {
        let mut alarms = self.alarms.write().await;
        let Some(alarm) = alarms.get_mut(&AlarmKey::new(oracle, alarm_id)) else {
            return Ok(false);
        };
        if let Some(status) = update.status {
            alarm.status = status;
        }
        if let Some(remain_scale) = update.remain_scale {
            alarm.remain_scale = remain_scale;
        }
        if let Some(reward) = update.reward {
            alarm.reward = reward;
        }
        if let Some(closed_at) = update.closed_at {
            alarm.closed_at = Some(closed_at);
        }
        Ok(true)
    }

    async fn get_alarm(&self, oracle: &str, alarm_id: u64) -> IndexerResult<Option<Alarm>> {
        let alarms = self.alarms.read().await;
        Ok(alarms.get(&AlarmKey::new(oracle, alarm_id)).cloned())
    }

    async fn latest_lt(&self, oracle: &str) -> IndexerResult<Option<u64>> {
        let alarms = self.alarms.read().await;
        Ok(alarms
            .range(Self::oracle_range(oracle))
            .map(|(_, alarm)| alarm.lt)
            .max())
    }

    async fn add_reward(&self, address: &str, amount: f64) -> IndexerResult<f64> {
        let mut ledger = self.ledger.write().await;
        let total = ledger.entry(address.to_string()).or_insert(0.0);
        *total += amount;
        debug!(address, amount, total = *total, "ledger increment");
        Ok(*total)
    }

    async fn get_reward(&self, address: &str) -> IndexerResult<Option<RewardLedgerEntry>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.get(address).map(|total| RewardLedgerEntry {
            address: address.to_string(),
            accumulated_reward: *total,
        }))
    }

    async fn alarms_by_pair(
        &self,
        pair_id: &str,
        filter: AlarmFilter,
    ) -> IndexerResult<Vec<Alarm>> {
        let alarms = self.alarms.read().await;
        Ok(Self::collect_sorted(
            alarms
                .values()
                .filter(|a| a.pair_id == pair_id && filter.matches(a.status))
                .cloned()
                .collect(),
        ))
    }

    async fn alarms_by_watchmaker(
        &self,
        watchmaker: &str,
        filter: AlarmFilter,
    ) -> IndexerResult<Vec<Alarm>> {
        let alarms = self.alarms.read().await;
        Ok(Self::collect_sorted(
            alarms
                .values()
                .filter(|a| a.watchmaker == watchmaker && filter.matches(a.status))
                .cloned()
                .collect(),
        ))
    }

    async fn top_rewards(&self, limit: usize) -> IndexerResult<Vec<RewardLedgerEntry>> {
        let ledger = self.ledger.read().await;
        let mut entries: Vec<RewardLedgerEntry> = ledger
            .iter()
            .map(|(address, total)| RewardLedgerEntry {
                address: address.clone(),
                accumulated_reward: *total,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.accumulated_reward
                .partial_cmp(&a.accumulated_reward)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(limit);
        Ok(entries)
    }
}
