// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Applies classified oracle events to the alarm store.
//!
//! All business rules live here: what a Tick opens, what a Ring closes and
//! pays, how a Wind consumes a predecessor and spawns its successor. Handlers
//! are written so that reapplying an already-applied event converges on the
//! stored state instead of corrupting it, which is what makes crash recovery
//! a plain replay from the cursor.

use crate::error::{IndexerError, IndexerResult};
use crate::events::{OracleEvent, RingEvent, TickEvent, WindEvent};
use crate::metrics::IndexerMetrics;
use crate::retry_with_max_elapsed_time;
use crate::scale::{round_price, tick_amounts, wind_successor_amounts};
use crate::store::AlarmStore;
use crate::types::{Alarm, AlarmStatus, AlarmUpdate, Pair};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What one applied event changed, for logging and watermark bookkeeping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlarmDelta {
    pub oracle: String,
    pub lt: u64,
    /// Alarm id created by this event
    pub created: Option<u64>,
    /// Alarm id updated by this event
    pub updated: Option<u64>,
    /// Ledger credit issued by this event
    pub reward_paid: Option<(String, f64)>,
}

pub struct EventDispatcher {
    store: Arc<dyn AlarmStore>,
    metrics: Arc<IndexerMetrics>,
    store_retry_timeout: Duration,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn AlarmStore>, metrics: Arc<IndexerMetrics>) -> Self {
        Self {
            store,
            metrics,
            store_retry_timeout: Duration::from_secs(30),
        }
    }

    /// Validate and apply one event for `pair`'s oracle.
    ///
    /// Validation and consistency errors leave the store untouched. Storage
    /// errors may leave a Wind half-applied; replaying the event completes it.
    pub async fn apply(&self, pair: &Pair, event: &OracleEvent) -> IndexerResult<AlarmDelta> {
        self.metrics
            .events_received
            .with_label_values(&[event.kind()])
            .inc();
        event.validate()?;

        let delta = match event {
            OracleEvent::Tick(e) => self.apply_tick(pair, e).await?,
            OracleEvent::Ring(e) => self.apply_ring(pair, e).await?,
            OracleEvent::Wind(e) => self.apply_wind(pair, e).await?,
        };

        self.metrics
            .events_applied
            .with_label_values(&[event.kind()])
            .inc();
        self.metrics
            .last_processed_lt
            .with_label_values(&[delta.oracle.as_str()])
            .set(delta.lt as i64);
        Ok(delta)
    }

    async fn apply_tick(&self, pair: &Pair, event: &TickEvent) -> IndexerResult<AlarmDelta> {
        let oracle = &pair.oracle_address;
        let mut delta = AlarmDelta {
            oracle: oracle.clone(),
            lt: event.tx.lt,
            ..Default::default()
        };

        if self
            .get_alarm_with_retry(oracle, event.new_alarm_id)
            .await?
            .is_some()
        {
            // Redelivered Tick; by now the alarm may have moved past Active,
            // so recreating it would lose state
            debug!(oracle, alarm_id = event.new_alarm_id, "tick already applied");
            return Ok(delta);
        }

        let price = round_price(event.base_asset_price);
        let (base_asset_amount, quote_asset_amount) =
            tick_amounts(pair.min_base_asset_threshold, price);
        let alarm = Alarm {
            id: event.new_alarm_id,
            address: event.tx.msg.clone(),
            lt: event.tx.lt,
            pair_id: pair.id.clone(),
            oracle_address: oracle.clone(),
            watchmaker: event.watchmaker.clone(),
            created_at: event.tx.time,
            closed_at: None,
            base_asset_amount,
            quote_asset_amount,
            price,
            min_base_asset_threshold: pair.min_base_asset_threshold,
            origin_remain_scale: 1,
            remain_scale: 1,
            status: AlarmStatus::Active,
            reward: 0.0,
        };
        self.upsert_with_retry(alarm).await?;
        info!(
            oracle,
            alarm_id = event.new_alarm_id,
            watchmaker = %event.watchmaker,
            price,
            "alarm opened"
        );
        delta.created = Some(event.new_alarm_id);
        Ok(delta)
    }

    async fn apply_ring(&self, pair: &Pair, event: &RingEvent) -> IndexerResult<AlarmDelta> {
        let oracle = &pair.oracle_address;
        let alarm = self
            .get_alarm_with_retry(oracle, event.alarm_id)
            .await?
            .ok_or_else(|| IndexerError::UnknownAlarm {
                oracle: oracle.clone(),
                alarm_id: event.alarm_id,
            })?;
        if alarm.status.is_terminal() {
            // No transition leaves a terminal state: a Ring on a closed alarm
            // is a redelivery that must not pay twice, a Ring on an emptied
            // alarm would pay out a fully consumed position
            return Err(IndexerError::AlarmAlreadyClosed {
                oracle: oracle.clone(),
                alarm_id: event.alarm_id,
            });
        }

        // Close before paying so a crash between the two writes can only
        // lose a credit, never duplicate one
        self.update_with_retry(
            oracle,
            event.alarm_id,
            AlarmUpdate {
                status: Some(AlarmStatus::Closed),
                reward: Some(event.reward),
                closed_at: Some(event.tx.time),
                ..Default::default()
            },
        )
        .await?;
        let total = retry_with_max_elapsed_time!(
            self.store.add_reward(&event.receiver, event.reward),
            self.store_retry_timeout
        )
        .and_then(|r| r)?;
        info!(
            oracle,
            alarm_id = event.alarm_id,
            receiver = %event.receiver,
            reward = event.reward,
            accumulated = total,
            "alarm rung"
        );
        Ok(AlarmDelta {
            oracle: oracle.clone(),
            lt: event.tx.lt,
            updated: Some(event.alarm_id),
            reward_paid: Some((event.receiver.clone(), event.reward)),
            ..Default::default()
        })
    }

    async fn apply_wind(&self, pair: &Pair, event: &WindEvent) -> IndexerResult<AlarmDelta> {
        let oracle = &pair.oracle_address;
        let mut delta = AlarmDelta {
            oracle: oracle.clone(),
            lt: event.tx.lt,
            ..Default::default()
        };

        let predecessor = self
            .get_alarm_with_retry(oracle, event.old_alarm_id)
            .await?
            .ok_or_else(|| IndexerError::MissingPredecessor {
                oracle: oracle.clone(),
                alarm_id: event.old_alarm_id,
            })?;

        if self
            .get_alarm_with_retry(oracle, event.new_alarm_id)
            .await?
            .is_some()
        {
            // Successor exists, both halves of this Wind already landed
            debug!(
                oracle,
                old_alarm_id = event.old_alarm_id,
                new_alarm_id = event.new_alarm_id,
                "wind already applied"
            );
            return Ok(delta);
        }

        if event.old_remain_scale > predecessor.origin_remain_scale {
            return Err(IndexerError::Validation(format!(
                "wind leaves remain scale {} above predecessor origin {}",
                event.old_remain_scale, predecessor.origin_remain_scale
            )));
        }

        if predecessor.status.is_terminal() {
            // Predecessor settled by an earlier replay pass, only the
            // successor write is still outstanding
            debug!(
                oracle,
                old_alarm_id = event.old_alarm_id,
                "wind predecessor already settled"
            );
        } else {
            let update = if event.old_remain_scale == 0 {
                AlarmUpdate {
                    status: Some(AlarmStatus::Emptied),
                    remain_scale: Some(0),
                    ..Default::default()
                }
            } else {
                AlarmUpdate {
                    remain_scale: Some(event.old_remain_scale),
                    ..Default::default()
                }
            };
            self.update_with_retry(oracle, event.old_alarm_id, update)
                .await?;
            delta.updated = Some(event.old_alarm_id);
        }

        let price = round_price(event.new_price);
        let (base_asset_amount, quote_asset_amount) = wind_successor_amounts(
            predecessor.base_asset_amount,
            predecessor.quote_asset_amount,
        );
        let successor = Alarm {
            id: event.new_alarm_id,
            address: String::new(),
            lt: event.tx.lt,
            pair_id: pair.id.clone(),
            oracle_address: oracle.clone(),
            watchmaker: event.timekeeper.clone(),
            created_at: event.tx.time,
            closed_at: None,
            base_asset_amount,
            quote_asset_amount,
            price,
            min_base_asset_threshold: pair.min_base_asset_threshold,
            origin_remain_scale: event.new_remain_scale,
            remain_scale: event.new_remain_scale,
            status: AlarmStatus::Active,
            reward: 0.0,
        };
        self.upsert_with_retry(successor).await?;
        info!(
            oracle,
            old_alarm_id = event.old_alarm_id,
            new_alarm_id = event.new_alarm_id,
            old_remain_scale = event.old_remain_scale,
            new_remain_scale = event.new_remain_scale,
            timekeeper = %event.timekeeper,
            "alarm wound"
        );
        delta.created = Some(event.new_alarm_id);
        Ok(delta)
    }

    async fn get_alarm_with_retry(
        &self,
        oracle: &str,
        alarm_id: u64,
    ) -> IndexerResult<Option<Alarm>> {
        retry_with_max_elapsed_time!(
            self.store.get_alarm(oracle, alarm_id),
            self.store_retry_timeout
        )
        .and_then(|r| r)
    }

    async fn upsert_with_retry(&self, alarm: Alarm) -> IndexerResult<()> {
        retry_with_max_elapsed_time!(
            self.store.upsert_alarm(alarm.clone()),
            self.store_retry_timeout
        )
        .and_then(|r| r)
    }

    async fn update_with_retry(
        &self,
        oracle: &str,
        alarm_id: u64,
        update: AlarmUpdate,
    ) -> IndexerResult<()> {
        let updated = retry_with_max_elapsed_time!(
            self.store.update_alarm(oracle, alarm_id, update.clone()),
            self.store_retry_timeout
        )
        .and_then(|r| r)?;
        if !updated {
            return Err(IndexerError::Storage(format!(
                "alarm {}:{} vanished mid-update",
                oracle, alarm_id
            )));
        }
        Ok(())
    }
}
