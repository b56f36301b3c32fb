// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for unit tests.

use crate::error::IndexerResult;
use crate::events::{OracleEvent, RingEvent, TickEvent, TxMeta, WindEvent};
use crate::stream::{Cursor, OracleStreamClient, OrderingGuard, StreamItem};
use crate::types::Pair;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn test_pair() -> Pair {
    Pair {
        id: "ton-usdt".to_string(),
        oracle_address: "EQOracleTonUsdt".to_string(),
        base_asset_address: "EQBaseTon".to_string(),
        quote_asset_address: "EQQuoteUsdt".to_string(),
        base_asset_symbol: "TON".to_string(),
        quote_asset_symbol: "USDT".to_string(),
        base_asset_decimals: 9,
        quote_asset_decimals: 6,
        min_base_asset_threshold: 1.0,
    }
}

fn tx(lt: u64) -> TxMeta {
    TxMeta {
        lt,
        time: 1_700_000_000 + lt,
        msg: String::new(),
        hash: format!("hash-{lt}"),
    }
}

pub fn tick(lt: u64, new_alarm_id: u64, watchmaker: &str, price: f64) -> OracleEvent {
    OracleEvent::Tick(TickEvent {
        new_alarm_id,
        watchmaker: watchmaker.to_string(),
        base_asset_price: price,
        tx: tx(lt),
    })
}

pub fn ring(lt: u64, alarm_id: u64, receiver: &str, reward: f64) -> OracleEvent {
    OracleEvent::Ring(RingEvent {
        alarm_id,
        receiver: receiver.to_string(),
        reward,
        tx: tx(lt),
    })
}

#[allow(clippy::too_many_arguments)]
pub fn wind(
    lt: u64,
    old_alarm_id: u64,
    new_alarm_id: u64,
    old_remain_scale: u32,
    new_remain_scale: u32,
    timekeeper: &str,
    new_price: f64,
) -> OracleEvent {
    OracleEvent::Wind(WindEvent {
        old_alarm_id,
        new_alarm_id,
        old_price: new_price,
        new_price,
        old_remain_scale,
        new_remain_scale,
        timekeeper: timekeeper.to_string(),
        tx: tx(lt),
    })
}

/// Stream client replaying a fixed script of events.
///
/// Respects the cursor contract the way a real client does: events at or
/// before the cursor are filtered out, so a resubscription picks up exactly
/// where the store left off. The channel stays open until cancellation,
/// matching a live feed that idles once caught up. An armed failure fires
/// once after the configured number of delivered events.
pub struct ScriptedStreamClient {
    events: Vec<OracleEvent>,
    fail_after: Mutex<Option<(usize, bool)>>,
}

impl ScriptedStreamClient {
    pub fn new(events: Vec<OracleEvent>) -> Self {
        Self {
            events,
            fail_after: Mutex::new(None),
        }
    }

    /// Arm a one-shot recoverable failure after `delivered` events.
    pub async fn fail_after(&self, delivered: usize) {
        *self.fail_after.lock().await = Some((delivered, true));
    }

    /// Arm a one-shot permanent failure after `delivered` events.
    pub async fn fail_permanently_after(&self, delivered: usize) {
        *self.fail_after.lock().await = Some((delivered, false));
    }
}

#[async_trait]
impl OracleStreamClient for ScriptedStreamClient {
    async fn subscribe(
        &self,
        pair: &Pair,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> IndexerResult<mpsc::Receiver<StreamItem>> {
        let (tx, rx) = mpsc::channel(64);
        let oracle = pair.oracle_address.clone();
        let fail_after = self.fail_after.lock().await.take();

        let mut guard = OrderingGuard::new(cursor);
        let events: Vec<OracleEvent> = self
            .events
            .iter()
            .filter(|e| guard.admit(e))
            .cloned()
            .collect();

        tokio::spawn(async move {
            if tx
                .send(StreamItem::Started {
                    oracle: oracle.clone(),
                    cursor,
                })
                .await
                .is_err()
            {
                return;
            }
            let mut delivered = 0;
            for event in events {
                if let Some((after, recoverable)) = fail_after {
                    if after == delivered {
                        let _ = tx
                            .send(StreamItem::StreamError {
                                error: "scripted failure".to_string(),
                                recoverable,
                            })
                            .await;
                        return;
                    }
                }
                if tx.send(StreamItem::Event(event)).await.is_err() {
                    return;
                }
                delivered += 1;
            }
            if tx.send(StreamItem::CaughtUp { oracle }).await.is_err() {
                return;
            }
            // Idle like a live feed until the worker goes away
            cancel.cancelled().await;
            let _ = tx
                .send(StreamItem::Stopped {
                    reason: "cancelled".to_string(),
                })
                .await;
        });

        Ok(rx)
    }
}
