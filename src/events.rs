// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Classified oracle contract transactions.
//!
//! The stream client classifies every contract transaction into one of three
//! event kinds. These are pure data; the dispatcher owns all business
//! decisions, so handlers stay decoupled from the stream implementation.

use crate::error::{IndexerError, IndexerResult};
use serde::{Deserialize, Serialize};

/// Metadata of the transaction an event was classified from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMeta {
    /// Per-account logical time, monotonically increasing; not wall clock
    pub lt: u64,
    /// Unix timestamp (seconds) of the transaction
    pub time: u64,
    /// Inbound message payload; for Tick this carries the alarm address
    #[serde(default)]
    pub msg: String,
    /// Transaction hash, used for deduplication at equal lt
    #[serde(default)]
    pub hash: String,
}

/// A new position was opened at full scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub new_alarm_id: u64,
    pub watchmaker: String,
    pub base_asset_price: f64,
    pub tx: TxMeta,
}

/// A position was closed with a payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingEvent {
    pub alarm_id: u64,
    pub receiver: String,
    pub reward: f64,
    pub tx: TxMeta,
}

/// A position was partially or fully consumed, spawning a successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindEvent {
    pub old_alarm_id: u64,
    pub new_alarm_id: u64,
    pub old_price: f64,
    pub new_price: f64,
    pub old_remain_scale: u32,
    pub new_remain_scale: u32,
    pub timekeeper: String,
    pub tx: TxMeta,
}

/// The classified transaction stream of one oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleEvent {
    Tick(TickEvent),
    Ring(RingEvent),
    Wind(WindEvent),
}

impl OracleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OracleEvent::Tick(_) => "tick",
            OracleEvent::Ring(_) => "ring",
            OracleEvent::Wind(_) => "wind",
        }
    }

    pub fn tx(&self) -> &TxMeta {
        match self {
            OracleEvent::Tick(e) => &e.tx,
            OracleEvent::Ring(e) => &e.tx,
            OracleEvent::Wind(e) => &e.tx,
        }
    }

    pub fn lt(&self) -> u64 {
        self.tx().lt
    }

    /// Checks the event payload is structurally sound.
    ///
    /// A failure here is a validation error: reprocessing the same payload
    /// would fail identically, so the event is rejected without retry.
    pub fn validate(&self) -> IndexerResult<()> {
        match self {
            OracleEvent::Tick(e) => {
                validate_address("watchmaker", &e.watchmaker)?;
                validate_price("base_asset_price", e.base_asset_price)?;
            }
            OracleEvent::Ring(e) => {
                validate_address("receiver", &e.receiver)?;
                if !e.reward.is_finite() || e.reward < 0.0 {
                    return Err(IndexerError::Validation(format!(
                        "reward must be a non-negative finite number, got {}",
                        e.reward
                    )));
                }
            }
            OracleEvent::Wind(e) => {
                validate_address("timekeeper", &e.timekeeper)?;
                validate_price("old_price", e.old_price)?;
                validate_price("new_price", e.new_price)?;
                if e.new_alarm_id == e.old_alarm_id {
                    return Err(IndexerError::Validation(format!(
                        "wind successor id {} equals predecessor id",
                        e.new_alarm_id
                    )));
                }
                if e.new_remain_scale == 0 {
                    return Err(IndexerError::Validation(
                        "wind successor must open with nonzero remain scale".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_address(field: &str, address: &str) -> IndexerResult<()> {
    if address.trim().is_empty() {
        return Err(IndexerError::Validation(format!("{} address is empty", field)));
    }
    Ok(())
}

fn validate_price(field: &str, price: f64) -> IndexerResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(IndexerError::Validation(format!(
            "{} must be a positive finite number, got {}",
            field, price
        )));
    }
    Ok(())
}
