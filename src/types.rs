// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain records persisted by the alarm store.

use serde::{Deserialize, Serialize};

/// A registered trading pair bound to one oracle contract.
///
/// Pairs are immutable after registration; administrative re-creation of a
/// pair replaces its stream subscription rather than mutating the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub id: String,
    pub oracle_address: String,
    pub base_asset_address: String,
    pub quote_asset_address: String,
    pub base_asset_symbol: String,
    pub quote_asset_symbol: String,
    pub base_asset_decimals: u32,
    pub quote_asset_decimals: u32,
    /// Minimum base asset amount a Tick commits at full scale,
    /// in human readable units.
    pub min_base_asset_threshold: f64,
}

/// Lifecycle state of an alarm position.
///
/// `Closed` (via Ring) and `Emptied` (via Wind at zero remaining scale) are
/// terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Active,
    Closed,
    Emptied,
}

impl AlarmStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlarmStatus::Closed | AlarmStatus::Emptied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmStatus::Active => "active",
            AlarmStatus::Closed => "closed",
            AlarmStatus::Emptied => "emptied",
        }
    }
}

/// Globally unique alarm identity: one oracle never reuses an alarm id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmKey {
    pub oracle: String,
    pub id: u64,
}

impl AlarmKey {
    pub fn new(oracle: &str, id: u64) -> Self {
        Self {
            oracle: oracle.to_string(),
            id,
        }
    }
}

impl std::fmt::Display for AlarmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.oracle, self.id)
    }
}

/// One alarm position opened against an oracle.
///
/// Amounts and prices are in human readable (decimal scaled) units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// On-chain alarm id, unique per oracle
    pub id: u64,
    /// Alarm contract address as carried by the creating message;
    /// empty when the feed does not include it
    pub address: String,
    /// Logical time of the creating transaction, used as resumption cursor
    pub lt: u64,
    pub pair_id: String,
    pub oracle_address: String,
    /// Address that opened the position
    pub watchmaker: String,
    pub created_at: u64,
    pub closed_at: Option<u64>,
    pub base_asset_amount: f64,
    pub quote_asset_amount: f64,
    pub price: f64,
    pub min_base_asset_threshold: f64,
    /// Scale assigned at creation; never changes afterwards
    pub origin_remain_scale: u32,
    /// Remaining scale; `0 <= remain_scale <= origin_remain_scale`,
    /// non-increasing over the alarm's lifetime
    pub remain_scale: u32,
    pub status: AlarmStatus,
    /// Payout amount, meaningful only once the alarm is closed
    pub reward: f64,
}

impl Alarm {
    pub fn key(&self) -> AlarmKey {
        AlarmKey::new(&self.oracle_address, self.id)
    }
}

/// Accumulated rewards paid out to one address.
/// `accumulated_reward` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardLedgerEntry {
    pub address: String,
    pub accumulated_reward: f64,
}

/// Partial update applied to an existing alarm record.
/// Fields left as `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmUpdate {
    pub status: Option<AlarmStatus>,
    pub remain_scale: Option<u32>,
    pub reward: Option<f64>,
    pub closed_at: Option<u64>,
}

/// Status filter for read queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmFilter {
    All,
    /// Everything not yet closed (active and emptied positions)
    Open,
    Closed,
}

impl AlarmFilter {
    pub fn matches(&self, status: AlarmStatus) -> bool {
        match self {
            AlarmFilter::All => true,
            AlarmFilter::Open => status != AlarmStatus::Closed,
            AlarmFilter::Closed => status == AlarmStatus::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!AlarmStatus::Active.is_terminal());
        assert!(AlarmStatus::Closed.is_terminal());
        assert!(AlarmStatus::Emptied.is_terminal());
    }

    #[test]
    fn test_filter_matches() {
        assert!(AlarmFilter::All.matches(AlarmStatus::Closed));
        assert!(AlarmFilter::Open.matches(AlarmStatus::Active));
        assert!(AlarmFilter::Open.matches(AlarmStatus::Emptied));
        assert!(!AlarmFilter::Open.matches(AlarmStatus::Closed));
        assert!(AlarmFilter::Closed.matches(AlarmStatus::Closed));
        assert!(!AlarmFilter::Closed.matches(AlarmStatus::Active));
    }

    #[test]
    fn test_alarm_key_ordering() {
        // Keys for one oracle sort contiguously, which the memory store's
        // range scans rely on.
        let mut keys = vec![
            AlarmKey::new("oracle_b", 1),
            AlarmKey::new("oracle_a", 9),
            AlarmKey::new("oracle_a", 2),
        ];
        keys.sort();
        assert_eq!(keys[0], AlarmKey::new("oracle_a", 2));
        assert_eq!(keys[1], AlarmKey::new("oracle_a", 9));
        assert_eq!(keys[2], AlarmKey::new("oracle_b", 1));
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&AlarmStatus::Emptied).unwrap(),
            "\"emptied\""
        );
        let status: AlarmStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(status, AlarmStatus::Active);
    }
}
