// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while ingesting oracle events.
///
/// The taxonomy matters to callers: validation errors are rejected and never
/// retried, consistency errors are surfaced to operators, and transient
/// errors are retried (per-write with backoff, or by restarting the owning
/// stream worker from the last processed cursor).
#[derive(Debug, Clone, PartialEq)]
pub enum IndexerError {
    // Malformed event payload (bad address, non-finite amount, missing field)
    Validation(String),
    // Ring references an alarm the store has never seen
    UnknownAlarm { oracle: String, alarm_id: u64 },
    // Ring references an alarm already in a terminal state (closed or emptied)
    AlarmAlreadyClosed { oracle: String, alarm_id: u64 },
    // Wind references a predecessor alarm the store has never seen
    MissingPredecessor { oracle: String, alarm_id: u64 },
    // Store temporarily unavailable or write gave up after retries
    Storage(String),
    // Stream connection or feed failure
    Stream(String),
    // Uncategorized error
    Generic(String),
}

impl IndexerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            IndexerError::Validation(_) => "validation",
            IndexerError::UnknownAlarm { .. } => "unknown_alarm",
            IndexerError::AlarmAlreadyClosed { .. } => "alarm_already_closed",
            IndexerError::MissingPredecessor { .. } => "missing_predecessor",
            IndexerError::Storage(_) => "storage",
            IndexerError::Stream(_) => "stream",
            IndexerError::Generic(_) => "generic",
        }
    }

    /// True for errors that indicate the stream and the store disagree.
    /// These must reach an operator; retrying cannot resolve them.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            IndexerError::UnknownAlarm { .. }
                | IndexerError::AlarmAlreadyClosed { .. }
                | IndexerError::MissingPredecessor { .. }
        )
    }

    /// True for infrastructure errors that are expected to clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::Storage(_) | IndexerError::Stream(_))
    }
}

impl std::fmt::Display for IndexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerError::Validation(msg) => write!(f, "validation error: {}", msg),
            IndexerError::UnknownAlarm { oracle, alarm_id } => {
                write!(f, "alarm {} is unknown for oracle {}", alarm_id, oracle)
            }
            IndexerError::AlarmAlreadyClosed { oracle, alarm_id } => {
                write!(f, "alarm {} for oracle {} is already closed", alarm_id, oracle)
            }
            IndexerError::MissingPredecessor { oracle, alarm_id } => {
                write!(
                    f,
                    "predecessor alarm {} for oracle {} is missing",
                    alarm_id, oracle
                )
            }
            IndexerError::Storage(msg) => write!(f, "storage error: {}", msg),
            IndexerError::Stream(msg) => write!(f, "stream error: {}", msg),
            IndexerError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for IndexerError {}

pub type IndexerResult<T> = Result<T, IndexerError>;
