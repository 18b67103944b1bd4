//! Bounded journal of completed requests
//!
//! Introspection only: nothing in the admission path reads the journal.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Caller-classified failure category for a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider reported a rate-limit error; escalates backoff.
    RateLimit,
    Auth,
    Billing,
    Timeout,
    Other,
}

/// One completed (successful or not) provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: uuid::Uuid,
    pub provider: String,
    /// Estimated 70% of the actual total when a split is not separately known.
    pub input_tokens: u64,
    /// Estimated 30% of the actual total.
    pub output_tokens: u64,
    pub timestamp_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Default journal capacity.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

/// Bounded ring of usage records.
///
/// When capacity is exceeded the oldest half is dropped in one compaction
/// rather than evicting record-by-record, keeping appends O(1) amortized.
#[derive(Debug)]
pub struct UsageJournal {
    records: VecDeque<UsageRecord>,
    capacity: usize,
}

impl Default for UsageJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl UsageJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn push(&mut self, record: UsageRecord) {
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            let drop = self.records.len() / 2;
            self.records.drain(..drop);
            tracing::debug!(dropped = drop, "usage journal compacted");
        }
    }

    /// Most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        let start = self.records.len().saturating_sub(limit);
        self.records.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The spec'd 70/30 estimate when the caller only knows the total.
pub fn split_tokens(actual_total: f64) -> (u64, u64) {
    let total = actual_total.max(0.0).round() as u64;
    let input = (actual_total.max(0.0) * 0.7).round() as u64;
    (input.min(total), total.saturating_sub(input.min(total)))
}
