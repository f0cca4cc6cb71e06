use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Response carried a positive acknowledgment marker.
    Acknowledged,
    /// Response carried a negative acknowledgment or a remote-declared
    /// validation error. Requires operator review; not retried blindly.
    NegativelyAcknowledged,
    /// Network error, timeout, or a response with no parseable
    /// acknowledgment. Eligible for retry on a later run.
    TransportFailed,
    /// The stored message could not be read; no POST was issued.
    NotAttempted,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeliveryStatus::Acknowledged => "acknowledged",
            DeliveryStatus::NegativelyAcknowledged => "negatively_acknowledged",
            DeliveryStatus::TransportFailed => "transport_failed",
            DeliveryStatus::NotAttempted => "not_attempted",
        };
        f.write_str(label)
    }
}

/// One attempt's outcome. Appended, never overwritten; a message
/// accumulates one outcome per run it was attempted in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one manifest entry within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub control_id: String,
    pub claim_id: String,
    pub hl7_file: PathBuf,
    pub outcome: DeliveryOutcome,
}

/// End-of-run summary across all manifest entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub outcomes: Vec<MessageOutcome>,
}

impl DeliveryReport {
    pub fn count(&self, status: DeliveryStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| entry.outcome.status == status)
            .count()
    }

    pub fn acknowledged(&self) -> usize {
        self.count(DeliveryStatus::Acknowledged)
    }

    pub fn negatively_acknowledged(&self) -> usize {
        self.count(DeliveryStatus::NegativelyAcknowledged)
    }

    pub fn transport_failed(&self) -> usize {
        self.count(DeliveryStatus::TransportFailed)
    }

    pub fn not_attempted(&self) -> usize {
        self.count(DeliveryStatus::NotAttempted)
    }

    /// True when every message ended acknowledged; drives the exit signal.
    pub fn is_clean(&self) -> bool {
        self.acknowledged() == self.outcomes.len()
    }
}
