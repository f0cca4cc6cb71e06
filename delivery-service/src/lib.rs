//! Delivery Service
//!
//! Replays a generation manifest against the billing platform's HTTP import
//! endpoint: one POST per stored message, a mandatory pacing delay between
//! requests, acknowledgment classification, and an append-only delivery log.
//! Re-running delivery is the retry mechanism; stored messages and control
//! IDs are reused verbatim so the receiver can deduplicate.

pub mod error;
pub mod models;
pub mod orchestrator;

pub use error::*;
pub use models::*;
pub use orchestrator::*;
