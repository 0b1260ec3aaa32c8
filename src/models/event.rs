use serde::{Deserialize, Serialize};

/// Durable ledger row for one inbound payment-processor event.
///
/// The row doubles as the processing lease: `processing_started_at` is the
/// claim timestamp, cleared on release. Invariant: `processed = true`
/// implies `processing_started_at` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// External event id - the idempotency key.
    pub id: String,
    pub event_type: String,
    pub payload: String,
    pub processed: bool,
    pub processing_started_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// How a claimed event finished, driving the lease release.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// All side effects committed; mark processed, clear claim and error.
    Completed,
    /// Business-rule violation - redelivery cannot help. Mark processed
    /// with the error recorded.
    Terminal(String),
    /// Transient infrastructure failure - clear the claim but leave the
    /// row unprocessed so a redelivery can reclaim it.
    Retry(String),
}
