use serde::{Deserialize, Serialize};

/// Local mirror of a Stripe subscription, one row per account.
///
/// `active` is derived on every upsert from `status` and
/// `current_period_end`, never carried over from a previous row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionMirror {
    pub account_id: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: String,
    pub current_period_end: i64,
    pub active: bool,
    pub updated_at: i64,
}

/// Normalized fields from a subscription or invoice event.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub status: String,
    /// Period end from the event; reconciliation falls back to the prior
    /// mirror row, then to "now" (treated inactive), when absent.
    pub current_period_end: Option<i64>,
    /// Account id embedded in the billing object's own metadata, if any.
    pub metadata_account_id: Option<String>,
}
