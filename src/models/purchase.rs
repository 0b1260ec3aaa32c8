use serde::{Deserialize, Serialize};

/// Purchase status values stored in `purchases.status`.
pub const STATUS_COMPLETED: &str = "completed";

/// A completed license purchase.
///
/// Created exactly once per successful checkout event. The only later
/// mutations are contract/email completion (`contract_path`,
/// `contract_email_sent_at`) - never a second checkout event for the same
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub buyer_id: String,
    pub track_id: String,
    pub producer_id: String,
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub license_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub contract_path: Option<String>,
    /// Email send lease field - see `email_lease` for the tri-state encoding.
    pub contract_email_sent_at: Option<i64>,
    pub created_at: i64,
}

/// Verified event fields handed to purchase completion.
#[derive(Debug, Clone)]
pub struct CompletePurchase {
    pub buyer_id: String,
    pub track_id: String,
    pub producer_id: String,
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub license_id: String,
    pub amount_cents: i64,
}

/// Result of a purchase-completion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The purchase row was created by this call.
    Completed { purchase_id: String },
    /// A completed purchase already existed for this checkout session;
    /// its id is returned instead of erroring or duplicating.
    AlreadyCompleted { purchase_id: String },
}

impl CompletionOutcome {
    pub fn purchase_id(&self) -> &str {
        match self {
            CompletionOutcome::Completed { purchase_id }
            | CompletionOutcome::AlreadyCompleted { purchase_id } => purchase_id,
        }
    }
}

/// Access right granted by a completed purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub purchase_id: String,
    pub buyer_id: String,
    pub track_id: String,
    pub license_id: String,
    pub granted_at: i64,
}
