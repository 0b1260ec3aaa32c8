use serde::{Deserialize, Serialize};

/// Marketplace user - buyer or producer.
///
/// The `stripe_*` ids are the join points between Stripe's billing identity
/// and our own accounts; either may be missing for accounts that have never
/// checked out or subscribed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccount {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
}
