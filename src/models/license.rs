use serde::{Deserialize, Serialize};

/// Immutable license catalog row.
///
/// Capability limits are advisory caps shown on the contract; `None` means
/// unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    /// Whether this license may cover an exclusive track.
    pub exclusive_allowed: bool,
    pub max_streams: Option<i64>,
    pub max_copies: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLicense {
    pub name: String,
    pub price_cents: i64,
    pub exclusive_allowed: bool,
    #[serde(default)]
    pub max_streams: Option<i64>,
    #[serde(default)]
    pub max_copies: Option<i64>,
}
