use serde::{Deserialize, Serialize};

/// A track offered on the marketplace.
///
/// `exclusive` tracks are one-of-a-kind: they can be sold to exactly one
/// buyer and require a reservation lock during the checkout window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub producer_id: String,
    pub title: String,
    pub exclusive: bool,
    /// Set once, by purchase completion, for exclusive tracks.
    pub sold: bool,
    pub price_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTrack {
    pub producer_id: String,
    pub title: String,
    pub exclusive: bool,
    pub price_cents: i64,
}

/// Single-winner reservation on an exclusive track during checkout.
///
/// At most one live row per track (`track_id` is the primary key). Created
/// before the Stripe session exists with a provisional session id, rebound
/// to the real id once Stripe returns one, and cleared by purchase
/// completion or the abandonment sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackLock {
    pub track_id: String,
    pub account_id: String,
    pub checkout_session_id: Option<String>,
    pub created_at: i64,
}
