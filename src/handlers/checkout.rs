//! Checkout initiation.
//!
//! For exclusive tracks the reservation lock must be taken before any
//! Stripe session exists - a buyer who loses the race gets a conflict and
//! no session is ever created for them. The lock is bound to the real
//! session id once Stripe returns one, and released immediately if Stripe
//! fails so the buyer can retry without waiting for the sweep.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::licensing::{self, LicenseQuery};
use crate::models::License;

pub fn router() -> Router<AppState> {
    Router::new().route("/checkout", post(initiate_checkout))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub buyer_id: String,
    pub track_id: String,
    /// Explicit license choice; resolved from the catalog when omitted.
    #[serde(default)]
    pub license_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

pub async fn initiate_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let conn = state.db.get()?;

    let track =
        queries::get_track_by_id(&conn, &request.track_id)?.or_not_found(msg::TRACK_NOT_FOUND)?;
    let buyer = queries::get_account_by_id(&conn, &request.buyer_id)?
        .or_not_found(msg::ACCOUNT_NOT_FOUND)?;

    // An explicit choice must exist; fulfillment's fallback chain is for
    // events, not for buyers typing ids.
    let catalog = queries::list_licenses(&conn)?;
    let license: &License = match request.license_id.as_deref() {
        Some(id) => catalog
            .iter()
            .find(|l| l.id == id)
            .or_not_found("License not found")?,
        None => licensing::resolve_license(
            &LicenseQuery {
                track_is_exclusive: track.exclusive,
                ..Default::default()
            },
            &catalog,
            &track.id,
        )?,
    };

    if track.exclusive && !license.exclusive_allowed {
        return Err(AppError::LicenseIncompatible {
            license_id: license.id.clone(),
            track_id: track.id.clone(),
        });
    }

    // Exclusive tracks are priced per listing; everything else sells at
    // the license's catalog price.
    let amount_cents = if track.exclusive {
        track.price_cents
    } else {
        license.price_cents
    };

    let mut lock_held = false;
    if track.exclusive {
        if track.sold {
            return Err(AppError::Conflict("Track already sold".into()));
        }

        // The Stripe session id does not exist yet; a provisional value
        // keeps the row well-formed until bind below.
        let provisional = format!("provisional-{}", Uuid::new_v4());
        if !queries::try_acquire_track_lock(&conn, &track.id, &buyer.id, &provisional)? {
            tracing::info!(
                track_id = %track.id,
                buyer_id = %buyer.id,
                "Checkout refused: track lock held by another buyer"
            );
            return Err(AppError::Conflict(msg::TRACK_LOCKED.into()));
        }
        lock_held = true;
    }

    let success_url = format!("{}/purchases/success", state.base_url);
    let cancel_url = format!("{}/purchases/cancelled", state.base_url);

    let created = state
        .stripe
        .create_checkout_session(
            &buyer.id,
            &track.id,
            &track.title,
            &license.id,
            &license.name,
            amount_cents,
            &success_url,
            &cancel_url,
        )
        .await;

    let (session_id, checkout_url) = match created {
        Ok(pair) => pair,
        Err(e) => {
            // Undo the reservation so the buyer can retry at once instead
            // of waiting for the abandonment sweep.
            if lock_held {
                if let Err(release_err) = queries::release_track_lock(&conn, &track.id) {
                    tracing::error!(
                        track_id = %track.id,
                        "Failed to release lock after Stripe error: {}",
                        release_err
                    );
                }
            }
            return Err(e);
        }
    };

    if lock_held {
        queries::bind_lock_session(&conn, &track.id, &session_id)?;
    }

    tracing::info!(
        session_id = %session_id,
        track_id = %track.id,
        buyer_id = %buyer.id,
        license_id = %license.id,
        amount_cents,
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        checkout_url,
        session_id,
    }))
}
