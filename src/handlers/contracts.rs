//! Contract-completion callback and confirmation email delivery.
//!
//! The contract service calls back once the agreement PDF is rendered. The
//! handler stores the path and returns; the confirmation email goes out in
//! a background task guarded by the send lease, so a crashed worker's
//! half-done send is recoverable by timeout and a duplicate callback can
//! never produce a second email.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::email::{mask_email, PurchaseEmail};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::models::{Account, License, Purchase, Track};

pub fn router() -> Router<AppState> {
    Router::new().route("/contracts/complete", post(complete_contract))
}

#[derive(Debug, Deserialize)]
pub struct ContractCompleteRequest {
    pub purchase_id: String,
    pub contract_path: String,
}

/// Extract a Bearer token from the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub async fn complete_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ContractCompleteRequest>,
) -> Result<StatusCode> {
    // Reject by default: an unset callback token means no caller is valid.
    let expected = state
        .contract_callback_token
        .as_deref()
        .ok_or(AppError::Unauthorized)?;
    if extract_bearer_token(&headers) != Some(expected) {
        return Err(AppError::Unauthorized);
    }

    let conn = state.db.get()?;
    if !queries::set_purchase_contract_path(&conn, &request.purchase_id, &request.contract_path)? {
        return Err(AppError::NotFound(msg::PURCHASE_NOT_FOUND.into()));
    }
    drop(conn);

    tracing::info!(
        purchase_id = %request.purchase_id,
        contract_path = %request.contract_path,
        "Contract stored, scheduling confirmation email"
    );

    let state = state.clone();
    let purchase_id = request.purchase_id.clone();
    tokio::spawn(async move {
        if let Err(e) = deliver_confirmation_email(&state, &purchase_id).await {
            tracing::error!(
                purchase_id = %purchase_id,
                error = %e,
                "Confirmation email delivery failed"
            );
        }
    });

    Ok(StatusCode::ACCEPTED)
}

fn load_email_parts(
    conn: &Connection,
    purchase_id: &str,
) -> Result<(Purchase, Account, Track, License)> {
    let purchase =
        queries::get_purchase_by_id(conn, purchase_id)?.or_not_found(msg::PURCHASE_NOT_FOUND)?;
    let buyer = queries::get_account_by_id(conn, &purchase.buyer_id)?
        .or_not_found(msg::ACCOUNT_NOT_FOUND)?;
    let track =
        queries::get_track_by_id(conn, &purchase.track_id)?.or_not_found(msg::TRACK_NOT_FOUND)?;
    let license = queries::get_license_by_id(conn, &purchase.license_id)?
        .or_not_found("License not found")?;
    Ok((purchase, buyer, track, license))
}

/// Send the confirmation email for a purchase, exactly once.
///
/// The send lease lives inside `contract_email_sent_at` (see
/// `email_lease`): claim, send, then either stamp the genuine send time or
/// roll the field back to null so a later attempt may reclaim.
pub async fn deliver_confirmation_email(state: &AppState, purchase_id: &str) -> Result<()> {
    let conn = state.db.get()?;

    let Some(sentinel) =
        queries::try_claim_contract_email(&conn, purchase_id, state.email_lease_timeout_secs)?
    else {
        tracing::debug!(
            purchase_id = %purchase_id,
            "Confirmation email already sent or claimed, skipping"
        );
        return Ok(());
    };

    // Load everything the template needs; any failure from here on rolls
    // the claim back so the send can be retried.
    let (purchase, buyer, track, license) = match load_email_parts(&conn, purchase_id) {
        Ok(parts) => parts,
        Err(e) => {
            queries::clear_contract_email_claim(&conn, purchase_id, sentinel)?;
            return Err(e);
        }
    };

    let contract_url = format!("{}/contracts/{}", state.base_url, purchase.id);
    let sent = state
        .email
        .send_purchase_confirmation(PurchaseEmail {
            to_email: &buyer.email,
            buyer_name: &buyer.display_name,
            track_title: &track.title,
            license_name: &license.name,
            amount_cents: purchase.amount_cents,
            purchased_at: purchase.created_at,
            contract_url: &contract_url,
        })
        .await;

    match sent {
        Ok(()) => {
            queries::mark_contract_email_sent(&conn, purchase_id)?;
            tracing::info!(
                purchase_id = %purchase_id,
                to = %mask_email(&buyer.email),
                "Confirmation email sent"
            );
            Ok(())
        }
        Err(e) => {
            queries::clear_contract_email_claim(&conn, purchase_id, sentinel)?;
            tracing::error!(
                purchase_id = %purchase_id,
                to = %mask_email(&buyer.email),
                error = %e,
                "Confirmation email send failed, claim rolled back"
            );
            Err(e)
        }
    }
}
