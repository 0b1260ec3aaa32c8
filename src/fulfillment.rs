//! Purchase completion orchestration for checkout events.
//!
//! By the time this module runs, the event is signature-verified, recorded
//! in the ledger, and claimed under the processing lease. Everything here
//! is still written to be safe under replay: completion is keyed on the
//! checkout session and returns the existing purchase rather than
//! duplicating.

use rusqlite::Connection;

use crate::contracts::spawn_contract_notification;
use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::licensing::{self, LicenseQuery};
use crate::models::{CompletePurchase, CompletionOutcome, Track};
use crate::payments::StripeCheckoutSession;

/// Complete a purchase, preferring the unified single-transaction
/// operation.
///
/// When the database predates the entitlements table (version skew during
/// a rolling deploy), the unified operation fails with a missing-table
/// error; the two legacy operations - selected by the track's exclusivity
/// flag - achieve the same invariant on the old schema.
pub fn complete_with_fallback(
    conn: &mut Connection,
    track: &Track,
    input: &CompletePurchase,
) -> Result<CompletionOutcome> {
    match queries::complete_purchase(conn, input) {
        Err(AppError::Database(e)) if is_missing_entitlements_schema(&e) => {
            tracing::warn!(
                track_id = %track.id,
                "Unified purchase completion unavailable (pre-entitlements schema), \
                 using legacy completion"
            );
            if track.exclusive {
                queries::complete_exclusive_purchase(conn, input)
            } else {
                queries::complete_standard_purchase(conn, input)
            }
        }
        other => other,
    }
}

fn is_missing_entitlements_schema(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(_, Some(message))
            if message.contains("no such table: entitlements")
    )
}

/// Fulfill a paid checkout session: resolve the license, run the atomic
/// completion, and trigger contract generation for newly completed
/// purchases.
pub async fn fulfill_checkout(
    state: &AppState,
    session: StripeCheckoutSession,
) -> Result<CompletionOutcome> {
    // Old API-version events occasionally arrive with the metadata
    // stripped; the live session is the source of truth then.
    let session = if session.metadata.buyer_id.is_none() || session.metadata.track_id.is_none() {
        tracing::warn!(
            session_id = %session.id,
            "Checkout event missing metadata, refetching session from Stripe"
        );
        state.stripe.get_checkout_session(&session.id).await?
    } else {
        session
    };

    let buyer_id = session
        .metadata
        .buyer_id
        .as_deref()
        .ok_or(AppError::MissingMetadata("buyer_id"))?;
    let track_id = session
        .metadata
        .track_id
        .as_deref()
        .ok_or(AppError::MissingMetadata("track_id"))?;
    let amount_cents = session
        .amount_total
        .ok_or(AppError::MissingMetadata("amount_total"))?;

    let mut conn = state.db.get()?;

    let track = queries::get_track_by_id(&conn, track_id)?.or_not_found(msg::TRACK_NOT_FOUND)?;
    let buyer = queries::get_account_by_id(&conn, buyer_id)?.or_not_found(msg::ACCOUNT_NOT_FOUND)?;

    let catalog = queries::list_licenses(&conn)?;
    let license = licensing::resolve_license(
        &LicenseQuery {
            explicit_license_id: session.metadata.license_id.as_deref(),
            explicit_license_name: session.metadata.license_name.as_deref(),
            legacy_license_type: session.metadata.license_type.as_deref(),
            track_is_exclusive: track.exclusive,
        },
        &catalog,
        &track.id,
    )?;

    let input = CompletePurchase {
        buyer_id: buyer.id.clone(),
        track_id: track.id.clone(),
        producer_id: track.producer_id.clone(),
        checkout_session_id: session.id.clone(),
        payment_intent_id: session.payment_intent.clone(),
        license_id: license.id.clone(),
        amount_cents,
    };

    let outcome = complete_with_fallback(&mut conn, &track, &input)?;

    match &outcome {
        CompletionOutcome::Completed { purchase_id } => {
            tracing::info!(
                purchase_id = %purchase_id,
                session_id = %session.id,
                track_id = %track.id,
                license_id = %license.id,
                amount_cents,
                "Purchase completed"
            );
            spawn_contract_notification(state.contracts.clone(), purchase_id.clone());
        }
        CompletionOutcome::AlreadyCompleted { purchase_id } => {
            // Defense-in-depth beneath the ledger and lease; no second
            // notification.
            tracing::info!(
                purchase_id = %purchase_id,
                session_id = %session.id,
                "Checkout session already fulfilled"
            );
        }
    }

    Ok(outcome)
}
