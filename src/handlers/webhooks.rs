//! Stripe webhook intake.
//!
//! Deliveries are at-least-once and possibly concurrent; the pipeline
//! turns them into exactly-once side effects:
//!
//! 1. verify the signature - unverifiable requests never touch the ledger;
//! 2. record the event - replays of processed events short-circuit;
//! 3. claim the processing lease - concurrent claimants skip out;
//! 4. dispatch on the event type;
//! 5. release the lease per the outcome (success / terminal / retry).
//!
//! Stripe only ever sees an HTTP status: 200 for anything redelivery
//! cannot improve (success, replay, contention, business rejection), 500
//! for transient failures so it redelivers.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::fulfillment;
use crate::models::{EventOutcome, SubscriptionUpdate};
use crate::payments::{StripeCheckoutSession, StripeInvoice, StripeSubscription, StripeWebhookEvent};
use crate::subscriptions;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/stripe", post(handle_stripe_webhook))
}

fn extract_signature(headers: &HeaderMap) -> std::result::Result<&str, WebhookResult> {
    headers
        .get("stripe-signature")
        .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
        .to_str()
        .map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid signature header")
        })
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match extract_signature(&headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    // Verify before trusting any field; unverifiable requests are never
    // recorded in the ledger.
    match state.stripe.verify_webhook_signature(&body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => {
            tracing::debug!("Malformed Stripe signature header: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid signature header");
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Outermost idempotence guarantee: a replayed delivery of a processed
    // event is a pure no-op.
    match queries::record_event(
        &conn,
        &event.id,
        &event.event_type,
        &String::from_utf8_lossy(&body),
    ) {
        Ok(false) => {}
        Ok(true) => {
            tracing::info!(event_id = %event.id, "Replayed event already processed");
            return (StatusCode::OK, "Already processed");
        }
        Err(e) => {
            tracing::error!("Failed to record event: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    // Exactly one invocation may hold a non-stale lease; losing the claim
    // is a normal outcome, not an error.
    match queries::try_claim_event(&conn, &event.id, state.event_lease_timeout_secs) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(event_id = %event.id, "Event claimed by another worker, skipping");
            return (StatusCode::OK, "Processing in progress");
        }
        Err(e) => {
            tracing::error!("Failed to claim event: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }
    drop(conn);

    let event_id = event.id.clone();
    let dispatched = dispatch(&state, event).await;

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            // The claim stays in place and is recovered by lease timeout.
            tracing::error!("DB connection error during release: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let (outcome, response) = match dispatched {
        Ok(message) => (EventOutcome::Completed, (StatusCode::OK, message)),
        Err(e) if e.is_terminal() => {
            tracing::warn!(event_id = %event_id, error = %e, "Event rejected (terminal)");
            (
                EventOutcome::Terminal(e.to_string()),
                (StatusCode::OK, "Event rejected"),
            )
        }
        Err(e) => {
            tracing::error!(event_id = %event_id, error = %e, "Event processing failed, will retry");
            (
                EventOutcome::Retry(e.to_string()),
                (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed"),
            )
        }
    };

    if let Err(e) = queries::release_event(&conn, &event_id, &outcome) {
        tracing::error!(event_id = %event_id, "Failed to release event lease: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    response
}

async fn dispatch(state: &AppState, event: StripeWebhookEvent) -> Result<&'static str> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = serde_json::from_value(event.data.object)?;
            if session.payment_status != "paid" {
                return Ok("Ignored: session not paid");
            }
            fulfillment::fulfill_checkout(state, session).await?;
            Ok("OK")
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let subscription: StripeSubscription = serde_json::from_value(event.data.object)?;
            let conn = state.db.get()?;
            subscriptions::reconcile(
                &conn,
                &SubscriptionUpdate {
                    stripe_customer_id: subscription.customer.clone(),
                    stripe_subscription_id: subscription.id.clone(),
                    status: subscription.status.clone(),
                    current_period_end: subscription.current_period_end,
                    metadata_account_id: subscription.metadata.account_id.clone(),
                },
            )?;
            Ok("OK")
        }
        "invoice.paid" | "invoice.payment_failed" => {
            let invoice: StripeInvoice = serde_json::from_value(event.data.object)?;
            let Some(subscription_id) = invoice.subscription else {
                return Ok("Ignored: invoice without subscription");
            };
            let customer_id = invoice
                .customer
                .ok_or(AppError::MissingMetadata("customer"))?;
            let status = if event.event_type == "invoice.paid" {
                "active"
            } else {
                "past_due"
            };
            let conn = state.db.get()?;
            subscriptions::reconcile(
                &conn,
                &SubscriptionUpdate {
                    stripe_customer_id: customer_id,
                    stripe_subscription_id: subscription_id,
                    status: status.to_string(),
                    current_period_end: invoice.period_end,
                    metadata_account_id: None,
                },
            )?;
            Ok("OK")
        }
        _ => Ok("Event ignored"),
    }
}
