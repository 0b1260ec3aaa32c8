//! End-to-end webhook pipeline tests: signature gate, ledger, lease, and
//! fulfillment exercised through the axum handler without a network.

mod common;

use common::*;

use axum::body::Bytes;
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use tempfile::TempDir;

use beatvault::db::{create_pool, AppState};
use beatvault::email::EmailService;
use beatvault::error::AppError;
use beatvault::handlers::checkout::{initiate_checkout, CheckoutRequest};
use beatvault::handlers::contracts::{complete_contract, ContractCompleteRequest};
use beatvault::handlers::webhooks::handle_stripe_webhook;
use beatvault::payments::StripeClient;

const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Pool-backed state over a temp-file database (in-memory SQLite would
/// give every pooled connection its own database).
fn setup_state() -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("test.db");
    let pool = create_pool(db_path.to_str().unwrap()).expect("Failed to create pool");
    {
        let mut conn = pool.get().unwrap();
        migrations::run_migrations(&mut conn).unwrap();
        init_db(&conn).unwrap();
    }

    let state = AppState {
        db: pool,
        stripe: StripeClient::new("sk_test_xxx", WEBHOOK_SECRET),
        contracts: None,
        email: EmailService::new(None, "orders@test.local".to_string()),
        base_url: "http://localhost:3000".to_string(),
        contract_callback_token: Some("cb_test_token".to_string()),
        event_lease_timeout_secs: 300,
        email_lease_timeout_secs: 300,
    };
    (state, dir)
}

fn signed_headers(body: &[u8]) -> HeaderMap {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(body));
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        format!("t={},v1={}", timestamp, signature).parse().unwrap(),
    );
    headers
}

fn checkout_event_body(
    event_id: &str,
    session_id: &str,
    buyer_id: &str,
    track_id: &str,
    license_name: &str,
    amount_cents: i64,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "customer": null,
                "payment_intent": format!("pi_{}", session_id),
                "amount_total": amount_cents,
                "metadata": {
                    "buyer_id": buyer_id,
                    "track_id": track_id,
                    "license_name": license_name,
                }
            }
        }
    }))
    .unwrap()
}

/// Scenario: exclusive checkout event, license referenced by name only.
#[tokio::test]
async fn test_checkout_event_fulfills_purchase() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let buyer = create_test_account(&conn, "buyer@test.local");
    let track = create_test_track(&conn, &producer.id, "Night Shift", true);
    create_test_license(&conn, "Standard", 2999, false);
    create_test_license(&conn, "Exclusive", 49999, true);
    assert!(queries::try_acquire_track_lock(&conn, &track.id, &buyer.id, "cs_1").unwrap());
    drop(conn);

    let body = checkout_event_body("evt_1", "cs_1", &buyer.id, &track.id, "Exclusive", 2500);
    let headers = signed_headers(&body);

    let (status, message) =
        handle_stripe_webhook(State(state.clone()), headers, Bytes::from(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message, "OK");

    let conn = state.db.get().unwrap();
    let purchase = queries::get_completed_purchase_by_session(&conn, "cs_1")
        .unwrap()
        .expect("purchase created");
    assert_eq!(purchase.amount_cents, 2500);
    assert_eq!(purchase.buyer_id, buyer.id);

    assert!(queries::get_entitlement_by_purchase(&conn, &purchase.id).unwrap().is_some());
    assert!(queries::get_track_by_id(&conn, &track.id).unwrap().unwrap().sold);
    assert!(queries::get_track_lock(&conn, &track.id).unwrap().is_none());

    let event = queries::get_event(&conn, "evt_1").unwrap().unwrap();
    assert!(event.processed);
    assert_eq!(event.processing_started_at, None);
    assert_eq!(event.error, None);
}

/// Scenario: the same event redelivered after processing is a pure no-op.
#[tokio::test]
async fn test_redelivered_event_is_noop() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let buyer = create_test_account(&conn, "buyer@test.local");
    let track = create_test_track(&conn, &producer.id, "Night Shift", true);
    create_test_license(&conn, "Exclusive", 49999, true);
    drop(conn);

    let body = checkout_event_body("evt_1", "cs_1", &buyer.id, &track.id, "Exclusive", 2500);

    let (status, _) = handle_stripe_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Redelivery gets a fresh signature (Stripe re-signs retries) but the
    // same event id.
    let (status, message) = handle_stripe_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message, "Already processed");

    let conn = state.db.get().unwrap();
    assert_eq!(queries::count_purchases_for_session(&conn, "cs_1").unwrap(), 1);
}

#[tokio::test]
async fn test_unverifiable_request_is_never_recorded() {
    let (state, _dir) = setup_state();

    let body = checkout_event_body("evt_1", "cs_1", "buyer", "track", "Exclusive", 2500);
    let timestamp = chrono::Utc::now().timestamp();
    let mut headers = HeaderMap::new();
    headers.insert(
        "stripe-signature",
        format!("t={},v1={}", timestamp, "00".repeat(32)).parse().unwrap(),
    );

    let (status, _) = handle_stripe_webhook(State(state.clone()), headers, Bytes::from(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let conn = state.db.get().unwrap();
    assert!(
        queries::get_event(&conn, "evt_1").unwrap().is_none(),
        "rejected deliveries must not touch the ledger"
    );
}

#[tokio::test]
async fn test_contended_event_is_skipped() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let buyer = create_test_account(&conn, "buyer@test.local");
    let track = create_test_track(&conn, &producer.id, "Night Shift", true);
    create_test_license(&conn, "Exclusive", 49999, true);

    let body = checkout_event_body("evt_1", "cs_1", &buyer.id, &track.id, "Exclusive", 2500);

    // Another worker holds a live claim on this event.
    record_test_event(&conn, "evt_1");
    assert!(queries::try_claim_event(&conn, "evt_1", 300).unwrap());
    drop(conn);

    let (status, message) = handle_stripe_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "contention is not an error");
    assert_eq!(message, "Processing in progress");

    let conn = state.db.get().unwrap();
    assert_eq!(
        queries::count_purchases_for_session(&conn, "cs_1").unwrap(),
        0,
        "the losing claimant performed no side effects"
    );
}

#[tokio::test]
async fn test_business_violation_is_terminal() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let buyer = create_test_account(&conn, "buyer@test.local");
    create_test_license(&conn, "Exclusive", 49999, true);
    drop(conn);

    // Event references a track that does not exist.
    let body = checkout_event_body("evt_1", "cs_1", &buyer.id, "trk_ghost", "Exclusive", 2500);

    let (status, message) = handle_stripe_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "redelivery cannot help, so no retry is invited");
    assert_eq!(message, "Event rejected");

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, "evt_1").unwrap().unwrap();
    assert!(event.processed);
    assert!(event.error.is_some());
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let (state, _dir) = setup_state();

    let body = serde_json::to_vec(&serde_json::json!({
        "id": "evt_1",
        "type": "charge.succeeded",
        "data": { "object": {} }
    }))
    .unwrap();

    let (status, message) = handle_stripe_webhook(
        State(state.clone()),
        signed_headers(&body),
        Bytes::from(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message, "Event ignored");

    // Ignored events still settle in the ledger so redeliveries short-circuit.
    let conn = state.db.get().unwrap();
    assert!(queries::get_event(&conn, "evt_1").unwrap().unwrap().processed);
}

// ============ Checkout Initiation ============

/// Scenario: two checkout attempts for the same exclusive track within the
/// checkout window - the loser conflicts before any Stripe session is
/// created.
#[tokio::test]
async fn test_locked_track_conflicts_before_session_creation() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let winner = create_test_account(&conn, "winner@test.local");
    let loser = create_test_account(&conn, "loser@test.local");
    let track = create_test_track(&conn, &producer.id, "Night Shift", true);
    create_test_catalog(&conn);

    // The first buyer's checkout already holds the reservation.
    assert!(queries::try_acquire_track_lock(&conn, &track.id, &winner.id, "cs_winner").unwrap());
    drop(conn);

    // The conflict fires before the handler ever reaches Stripe - no
    // network is available in tests, so reaching Stripe would error with
    // something other than Conflict.
    let result = initiate_checkout(
        State(state.clone()),
        Json(CheckoutRequest {
            buyer_id: loser.id.clone(),
            track_id: track.id.clone(),
            license_id: None,
        }),
    )
    .await;

    assert!(matches!(result.unwrap_err(), AppError::Conflict(_)));

    // The winner's lock is untouched.
    let conn = state.db.get().unwrap();
    let lock = queries::get_track_lock(&conn, &track.id).unwrap().unwrap();
    assert_eq!(lock.account_id, winner.id);
}

#[tokio::test]
async fn test_sold_track_conflicts_without_locking() {
    let (state, _dir) = setup_state();
    let conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let buyer = create_test_account(&conn, "buyer@test.local");
    let track = create_test_track(&conn, &producer.id, "Night Shift", true);
    create_test_catalog(&conn);
    conn.execute("UPDATE tracks SET sold = 1 WHERE id = ?1", [&track.id])
        .unwrap();
    drop(conn);

    let result = initiate_checkout(
        State(state.clone()),
        Json(CheckoutRequest {
            buyer_id: buyer.id.clone(),
            track_id: track.id.clone(),
            license_id: None,
        }),
    )
    .await;
    assert!(matches!(result.unwrap_err(), AppError::Conflict(_)));

    let conn = state.db.get().unwrap();
    assert!(queries::get_track_lock(&conn, &track.id).unwrap().is_none());
}

// ============ Contract Completion Callback ============

#[tokio::test]
async fn test_contract_callback_requires_bearer_token() {
    let (state, _dir) = setup_state();

    let result = complete_contract(
        State(state.clone()),
        HeaderMap::new(),
        Json(ContractCompleteRequest {
            purchase_id: "purch_1".to_string(),
            contract_path: "contracts/purch_1.pdf".to_string(),
        }),
    )
    .await;
    assert!(matches!(result.unwrap_err(), AppError::Unauthorized));

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", "Bearer wrong_token".parse().unwrap());
    let result = complete_contract(
        State(state.clone()),
        headers,
        Json(ContractCompleteRequest {
            purchase_id: "purch_1".to_string(),
            contract_path: "contracts/purch_1.pdf".to_string(),
        }),
    )
    .await;
    assert!(matches!(result.unwrap_err(), AppError::Unauthorized));
}

#[tokio::test]
async fn test_contract_callback_stores_path() {
    let (state, _dir) = setup_state();
    let mut conn = state.db.get().unwrap();
    let producer = create_test_account(&conn, "producer@test.local");
    let buyer = create_test_account(&conn, "buyer@test.local");
    let track = create_test_track(&conn, &producer.id, "Lo-fi Loop", false);
    let (standard, _, _) = create_test_catalog(&conn);

    let input = completion_input(&buyer, &track, &standard, "cs_1", 2999);
    let outcome = queries::complete_purchase(&mut conn, &input).unwrap();
    let purchase_id = outcome.purchase_id().to_string();
    drop(conn);

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", "Bearer cb_test_token".parse().unwrap());

    let status = complete_contract(
        State(state.clone()),
        headers,
        Json(ContractCompleteRequest {
            purchase_id: purchase_id.clone(),
            contract_path: "contracts/cs_1.pdf".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);

    let conn = state.db.get().unwrap();
    let purchase = queries::get_purchase_by_id(&conn, &purchase_id).unwrap().unwrap();
    assert_eq!(purchase.contract_path.as_deref(), Some("contracts/cs_1.pdf"));
}
