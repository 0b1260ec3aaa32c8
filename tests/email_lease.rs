//! Contract email send-lease tests
//!
//! The lease lives inside the purchases.contract_email_sent_at column:
//! null = never attempted, sentinel-future = claimed, near-present = sent.

mod common;

use common::*;

use beatvault::email_lease::{classify, EmailLeaseState, CLAIM_CUTOFF};
use rusqlite::Connection;

/// Complete a purchase so there is a row to lease.
fn setup_purchase(conn: &mut Connection) -> String {
    let producer = create_test_account(conn, "producer@test.local");
    let buyer = create_test_account(conn, "buyer@test.local");
    let track = create_test_track(conn, &producer.id, "Night Shift", false);
    let (standard, _, _) = create_test_catalog(conn);

    let input = completion_input(&buyer, &track, &standard, "cs_1", 2999);
    let outcome = queries::complete_purchase(conn, &input).unwrap();
    outcome.purchase_id().to_string()
}

fn stored_marker(conn: &Connection, purchase_id: &str) -> Option<i64> {
    queries::get_purchase_by_id(conn, purchase_id)
        .unwrap()
        .unwrap()
        .contract_email_sent_at
}

#[test]
fn test_claim_writes_decodable_sentinel() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    let sentinel = queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .expect("fresh purchase is claimable");

    let stored = stored_marker(&conn, &purchase_id).expect("claim stored");
    assert_eq!(stored, sentinel);
    assert!(stored >= CLAIM_CUTOFF, "claims land past the year-2100 cutoff");

    let EmailLeaseState::Claimed { started_at } = classify(stored) else {
        panic!("stored value must decode as a claim");
    };
    assert!((started_at - now()).abs() <= 2, "claim start is recoverable");
}

#[test]
fn test_second_claim_is_blocked() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    assert!(queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .is_some());
    assert!(
        queries::try_claim_contract_email(&conn, &purchase_id, 300)
            .unwrap()
            .is_none(),
        "a live claim excludes other senders"
    );
}

#[test]
fn test_failure_rolls_back_to_null_and_allows_reclaim() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    let sentinel = queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .unwrap();
    assert!(queries::clear_contract_email_claim(&conn, &purchase_id, sentinel).unwrap());

    assert_eq!(stored_marker(&conn, &purchase_id), None, "failure restores null");

    assert!(
        queries::try_claim_contract_email(&conn, &purchase_id, 300)
            .unwrap()
            .is_some(),
        "a later attempt may reclaim"
    );
}

#[test]
fn test_success_stores_plausible_send_timestamp() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .unwrap();
    assert!(queries::mark_contract_email_sent(&conn, &purchase_id).unwrap());

    let stored = stored_marker(&conn, &purchase_id).expect("send time stored");
    let EmailLeaseState::Sent { sent_at } = classify(stored) else {
        panic!("a successful send must never decode as a claim in progress");
    };
    assert!((sent_at - now()).abs() <= 2);

    assert!(
        queries::try_claim_contract_email(&conn, &purchase_id, 300)
            .unwrap()
            .is_none(),
        "sent purchases are never reclaimed"
    );
}

#[test]
fn test_stale_claim_is_reclaimable() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .unwrap();

    // Simulate a sender that crashed mid-send 10 minutes ago.
    let stale = beatvault::email_lease::encode_claim(now() - 600);
    conn.execute(
        "UPDATE purchases SET contract_email_sent_at = ?1 WHERE id = ?2",
        rusqlite::params![stale, purchase_id],
    )
    .unwrap();

    assert!(
        queries::try_claim_contract_email(&conn, &purchase_id, 300)
            .unwrap()
            .is_some(),
        "claims older than the lease timeout are recoverable"
    );
}

#[test]
fn test_young_claim_is_not_reclaimable() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    let young = beatvault::email_lease::encode_claim(now() - 60);
    conn.execute(
        "UPDATE purchases SET contract_email_sent_at = ?1 WHERE id = ?2",
        rusqlite::params![young, purchase_id],
    )
    .unwrap();

    assert!(queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .is_none());
}

#[test]
fn test_rollback_guard_respects_other_claimants() {
    let mut conn = setup_test_db();
    let purchase_id = setup_purchase(&mut conn);

    let stale_sentinel = beatvault::email_lease::encode_claim(now() - 600);
    conn.execute(
        "UPDATE purchases SET contract_email_sent_at = ?1 WHERE id = ?2",
        rusqlite::params![stale_sentinel, purchase_id],
    )
    .unwrap();

    // Another worker reclaims the stale lease...
    let new_sentinel = queries::try_claim_contract_email(&conn, &purchase_id, 300)
        .unwrap()
        .unwrap();

    // ...so the crashed worker's late rollback must be a no-op.
    assert!(!queries::clear_contract_email_claim(&conn, &purchase_id, stale_sentinel).unwrap());
    assert_eq!(stored_marker(&conn, &purchase_id), Some(new_sentinel));
}
