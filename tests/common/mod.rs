//! Test utilities and fixtures for Beatvault integration tests

#![allow(dead_code)]

use rusqlite::Connection;

pub use beatvault::db::{init_db, migrations, queries};
pub use beatvault::models::*;

/// Create an in-memory test database at the current schema version.
pub fn setup_test_db() -> Connection {
    let mut conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    migrations::run_migrations(&mut conn).expect("Failed to run migrations");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create an in-memory database at schema version 1 - before the
/// entitlements table existed. Used to exercise the legacy purchase
/// completion paths.
pub fn setup_v1_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn.execute_batch("DROP TABLE entitlements;")
        .expect("Failed to drop entitlements table");
    migrations::set_version(&conn, 1).expect("Failed to set schema version");
    conn
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn create_test_account(conn: &Connection, email: &str) -> Account {
    queries::create_account(
        conn,
        &CreateAccount {
            email: email.to_string(),
            display_name: format!("Test {}", email),
            stripe_customer_id: None,
            stripe_subscription_id: None,
        },
    )
    .expect("Failed to create test account")
}

pub fn create_test_account_with_billing(
    conn: &Connection,
    email: &str,
    customer_id: Option<&str>,
    subscription_id: Option<&str>,
) -> Account {
    queries::create_account(
        conn,
        &CreateAccount {
            email: email.to_string(),
            display_name: format!("Test {}", email),
            stripe_customer_id: customer_id.map(String::from),
            stripe_subscription_id: subscription_id.map(String::from),
        },
    )
    .expect("Failed to create test account")
}

pub fn create_test_track(
    conn: &Connection,
    producer_id: &str,
    title: &str,
    exclusive: bool,
) -> Track {
    queries::create_track(
        conn,
        &CreateTrack {
            producer_id: producer_id.to_string(),
            title: title.to_string(),
            exclusive,
            price_cents: 79999,
        },
    )
    .expect("Failed to create test track")
}

pub fn create_test_license(
    conn: &Connection,
    name: &str,
    price_cents: i64,
    exclusive_allowed: bool,
) -> License {
    queries::create_license(
        conn,
        &CreateLicense {
            name: name.to_string(),
            price_cents,
            exclusive_allowed,
            max_streams: None,
            max_copies: None,
        },
    )
    .expect("Failed to create test license")
}

/// Seed the usual three-tier catalog: standard, premium, exclusive.
pub fn create_test_catalog(conn: &Connection) -> (License, License, License) {
    let standard = create_test_license(conn, "standard", 2999, false);
    let premium = create_test_license(conn, "premium", 9999, true);
    let exclusive = create_test_license(conn, "exclusive", 49999, true);
    (standard, premium, exclusive)
}

/// Record a fresh ledger row for an event id.
pub fn record_test_event(conn: &Connection, event_id: &str) {
    let already = queries::record_event(conn, event_id, "checkout.session.completed", "{}")
        .expect("Failed to record test event");
    assert!(!already, "test event should be new");
}

/// Build completion input for a buyer/track/license triple.
pub fn completion_input(
    buyer: &Account,
    track: &Track,
    license: &License,
    session_id: &str,
    amount_cents: i64,
) -> CompletePurchase {
    CompletePurchase {
        buyer_id: buyer.id.clone(),
        track_id: track.id.clone(),
        producer_id: track.producer_id.clone(),
        checkout_session_id: session_id.to_string(),
        payment_intent_id: Some(format!("pi_{}", session_id)),
        license_id: license.id.clone(),
        amount_cents,
    }
}
