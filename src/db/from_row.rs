//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ACCOUNT_COLS: &str =
    "id, email, display_name, stripe_customer_id, stripe_subscription_id, created_at";

pub const TRACK_COLS: &str = "id, producer_id, title, exclusive, sold, price_cents, created_at";

pub const LICENSE_COLS: &str =
    "id, name, price_cents, exclusive_allowed, max_streams, max_copies, created_at";

pub const PAYMENT_EVENT_COLS: &str =
    "id, event_type, payload, processed, processing_started_at, error, created_at";

pub const PURCHASE_COLS: &str = "id, buyer_id, track_id, producer_id, checkout_session_id, payment_intent_id, license_id, amount_cents, status, contract_path, contract_email_sent_at, created_at";

pub const ENTITLEMENT_COLS: &str =
    "id, purchase_id, buyer_id, track_id, license_id, granted_at";

pub const TRACK_LOCK_COLS: &str = "track_id, account_id, checkout_session_id, created_at";

pub const SUBSCRIPTION_MIRROR_COLS: &str = "account_id, stripe_customer_id, stripe_subscription_id, status, current_period_end, active, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Account {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Account {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            stripe_customer_id: row.get(3)?,
            stripe_subscription_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Track {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Track {
            id: row.get(0)?,
            producer_id: row.get(1)?,
            title: row.get(2)?,
            exclusive: row.get::<_, i32>(3)? != 0,
            sold: row.get::<_, i32>(4)? != 0,
            price_cents: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            exclusive_allowed: row.get::<_, i32>(3)? != 0,
            max_streams: row.get(4)?,
            max_copies: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for PaymentEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentEvent {
            id: row.get(0)?,
            event_type: row.get(1)?,
            payload: row.get(2)?,
            processed: row.get::<_, i32>(3)? != 0,
            processing_started_at: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Purchase {
            id: row.get(0)?,
            buyer_id: row.get(1)?,
            track_id: row.get(2)?,
            producer_id: row.get(3)?,
            checkout_session_id: row.get(4)?,
            payment_intent_id: row.get(5)?,
            license_id: row.get(6)?,
            amount_cents: row.get(7)?,
            status: row.get(8)?,
            contract_path: row.get(9)?,
            contract_email_sent_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl FromRow for Entitlement {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Entitlement {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            buyer_id: row.get(2)?,
            track_id: row.get(3)?,
            license_id: row.get(4)?,
            granted_at: row.get(5)?,
        })
    }
}

impl FromRow for TrackLock {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TrackLock {
            track_id: row.get(0)?,
            account_id: row.get(1)?,
            checkout_session_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for SubscriptionMirror {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SubscriptionMirror {
            account_id: row.get(0)?,
            stripe_customer_id: row.get(1)?,
            stripe_subscription_id: row.get(2)?,
            status: row.get(3)?,
            current_period_end: row.get(4)?,
            active: row.get::<_, i32>(5)? != 0,
            updated_at: row.get(6)?,
        })
    }
}
