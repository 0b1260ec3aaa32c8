use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::email_lease;
use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    query_all, query_one, ACCOUNT_COLS, ENTITLEMENT_COLS, LICENSE_COLS, PAYMENT_EVENT_COLS,
    PURCHASE_COLS, SUBSCRIPTION_MIRROR_COLS, TRACK_COLS, TRACK_LOCK_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Accounts ============

pub fn create_account(conn: &Connection, input: &CreateAccount) -> Result<Account> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO accounts (id, email, display_name, stripe_customer_id, stripe_subscription_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.email,
            &input.display_name,
            &input.stripe_customer_id,
            &input.stripe_subscription_id,
            now
        ],
    )?;

    Ok(Account {
        id,
        email: input.email.clone(),
        display_name: input.display_name.clone(),
        stripe_customer_id: input.stripe_customer_id.clone(),
        stripe_subscription_id: input.stripe_subscription_id.clone(),
        created_at: now,
    })
}

pub fn get_account_by_id(conn: &Connection, id: &str) -> Result<Option<Account>> {
    query_one(
        conn,
        &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLS),
        &[&id],
    )
}

pub fn get_account_by_stripe_customer(
    conn: &Connection,
    customer_id: &str,
) -> Result<Option<Account>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM accounts WHERE stripe_customer_id = ?1",
            ACCOUNT_COLS
        ),
        &[&customer_id],
    )
}

pub fn get_account_by_stripe_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<Account>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM accounts WHERE stripe_subscription_id = ?1",
            ACCOUNT_COLS
        ),
        &[&subscription_id],
    )
}

/// Backfill a missing stored customer id on an account. Existing values
/// are left untouched - the stored id stays authoritative.
pub fn backfill_account_stripe_customer(
    conn: &Connection,
    account_id: &str,
    customer_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE accounts SET stripe_customer_id = ?1
         WHERE id = ?2 AND stripe_customer_id IS NULL",
        params![customer_id, account_id],
    )?;
    Ok(affected > 0)
}

// ============ Tracks ============

pub fn create_track(conn: &Connection, input: &CreateTrack) -> Result<Track> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO tracks (id, producer_id, title, exclusive, sold, price_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        params![
            &id,
            &input.producer_id,
            &input.title,
            input.exclusive as i32,
            input.price_cents,
            now
        ],
    )?;

    Ok(Track {
        id,
        producer_id: input.producer_id.clone(),
        title: input.title.clone(),
        exclusive: input.exclusive,
        sold: false,
        price_cents: input.price_cents,
        created_at: now,
    })
}

pub fn get_track_by_id(conn: &Connection, id: &str) -> Result<Option<Track>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tracks WHERE id = ?1", TRACK_COLS),
        &[&id],
    )
}

// ============ License Catalog ============

pub fn create_license(conn: &Connection, input: &CreateLicense) -> Result<License> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO licenses (id, name, price_cents, exclusive_allowed, max_streams, max_copies, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.name,
            input.price_cents,
            input.exclusive_allowed as i32,
            input.max_streams,
            input.max_copies,
            now
        ],
    )?;

    Ok(License {
        id,
        name: input.name.clone(),
        price_cents: input.price_cents,
        exclusive_allowed: input.exclusive_allowed,
        max_streams: input.max_streams,
        max_copies: input.max_copies,
        created_at: now,
    })
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

/// The full catalog, oldest first, as the license resolver consumes it.
pub fn list_licenses(conn: &Connection) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!("SELECT {} FROM licenses ORDER BY created_at, id", LICENSE_COLS),
        &[],
    )
}

// ============ Payment Event Ledger ============

/// Record an inbound event, returning whether it was already fully
/// processed.
///
/// `INSERT OR IGNORE` keyed on the external event id makes the record
/// idempotent; when the row already exists we report its `processed` flag
/// so the caller can short-circuit replayed deliveries with success and no
/// side effects.
pub fn record_event(
    conn: &Connection,
    event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO payment_events (id, event_type, payload, processed, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![event_id, event_type, payload, now()],
    )?;

    if inserted > 0 {
        return Ok(false);
    }

    let processed: bool = conn.query_row(
        "SELECT processed FROM payment_events WHERE id = ?1",
        params![event_id],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;
    Ok(processed)
}

/// Atomically claim an event for processing.
///
/// One compare-and-set UPDATE: succeeds when the row is unprocessed and
/// either unclaimed or holds a claim older than `lease_timeout_secs`.
/// Returns false when another worker holds a live claim - a normal
/// outcome, not an error.
pub fn try_claim_event(conn: &Connection, event_id: &str, lease_timeout_secs: i64) -> Result<bool> {
    let now = now();
    let stale_before = now - lease_timeout_secs;
    let affected = conn.execute(
        "UPDATE payment_events SET processing_started_at = ?1
         WHERE id = ?2 AND processed = 0
           AND (processing_started_at IS NULL OR processing_started_at < ?3)",
        params![now, event_id, stale_before],
    )?;
    Ok(affected > 0)
}

/// Release a claimed event according to its outcome.
///
/// Success and terminal failures both mark the row processed (a redelivery
/// cannot help a business-rule violation); only a retryable failure leaves
/// `processed = 0` so the next delivery can reclaim the row.
pub fn release_event(conn: &Connection, event_id: &str, outcome: &EventOutcome) -> Result<()> {
    match outcome {
        EventOutcome::Completed => {
            conn.execute(
                "UPDATE payment_events
                 SET processed = 1, processing_started_at = NULL, error = NULL
                 WHERE id = ?1",
                params![event_id],
            )?;
        }
        EventOutcome::Terminal(error) => {
            conn.execute(
                "UPDATE payment_events
                 SET processed = 1, processing_started_at = NULL, error = ?1
                 WHERE id = ?2",
                params![error, event_id],
            )?;
        }
        EventOutcome::Retry(error) => {
            conn.execute(
                "UPDATE payment_events
                 SET processing_started_at = NULL, error = ?1
                 WHERE id = ?2",
                params![error, event_id],
            )?;
        }
    }
    Ok(())
}

pub fn get_event(conn: &Connection, event_id: &str) -> Result<Option<PaymentEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_events WHERE id = ?1",
            PAYMENT_EVENT_COLS
        ),
        &[&event_id],
    )
}

/// Purge processed ledger rows beyond the retention period. Stripe stops
/// redelivering after a few days, so old rows only serve forensics.
pub fn purge_processed_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM payment_events WHERE processed = 1 AND created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Track Locks ============

/// Attempt to reserve an exclusive track for checkout.
///
/// Insert-or-conflict on the `track_id` primary key: exactly one of any
/// number of concurrent callers wins. A loser must not go on to create a
/// processor-side checkout session.
pub fn try_acquire_track_lock(
    conn: &Connection,
    track_id: &str,
    account_id: &str,
    provisional_session_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO track_locks (track_id, account_id, checkout_session_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![track_id, account_id, provisional_session_id, now()],
    )?;
    Ok(affected > 0)
}

/// Bind the confirmed Stripe session id to a lock once the session exists.
pub fn bind_lock_session(conn: &Connection, track_id: &str, session_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE track_locks SET checkout_session_id = ?1 WHERE track_id = ?2",
        params![session_id, track_id],
    )?;
    Ok(affected > 0)
}

pub fn release_track_lock(conn: &Connection, track_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM track_locks WHERE track_id = ?1",
        params![track_id],
    )?;
    Ok(affected > 0)
}

pub fn get_track_lock(conn: &Connection, track_id: &str) -> Result<Option<TrackLock>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM track_locks WHERE track_id = ?1",
            TRACK_LOCK_COLS
        ),
        &[&track_id],
    )
}

/// Sweep locks older than the inactivity window (abandoned checkouts).
/// Completed purchases release their lock synchronously, so anything old
/// enough to be swept was never paid for. Returns the number deleted.
pub fn sweep_expired_track_locks(conn: &Connection, max_age_secs: i64) -> Result<usize> {
    let cutoff = now() - max_age_secs;
    let deleted = conn.execute(
        "DELETE FROM track_locks WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Purchase Completion ============

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_completed_purchase_by_session(
    conn: &Connection,
    checkout_session_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE checkout_session_id = ?1 AND status = ?2",
            PURCHASE_COLS
        ),
        &[&checkout_session_id, &STATUS_COMPLETED],
    )
}

fn existing_purchase_id(conn: &Connection, checkout_session_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM purchases WHERE checkout_session_id = ?1 AND status = ?2",
        params![checkout_session_id, STATUS_COMPLETED],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn insert_purchase_row(conn: &Connection, input: &CompletePurchase) -> Result<String> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO purchases (id, buyer_id, track_id, producer_id, checkout_session_id,
                                payment_intent_id, license_id, amount_cents, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &input.buyer_id,
            &input.track_id,
            &input.producer_id,
            &input.checkout_session_id,
            &input.payment_intent_id,
            &input.license_id,
            input.amount_cents,
            STATUS_COMPLETED,
            now()
        ],
    )?;
    Ok(id)
}

fn insert_entitlement_row(
    conn: &Connection,
    purchase_id: &str,
    input: &CompletePurchase,
) -> Result<()> {
    conn.execute(
        "INSERT INTO entitlements (id, purchase_id, buyer_id, track_id, license_id, granted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            gen_id(),
            purchase_id,
            &input.buyer_id,
            &input.track_id,
            &input.license_id,
            now()
        ],
    )?;
    Ok(())
}

/// Consume exclusive inventory. The CAS on `sold = 0` makes the first
/// completing purchase the only winner.
fn mark_track_sold(conn: &Connection, track_id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE tracks SET sold = 1 WHERE id = ?1 AND sold = 0",
        params![track_id],
    )?;
    if affected == 0 {
        return Err(AppError::TrackAlreadySold(track_id.to_string()));
    }
    Ok(())
}

/// Unified purchase completion - one transaction covering the whole state
/// transition.
///
/// All-or-nothing: reject if exclusive inventory is already consumed,
/// insert the completed purchase, grant the entitlement, and clear the
/// track lock. A second invocation for an already-completed checkout
/// session returns the existing purchase id instead of erroring - the
/// business-layer idempotency beneath the event ledger and lease.
pub fn complete_purchase(
    conn: &mut Connection,
    input: &CompletePurchase,
) -> Result<CompletionOutcome> {
    let tx = conn.transaction()?;

    if let Some(purchase_id) = existing_purchase_id(&tx, &input.checkout_session_id)? {
        return Ok(CompletionOutcome::AlreadyCompleted { purchase_id });
    }

    let exclusive: bool = tx
        .query_row(
            "SELECT exclusive FROM tracks WHERE id = ?1",
            params![&input.track_id],
            |row| row.get::<_, i32>(0).map(|v| v != 0),
        )
        .map_err(|e| {
            if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                AppError::NotFound(format!("Track not found: {}", input.track_id))
            } else {
                AppError::Database(e)
            }
        })?;

    if exclusive {
        mark_track_sold(&tx, &input.track_id)?;
    }

    let purchase_id = insert_purchase_row(&tx, input)?;
    insert_entitlement_row(&tx, &purchase_id, input)?;

    tx.execute(
        "DELETE FROM track_locks WHERE track_id = ?1",
        params![&input.track_id],
    )?;

    tx.commit()?;
    Ok(CompletionOutcome::Completed { purchase_id })
}

/// Legacy completion for exclusive tracks, for databases predating the
/// entitlements table. Same invariant: the sold CAS rejects double sales,
/// the purchase row is the entitlement record, the lock is cleared.
pub fn complete_exclusive_purchase(
    conn: &mut Connection,
    input: &CompletePurchase,
) -> Result<CompletionOutcome> {
    let tx = conn.transaction()?;

    if let Some(purchase_id) = existing_purchase_id(&tx, &input.checkout_session_id)? {
        return Ok(CompletionOutcome::AlreadyCompleted { purchase_id });
    }

    mark_track_sold(&tx, &input.track_id)?;
    let purchase_id = insert_purchase_row(&tx, input)?;

    tx.execute(
        "DELETE FROM track_locks WHERE track_id = ?1",
        params![&input.track_id],
    )?;

    tx.commit()?;
    Ok(CompletionOutcome::Completed { purchase_id })
}

/// Legacy completion for non-exclusive tracks (no inventory to consume,
/// no lock to clear).
pub fn complete_standard_purchase(
    conn: &mut Connection,
    input: &CompletePurchase,
) -> Result<CompletionOutcome> {
    let tx = conn.transaction()?;

    if let Some(purchase_id) = existing_purchase_id(&tx, &input.checkout_session_id)? {
        return Ok(CompletionOutcome::AlreadyCompleted { purchase_id });
    }

    let purchase_id = insert_purchase_row(&tx, input)?;

    tx.commit()?;
    Ok(CompletionOutcome::Completed { purchase_id })
}

pub fn get_entitlement_by_purchase(
    conn: &Connection,
    purchase_id: &str,
) -> Result<Option<Entitlement>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE purchase_id = ?1",
            ENTITLEMENT_COLS
        ),
        &[&purchase_id],
    )
}

pub fn count_purchases_for_session(conn: &Connection, checkout_session_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM purchases WHERE checkout_session_id = ?1",
        params![checkout_session_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn set_purchase_contract_path(
    conn: &Connection,
    purchase_id: &str,
    contract_path: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE purchases SET contract_path = ?1 WHERE id = ?2",
        params![contract_path, purchase_id],
    )?;
    Ok(affected > 0)
}

// ============ Contract Email Lease ============

/// Atomically claim the confirmation-email send for a purchase.
///
/// Same CAS discipline as the event lease, but the claim lives inside the
/// `contract_email_sent_at` column itself (see `email_lease`). Succeeds
/// when the field is null or holds a claim older than the lease timeout.
/// Returns the sentinel value written, which the caller needs to roll the
/// claim back safely on failure.
pub fn try_claim_contract_email(
    conn: &Connection,
    purchase_id: &str,
    lease_timeout_secs: i64,
) -> Result<Option<i64>> {
    let now = now();
    let sentinel = email_lease::encode_claim(now);
    let stale_before = now - lease_timeout_secs;

    let affected = conn.execute(
        "UPDATE purchases SET contract_email_sent_at = ?1
         WHERE id = ?2
           AND (contract_email_sent_at IS NULL
                OR (contract_email_sent_at >= ?3
                    AND contract_email_sent_at - ?4 < ?5))",
        params![
            sentinel,
            purchase_id,
            email_lease::CLAIM_CUTOFF,
            email_lease::CLAIM_OFFSET_SECS,
            stale_before
        ],
    )?;

    Ok(if affected > 0 { Some(sentinel) } else { None })
}

/// Overwrite the claim with the genuine send time. To any reader that does
/// not apply the sentinel check this is just a normal timestamp.
pub fn mark_contract_email_sent(conn: &Connection, purchase_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE purchases SET contract_email_sent_at = ?1 WHERE id = ?2",
        params![now(), purchase_id],
    )?;
    Ok(affected > 0)
}

/// Roll a failed send back to null so a later attempt may reclaim.
/// Guarded on our own sentinel so a concurrent reclaimer's state is never
/// clobbered.
pub fn clear_contract_email_claim(
    conn: &Connection,
    purchase_id: &str,
    sentinel: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE purchases SET contract_email_sent_at = NULL
         WHERE id = ?1 AND contract_email_sent_at = ?2",
        params![purchase_id, sentinel],
    )?;
    Ok(affected > 0)
}

// ============ Subscription Mirrors ============

pub fn get_subscription_mirror(
    conn: &Connection,
    account_id: &str,
) -> Result<Option<SubscriptionMirror>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription_mirrors WHERE account_id = ?1",
            SUBSCRIPTION_MIRROR_COLS
        ),
        &[&account_id],
    )
}

pub fn get_subscription_mirror_by_subscription(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<SubscriptionMirror>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription_mirrors WHERE stripe_subscription_id = ?1",
            SUBSCRIPTION_MIRROR_COLS
        ),
        &[&stripe_subscription_id],
    )
}

/// Upsert the single mirror row for an account. Every field including
/// `active` is overwritten - `active` is derived state, never trusted from
/// a previous row.
pub fn upsert_subscription_mirror(conn: &Connection, mirror: &SubscriptionMirror) -> Result<()> {
    conn.execute(
        "INSERT INTO subscription_mirrors
             (account_id, stripe_customer_id, stripe_subscription_id, status,
              current_period_end, active, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(account_id) DO UPDATE SET
             stripe_customer_id = excluded.stripe_customer_id,
             stripe_subscription_id = excluded.stripe_subscription_id,
             status = excluded.status,
             current_period_end = excluded.current_period_end,
             active = excluded.active,
             updated_at = excluded.updated_at",
        params![
            &mirror.account_id,
            &mirror.stripe_customer_id,
            &mirror.stripe_subscription_id,
            &mirror.status,
            mirror.current_period_end,
            mirror.active as i32,
            mirror.updated_at
        ],
    )?;
    Ok(())
}
