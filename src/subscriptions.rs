//! Subscription state reconciliation.
//!
//! Stripe's notion of who a subscription belongs to and ours drift: old
//! accounts predate stored customer ids, some subscriptions were created
//! from the dashboard with only an `account_id` metadata tag, and a few
//! early rows only ever recorded the subscription id. Resolution is a
//! cascade of independent lookups, first match wins; the mirror row is
//! then upserted with `active` recomputed from scratch.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Account, SubscriptionMirror, SubscriptionUpdate};

/// Statuses that can count as active (subject to the period-end check).
const ACTIVE_STATUSES: &[&str] = &["active", "trialing"];

/// `active` is derived, never cached: status must be live AND the paid
/// period must not have lapsed.
pub fn compute_active(status: &str, current_period_end: i64, now: i64) -> bool {
    ACTIVE_STATUSES.contains(&status) && current_period_end > now
}

/// Strategy 1: the stored billing-customer id on the account.
fn by_stored_customer_id(
    conn: &Connection,
    update: &SubscriptionUpdate,
) -> Result<Option<Account>> {
    queries::get_account_by_stripe_customer(conn, &update.stripe_customer_id)
}

/// Strategy 2: an account id embedded in the billing object's own
/// metadata. When it hits, the missing stored customer id is backfilled so
/// strategy 1 works next time.
fn by_metadata_account_id(
    conn: &Connection,
    update: &SubscriptionUpdate,
) -> Result<Option<Account>> {
    let Some(account_id) = update.metadata_account_id.as_deref() else {
        return Ok(None);
    };
    let Some(account) = queries::get_account_by_id(conn, account_id)? else {
        tracing::warn!(
            account_id = %account_id,
            "Billing metadata names an unknown account"
        );
        return Ok(None);
    };

    if account.stripe_customer_id.is_none()
        && queries::backfill_account_stripe_customer(conn, &account.id, &update.stripe_customer_id)?
    {
        tracing::info!(
            account_id = %account.id,
            customer_id = %update.stripe_customer_id,
            "Backfilled stored billing customer id from metadata"
        );
    }

    Ok(Some(account))
}

/// Strategy 3: an existing local mirror row keyed by the subscription id.
fn by_existing_mirror(conn: &Connection, update: &SubscriptionUpdate) -> Result<Option<Account>> {
    let Some(mirror) =
        queries::get_subscription_mirror_by_subscription(conn, &update.stripe_subscription_id)?
    else {
        return Ok(None);
    };
    queries::get_account_by_id(conn, &mirror.account_id)
}

/// Strategy 4: the stored billing-subscription id directly on the account.
fn by_stored_subscription_id(
    conn: &Connection,
    update: &SubscriptionUpdate,
) -> Result<Option<Account>> {
    queries::get_account_by_stripe_subscription(conn, &update.stripe_subscription_id)
}

/// Resolve the internal account for a billing identity, first match wins.
pub fn resolve_billing_account(
    conn: &Connection,
    update: &SubscriptionUpdate,
) -> Result<Option<Account>> {
    let strategies: &[(
        &str,
        fn(&Connection, &SubscriptionUpdate) -> Result<Option<Account>>,
    )] = &[
        ("stored_customer_id", by_stored_customer_id),
        ("metadata_account_id", by_metadata_account_id),
        ("existing_mirror", by_existing_mirror),
        ("stored_subscription_id", by_stored_subscription_id),
    ];

    for (name, strategy) in strategies {
        if let Some(account) = strategy(conn, update)? {
            tracing::debug!(
                account_id = %account.id,
                subscription_id = %update.stripe_subscription_id,
                strategy = name,
                "Resolved billing identity"
            );
            return Ok(Some(account));
        }
    }
    Ok(None)
}

/// Reconcile a subscription or invoice event into the mirror table.
///
/// Exactly one mirror row per account; `active` is recomputed every time.
/// The period end is taken from the event when present, preserved from the
/// prior mirror row otherwise, and defaults to `now` (inactive) when
/// neither exists.
pub fn reconcile(conn: &Connection, update: &SubscriptionUpdate) -> Result<SubscriptionMirror> {
    let account = resolve_billing_account(conn, update)?.ok_or_else(|| {
        AppError::NotFound(format!(
            "No account for billing customer {} / subscription {}",
            update.stripe_customer_id, update.stripe_subscription_id
        ))
    })?;

    let now = chrono::Utc::now().timestamp();
    let prior = queries::get_subscription_mirror(conn, &account.id)?;
    let current_period_end = update
        .current_period_end
        .or(prior.map(|p| p.current_period_end))
        .unwrap_or(now);

    let mirror = SubscriptionMirror {
        account_id: account.id.clone(),
        stripe_customer_id: update.stripe_customer_id.clone(),
        stripe_subscription_id: update.stripe_subscription_id.clone(),
        status: update.status.clone(),
        current_period_end,
        active: compute_active(&update.status, current_period_end, now),
        updated_at: now,
    };

    queries::upsert_subscription_mirror(conn, &mirror)?;

    tracing::info!(
        account_id = %mirror.account_id,
        subscription_id = %mirror.stripe_subscription_id,
        status = %mirror.status,
        active = mirror.active,
        "Subscription state reconciled"
    );

    Ok(mirror)
}
