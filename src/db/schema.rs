use rusqlite::Connection;

/// Initialize the database schema.
///
/// Idempotent (`CREATE ... IF NOT EXISTS`); runs after migrations so the
/// schema version reflects what a fresh database actually contains.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Accounts (buyers and producers)
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            stripe_customer_id TEXT,
            stripe_subscription_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_accounts_stripe_customer ON accounts(stripe_customer_id);
        CREATE INDEX IF NOT EXISTS idx_accounts_stripe_subscription ON accounts(stripe_subscription_id);

        -- Tracks (products; exclusive tracks sell exactly once)
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            producer_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            exclusive INTEGER NOT NULL DEFAULT 0,
            sold INTEGER NOT NULL DEFAULT 0,
            price_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tracks_producer ON tracks(producer_id);

        -- License catalog (immutable reference data)
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            price_cents INTEGER NOT NULL,
            exclusive_allowed INTEGER NOT NULL DEFAULT 0,
            max_streams INTEGER,
            max_copies INTEGER,
            created_at INTEGER NOT NULL
        );

        -- Payment event ledger (dedup + processing lease per inbound event)
        -- id is the external event id. processed=1 implies
        -- processing_started_at IS NULL.
        CREATE TABLE IF NOT EXISTS payment_events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            processing_started_at INTEGER,
            error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_events_unprocessed
            ON payment_events(created_at) WHERE processed = 0;

        -- Purchases (one per successful checkout session)
        -- contract_email_sent_at doubles as the email send lease; see email_lease.
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            buyer_id TEXT NOT NULL REFERENCES accounts(id),
            track_id TEXT NOT NULL REFERENCES tracks(id),
            producer_id TEXT NOT NULL REFERENCES accounts(id),
            checkout_session_id TEXT NOT NULL UNIQUE,
            payment_intent_id TEXT,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            amount_cents INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('completed')),
            contract_path TEXT,
            contract_email_sent_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_buyer ON purchases(buyer_id);
        CREATE INDEX IF NOT EXISTS idx_purchases_track ON purchases(track_id);

        -- Entitlements (access right granted by a completed purchase)
        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL UNIQUE REFERENCES purchases(id) ON DELETE CASCADE,
            buyer_id TEXT NOT NULL REFERENCES accounts(id),
            track_id TEXT NOT NULL REFERENCES tracks(id),
            license_id TEXT NOT NULL REFERENCES licenses(id),
            granted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entitlements_buyer ON entitlements(buyer_id);

        -- Track locks (single-winner reservation during exclusive checkout)
        CREATE TABLE IF NOT EXISTS track_locks (
            track_id TEXT PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            checkout_session_id TEXT,
            created_at INTEGER NOT NULL
        );

        -- Subscription mirrors (one row per account, active always recomputed)
        CREATE TABLE IF NOT EXISTS subscription_mirrors (
            account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
            stripe_customer_id TEXT NOT NULL,
            stripe_subscription_id TEXT NOT NULL,
            status TEXT NOT NULL,
            current_period_end INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscription_mirrors_subscription
            ON subscription_mirrors(stripe_subscription_id);
        "#,
    )?;
    Ok(())
}
