//! Schema versioning via `PRAGMA user_version`.
//!
//! Migrations are embedded in the binary and run automatically on startup,
//! each in its own transaction. The version also gates runtime behavior:
//! purchase completion checks for the version-2 schema and falls back to
//! the legacy per-exclusivity operations when a database predates it.

use rusqlite::Connection;
use thiserror::Error;

/// Schema version the current binary targets.
pub const SCHEMA_VERSION: i32 = 2;

/// Version that introduced the entitlements table and the unified
/// purchase-completion operation.
pub const UNIFIED_COMPLETION_VERSION: i32 = 2;

/// A database migration.
pub struct Migration {
    /// Sequential version number, starting from 1.
    pub version: i32,
    pub description: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// All migrations in order. Add new migrations to the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "v0.3.0 baseline",
        up: migration_001_baseline,
    },
    Migration {
        version: 2,
        description: "v0.4.0 entitlements table + unified purchase completion",
        up: migration_002_entitlements,
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: i32, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Get the current schema version from the database.
pub fn get_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Set the schema version in the database.
pub fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Run pending migrations, each in its own transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<(), MigrationError> {
    let current_version = get_version(conn)?;

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        tracing::debug!("Database at version {} (up to date)", current_version);
        return Ok(());
    }

    tracing::info!(
        "Database at version {}, {} migration(s) pending",
        current_version,
        pending.len()
    );

    for migration in pending {
        tracing::info!(
            "Running migration {}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        match (migration.up)(&tx) {
            Ok(()) => {
                set_version(&tx, migration.version)?;
                tx.commit()?;
                tracing::info!("Migration {} completed", migration.version);
            }
            Err(e) => {
                // Transaction rolls back on drop
                tracing::error!(
                    "Migration {} failed: {}. Database unchanged.",
                    migration.version,
                    e
                );
                return Err(MigrationError::MigrationFailed {
                    version: migration.version,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Migration 1: baseline. For existing databases this is a no-op since
/// tables already exist; fresh databases get the full schema from
/// `init_db`, which runs after migrations.
fn migration_001_baseline(conn: &Connection) -> rusqlite::Result<()> {
    let tables_exist: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='accounts'",
        [],
        |row| row.get(0),
    )?;

    if tables_exist {
        tracing::debug!("Existing database detected, baseline migration is no-op");
    } else {
        tracing::debug!("Fresh database, schema will be created by init_db");
    }
    Ok(())
}

/// Migration 2: the entitlements table. Version-1 databases recorded the
/// access grant implicitly in the completed purchase row; version 2 splits
/// it out so entitlements can carry their own lifecycle.
fn migration_002_entitlements(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL UNIQUE REFERENCES purchases(id) ON DELETE CASCADE,
            buyer_id TEXT NOT NULL REFERENCES accounts(id),
            track_id TEXT NOT NULL REFERENCES tracks(id),
            license_id TEXT NOT NULL REFERENCES licenses(id),
            granted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entitlements_buyer ON entitlements(buyer_id);
        "#,
    )
}
