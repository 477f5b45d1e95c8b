//! Database migrations for the ledger tables

use crate::error::{LedgerError, Result};
use sqlx::SqlitePool;

/// SQLite schema. Balances are decimal TEXT so they keep arbitrary precision.
pub const SQLITE_MIGRATION: &str = r#"
-- Token balance versions, one chain per (address, denom)
CREATE TABLE IF NOT EXISTS token_balances (
    address TEXT NOT NULL,
    denom TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    balance TEXT NOT NULL,
    is_current BOOLEAN NOT NULL DEFAULT 1,
    PRIMARY KEY (address, denom, block_height)
);

-- At most one open version per chain
CREATE UNIQUE INDEX IF NOT EXISTS idx_token_balances_current
    ON token_balances(address, denom) WHERE is_current = 1;

CREATE INDEX IF NOT EXISTS idx_token_balances_denom_current
    ON token_balances(denom, is_current);

-- Points versions, one chain per address
CREATE TABLE IF NOT EXISTS points_balances (
    address TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    balance TEXT NOT NULL,
    is_current BOOLEAN NOT NULL DEFAULT 1,
    PRIMARY KEY (address, block_height)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_points_balances_current
    ON points_balances(address) WHERE is_current = 1;

-- Audit trail of tracked transfers, mints and burns
CREATE TABLE IF NOT EXISTS movements (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    block_time TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    denom TEXT NOT NULL,
    amount TEXT NOT NULL,
    sender TEXT,
    recipient TEXT
);

CREATE INDEX IF NOT EXISTS idx_movements_sender ON movements(sender);
CREATE INDEX IF NOT EXISTS idx_movements_recipient ON movements(recipient);
CREATE INDEX IF NOT EXISTS idx_movements_denom ON movements(denom);

-- Single-row progress marker
CREATE TABLE IF NOT EXISTS indexer_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_processed_height INTEGER NOT NULL
)
"#;

/// Run the schema statements one by one
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SQLITE_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| LedgerError::Migration(format!("Failed to run migrations: {}", e)))?;
    }

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
