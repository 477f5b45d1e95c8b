//! SQLite ledger store

use super::{LedgerStore, VersionWrite};
use crate::config::DatabaseConfig;
use crate::error::{LedgerError, Result};
use crate::migrations::run_migrations;
use crate::models::{
    Movement, MovementKind, MovementRecord, PointsBalanceVersion, TokenBalanceVersion,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::{BigInt, BigUint};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;

type TokenBalanceRow = (String, String, i64, String, bool);
type PointsBalanceRow = (String, i64, String, bool);
type MovementRow = (
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

const TOKEN_BALANCE_COLUMNS: &str = "address, denom, block_height, balance, is_current";
const POINTS_BALANCE_COLUMNS: &str = "address, block_height, balance, is_current";
const MOVEMENT_COLUMNS: &str =
    "id, kind, block_height, block_time, tx_hash, denom, amount, sender, recipient";

fn token_balance_from_row(row: TokenBalanceRow) -> Result<TokenBalanceVersion> {
    let (address, denom, block_height, balance, is_current) = row;
    let balance = balance.parse::<BigInt>().map_err(|e| {
        LedgerError::CorruptRow(format!(
            "token balance {}/{} at {}: {}",
            address, denom, block_height, e
        ))
    })?;
    Ok(TokenBalanceVersion {
        address,
        denom,
        block_height,
        balance,
        is_current,
    })
}

fn points_balance_from_row(row: PointsBalanceRow) -> Result<PointsBalanceVersion> {
    let (address, block_height, balance, is_current) = row;
    let balance = balance.parse::<BigUint>().map_err(|e| {
        LedgerError::CorruptRow(format!(
            "points balance {} at {}: {}",
            address, block_height, e
        ))
    })?;
    Ok(PointsBalanceVersion {
        address,
        block_height,
        balance,
        is_current,
    })
}

fn movement_from_row(row: MovementRow) -> Result<MovementRecord> {
    let (id, kind, block_height, block_time, tx_hash, denom, amount, sender, recipient) = row;
    let corrupt = |what: String| LedgerError::CorruptRow(format!("movement {}: {}", id, what));

    let kind = MovementKind::parse(&kind).ok_or_else(|| corrupt(format!("unknown kind {}", kind)))?;
    let timestamp = DateTime::parse_from_rfc3339(&block_time)
        .map_err(|e| corrupt(e.to_string()))?
        .with_timezone(&Utc);
    let amount = amount.parse().map_err(|e| corrupt(format!("{}", e)))?;

    Ok(MovementRecord {
        movement: Movement {
            id,
            kind,
            block_height,
            tx_hash,
            denom,
            amount,
            sender,
            recipient,
        },
        timestamp,
    })
}

/// Ledger store backed by a SQLite connection pool
pub struct SqliteStore {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl SqliteStore {
    /// Open the pool and bring the schema up to date
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let url = config.connection_url()?;

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(if config.is_in_memory() {
                None
            } else {
                Some(Duration::from_secs(config.idle_timeout_seconds))
            })
            .max_lifetime(if config.is_in_memory() {
                None
            } else {
                Some(Duration::from_secs(30 * 60))
            })
            .connect(&url)
            .await?;

        run_migrations(&pool).await?;
        tracing::info!("Opened ledger database at {}", url);

        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn open_token_balance_height(
        conn: &mut SqliteConnection,
        address: &str,
        denom: &str,
    ) -> Result<Option<i64>> {
        let height: Option<(i64,)> = sqlx::query_as(
            "SELECT block_height FROM token_balances WHERE address = ? AND denom = ? AND is_current = 1",
        )
        .bind(address)
        .bind(denom)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(height.map(|(h,)| h))
    }

    async fn open_points_height(conn: &mut SqliteConnection, address: &str) -> Result<Option<i64>> {
        let height: Option<(i64,)> = sqlx::query_as(
            "SELECT block_height FROM points_balances WHERE address = ? AND is_current = 1",
        )
        .bind(address)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(height.map(|(h,)| h))
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn current_token_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<TokenBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM token_balances WHERE address = ? AND denom = ? AND is_current = 1",
            TOKEN_BALANCE_COLUMNS
        );
        let row: Option<TokenBalanceRow> = sqlx::query_as(&query)
            .bind(address)
            .bind(denom)
            .fetch_optional(&self.pool)
            .await?;
        row.map(token_balance_from_row).transpose()
    }

    async fn current_token_balances(&self, denom: &str) -> Result<Vec<TokenBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM token_balances WHERE denom = ? AND is_current = 1 ORDER BY address",
            TOKEN_BALANCE_COLUMNS
        );
        let rows: Vec<TokenBalanceRow> = sqlx::query_as(&query)
            .bind(denom)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(token_balance_from_row).collect()
    }

    async fn token_balance_history(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Vec<TokenBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM token_balances WHERE address = ? AND denom = ? ORDER BY block_height",
            TOKEN_BALANCE_COLUMNS
        );
        let rows: Vec<TokenBalanceRow> = sqlx::query_as(&query)
            .bind(address)
            .bind(denom)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(token_balance_from_row).collect()
    }

    async fn write_token_balance(&self, write: VersionWrite<TokenBalanceVersion>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let version = &write.version;

        let open = Self::open_token_balance_height(&mut *tx, &version.address, &version.denom).await?;
        write.check(open)?;

        match (write.closes, open) {
            (Some(closes), _) => {
                sqlx::query(
                    "UPDATE token_balances SET is_current = 0 WHERE address = ? AND denom = ? AND block_height = ?",
                )
                .bind(version.address.as_str())
                .bind(version.denom.as_str())
                .bind(closes)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO token_balances (address, denom, block_height, balance, is_current) VALUES (?, ?, ?, ?, 1)",
                )
                .bind(version.address.as_str())
                .bind(version.denom.as_str())
                .bind(version.block_height)
                .bind(version.balance.to_string())
                .execute(&mut *tx)
                .await?;
            }
            (None, Some(_)) => {
                sqlx::query(
                    "UPDATE token_balances SET balance = ? WHERE address = ? AND denom = ? AND block_height = ? AND is_current = 1",
                )
                .bind(version.balance.to_string())
                .bind(version.address.as_str())
                .bind(version.denom.as_str())
                .bind(version.block_height)
                .execute(&mut *tx)
                .await?;
            }
            (None, None) => {
                sqlx::query(
                    "INSERT INTO token_balances (address, denom, block_height, balance, is_current) VALUES (?, ?, ?, ?, 1)",
                )
                .bind(version.address.as_str())
                .bind(version.denom.as_str())
                .bind(version.block_height)
                .bind(version.balance.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn current_points_balance(&self, address: &str) -> Result<Option<PointsBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM points_balances WHERE address = ? AND is_current = 1",
            POINTS_BALANCE_COLUMNS
        );
        let row: Option<PointsBalanceRow> = sqlx::query_as(&query)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        row.map(points_balance_from_row).transpose()
    }

    async fn points_balance_at(
        &self,
        address: &str,
        height: i64,
    ) -> Result<Option<PointsBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM points_balances WHERE address = ? AND block_height <= ? ORDER BY block_height DESC LIMIT 1",
            POINTS_BALANCE_COLUMNS
        );
        let row: Option<PointsBalanceRow> = sqlx::query_as(&query)
            .bind(address)
            .bind(height)
            .fetch_optional(&self.pool)
            .await?;
        row.map(points_balance_from_row).transpose()
    }

    async fn points_balance_history(&self, address: &str) -> Result<Vec<PointsBalanceVersion>> {
        let query = format!(
            "SELECT {} FROM points_balances WHERE address = ? ORDER BY block_height",
            POINTS_BALANCE_COLUMNS
        );
        let rows: Vec<PointsBalanceRow> = sqlx::query_as(&query)
            .bind(address)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(points_balance_from_row).collect()
    }

    async fn write_points_balances(
        &self,
        writes: Vec<VersionWrite<PointsBalanceVersion>>,
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        // Dropping the transaction on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        for write in &writes {
            let version = &write.version;
            let open = Self::open_points_height(&mut *tx, &version.address).await?;
            write.check(open)?;

            if let Some(closes) = write.closes {
                sqlx::query(
                    "UPDATE points_balances SET is_current = 0 WHERE address = ? AND block_height = ?",
                )
                .bind(version.address.as_str())
                .bind(closes)
                .execute(&mut *tx)
                .await?;
            } else if open.is_some() {
                sqlx::query(
                    "UPDATE points_balances SET balance = ? WHERE address = ? AND block_height = ? AND is_current = 1",
                )
                .bind(version.balance.to_string())
                .bind(version.address.as_str())
                .bind(version.block_height)
                .execute(&mut *tx)
                .await?;
                continue;
            }

            sqlx::query(
                "INSERT INTO points_balances (address, block_height, balance, is_current) VALUES (?, ?, ?, 1)",
            )
            .bind(version.address.as_str())
            .bind(version.block_height)
            .bind(version.balance.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_movement(&self, record: MovementRecord) -> Result<bool> {
        let MovementRecord { movement, timestamp } = record;
        let result = sqlx::query(
            "INSERT INTO movements \
             (id, kind, block_height, block_time, tx_hash, denom, amount, sender, recipient) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(movement.id.as_str())
        .bind(movement.kind.as_str())
        .bind(movement.block_height)
        .bind(timestamp.to_rfc3339())
        .bind(movement.tx_hash.as_str())
        .bind(movement.denom.as_str())
        .bind(movement.amount.to_string())
        .bind(movement.sender.as_deref())
        .bind(movement.recipient.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn movements_by_address(&self, address: &str) -> Result<Vec<MovementRecord>> {
        let query = format!(
            "SELECT {} FROM movements WHERE sender = ? OR recipient = ? ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let rows: Vec<MovementRow> = sqlx::query_as(&query)
            .bind(address)
            .bind(address)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(movement_from_row).collect()
    }

    async fn movements_by_denom(&self, denom: &str) -> Result<Vec<MovementRecord>> {
        let query = format!(
            "SELECT {} FROM movements WHERE denom = ? ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let rows: Vec<MovementRow> = sqlx::query_as(&query)
            .bind(denom)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(movement_from_row).collect()
    }

    async fn last_processed_height(&self) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_processed_height FROM indexer_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(h,)| h))
    }

    async fn record_processed_height(&self, height: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexer_state (id, last_processed_height) VALUES (1, ?) \
             ON CONFLICT(id) DO UPDATE SET last_processed_height = excluded.last_processed_height",
        )
        .bind(height)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn create_test_store() -> SqliteStore {
        SqliteStore::connect(DatabaseConfig::in_memory()).await.unwrap()
    }

    fn balance(height: i64, amount: i64) -> TokenBalanceVersion {
        TokenBalanceVersion {
            address: "alice".to_string(),
            denom: "A".to_string(),
            block_height: height,
            balance: BigInt::from(amount),
            is_current: true,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = create_test_store().await;
        store.health_check().await.unwrap();
        assert!(store.last_processed_height().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_balance_chain() {
        let store = create_test_store().await;
        store.write_token_balance(VersionWrite::open(balance(10, 5))).await.unwrap();
        store.write_token_balance(VersionWrite::open(balance(10, 8))).await.unwrap();
        store.write_token_balance(VersionWrite::advance(10, balance(14, -2))).await.unwrap();

        let history = store.token_balance_history("alice", "A").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].balance, BigInt::from(8));
        assert!(!history[0].is_current);
        assert_eq!(history[1], balance(14, -2));

        let current = store.current_token_balances("A").await.unwrap();
        assert_eq!(current, vec![balance(14, -2)]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_chain_untouched() {
        let store = create_test_store().await;
        store.write_token_balance(VersionWrite::open(balance(10, 5))).await.unwrap();

        assert!(store.write_token_balance(VersionWrite::open(balance(11, 1))).await.is_err());
        assert!(store.write_token_balance(VersionWrite::advance(9, balance(11, 1))).await.is_err());

        let history = store.token_balance_history("alice", "A").await.unwrap();
        assert_eq!(history, vec![balance(10, 5)]);
    }

    #[tokio::test]
    async fn test_large_balances_survive_storage() {
        let store = create_test_store().await;
        let huge: BigInt = "123456789012345678901234567890".parse().unwrap();
        let mut version = balance(1, 0);
        version.balance = huge.clone();
        store.write_token_balance(VersionWrite::open(version)).await.unwrap();

        let current = store.current_token_balance("alice", "A").await.unwrap().unwrap();
        assert_eq!(current.balance, huge);
    }

    #[tokio::test]
    async fn test_processed_height_round_trip() {
        let store = create_test_store().await;
        store.record_processed_height(41).await.unwrap();
        store.record_processed_height(42).await.unwrap();
        assert_eq!(store.last_processed_height().await.unwrap(), Some(42));
    }

    fn transfer(id: &str, sender: &str, recipient: &str) -> MovementRecord {
        MovementRecord {
            movement: Movement {
                id: id.to_string(),
                kind: MovementKind::Transfer,
                block_height: 7,
                tx_hash: "C0FFEE".to_string(),
                denom: "A".to_string(),
                amount: "98765432109876543210".parse().unwrap(),
                sender: Some(sender.to_string()),
                recipient: Some(recipient.to_string()),
            },
            timestamp: Utc.timestamp_opt(1_725_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_movements_by_address_and_denom() {
        let store = create_test_store().await;
        assert!(store.record_movement(transfer("C0FFEE-0-0", "alice", "bob")).await.unwrap());
        assert!(store.record_movement(transfer("C0FFEE-1-0", "bob", "carol")).await.unwrap());
        assert!(!store.record_movement(transfer("C0FFEE-1-0", "dave", "erin")).await.unwrap());

        let bob = store.movements_by_address("bob").await.unwrap();
        let ids: Vec<&str> = bob.iter().map(|r| r.movement.id.as_str()).collect();
        assert_eq!(ids, vec!["C0FFEE-0-0", "C0FFEE-1-0"]);
        assert_eq!(bob[0], transfer("C0FFEE-0-0", "alice", "bob"));

        assert!(store.movements_by_address("dave").await.unwrap().is_empty());
        assert_eq!(store.movements_by_denom("A").await.unwrap().len(), 2);
        assert!(store.movements_by_denom("B").await.unwrap().is_empty());
    }
}
