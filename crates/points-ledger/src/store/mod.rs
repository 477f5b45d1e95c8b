//! Storage backends for the two version chains

use crate::error::{LedgerError, Result};
use crate::models::{MovementRecord, PointsBalanceVersion, TokenBalanceVersion, Versioned};
use async_trait::async_trait;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One step of a version chain.
///
/// `version` is the row that must be open afterwards. When `closes` is set the
/// current version at that height is closed first; otherwise `version` either
/// creates the chain or replaces the open row at the same height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionWrite<V> {
    pub closes: Option<i64>,
    pub version: V,
}

impl<V> VersionWrite<V> {
    pub fn open(version: V) -> Self {
        Self {
            closes: None,
            version,
        }
    }

    pub fn advance(closes: i64, version: V) -> Self {
        Self {
            closes: Some(closes),
            version,
        }
    }
}

impl<V: Versioned> VersionWrite<V> {
    /// Check this write against the height of the key's open version.
    pub fn check(&self, open_height: Option<i64>) -> Result<()> {
        if !self.version.is_current() {
            return Err(LedgerError::Store(
                "written version must be the open one".to_string(),
            ));
        }
        let next = self.version.height();

        match (self.closes, open_height) {
            (Some(closes), Some(open)) if open != closes => Err(LedgerError::Store(format!(
                "asked to close height {} but open version is at {}",
                closes, open
            ))),
            (Some(closes), Some(_)) if next <= closes => Err(LedgerError::Store(format!(
                "next version at {} does not follow closed version at {}",
                next, closes
            ))),
            (Some(closes), None) => Err(LedgerError::Store(format!(
                "no open version at height {} to close",
                closes
            ))),
            (None, Some(open)) if open != next => Err(LedgerError::Store(format!(
                "open version at {} cannot be replaced by one at {}",
                open, next
            ))),
            _ => Ok(()),
        }
    }
}

/// Keyed get/range access to the ledgers.
///
/// Each write method is atomic: either every row it touches is written or none is.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open balance version for a key
    async fn current_token_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<TokenBalanceVersion>>;

    /// Every open balance version of a denom
    async fn current_token_balances(&self, denom: &str) -> Result<Vec<TokenBalanceVersion>>;

    /// All versions of a key, oldest first
    async fn token_balance_history(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Vec<TokenBalanceVersion>>;

    async fn write_token_balance(&self, write: VersionWrite<TokenBalanceVersion>) -> Result<()>;

    async fn current_points_balance(&self, address: &str) -> Result<Option<PointsBalanceVersion>>;

    /// Latest points version at or below `height`
    async fn points_balance_at(
        &self,
        address: &str,
        height: i64,
    ) -> Result<Option<PointsBalanceVersion>>;

    /// All points versions of an address, oldest first
    async fn points_balance_history(&self, address: &str) -> Result<Vec<PointsBalanceVersion>>;

    async fn write_points_balances(
        &self,
        writes: Vec<VersionWrite<PointsBalanceVersion>>,
    ) -> Result<()>;

    /// Store a movement record; `false` when its id is already taken
    async fn record_movement(&self, record: MovementRecord) -> Result<bool>;

    /// Movements sent or received by an address, in the order they were recorded
    async fn movements_by_address(&self, address: &str) -> Result<Vec<MovementRecord>>;

    /// Movements of one denom, in the order they were recorded
    async fn movements_by_denom(&self, denom: &str) -> Result<Vec<MovementRecord>>;

    async fn last_processed_height(&self) -> Result<Option<i64>>;

    async fn record_processed_height(&self, height: i64) -> Result<()>;
}
