//! In-memory ledger store

use super::{LedgerStore, VersionWrite};
use crate::error::{LedgerError, Result};
use crate::models::{MovementRecord, PointsBalanceVersion, TokenBalanceVersion, Versioned};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

/// Append-only version log of one key with an index to its open entry
#[derive(Debug, Clone)]
struct VersionLog<V> {
    versions: Vec<V>,
    current: Option<usize>,
}

impl<V> Default for VersionLog<V> {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
            current: None,
        }
    }
}

impl<V: Versioned> VersionLog<V> {
    fn current(&self) -> Option<&V> {
        self.current.map(|i| &self.versions[i])
    }

    fn at_or_below(&self, height: i64) -> Option<&V> {
        self.versions.iter().rev().find(|v| v.height() <= height)
    }

    fn check(&self, write: &VersionWrite<V>) -> Result<()> {
        write.check(self.current().map(|v| v.height()))
    }

    /// Callers run `check` first.
    fn apply(&mut self, write: VersionWrite<V>) {
        match (write.closes, self.current) {
            (Some(_), Some(index)) => {
                self.versions[index].close();
                self.versions.push(write.version);
                self.current = Some(self.versions.len() - 1);
            }
            (None, Some(index)) => {
                self.versions[index] = write.version;
            }
            _ => {
                self.versions.push(write.version);
                self.current = Some(self.versions.len() - 1);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    // denom -> address -> chain
    balances: BTreeMap<String, BTreeMap<String, VersionLog<TokenBalanceVersion>>>,
    points: BTreeMap<String, VersionLog<PointsBalanceVersion>>,
    movements: Vec<MovementRecord>,
    movement_ids: HashSet<String>,
    last_processed_height: Option<i64>,
}

impl MemoryState {
    fn balance_log(&self, address: &str, denom: &str) -> Option<&VersionLog<TokenBalanceVersion>> {
        self.balances.get(denom).and_then(|by_address| by_address.get(address))
    }
}

/// Ledger store kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn current_token_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<TokenBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state
            .balance_log(address, denom)
            .and_then(|log| log.current())
            .cloned())
    }

    async fn current_token_balances(&self, denom: &str) -> Result<Vec<TokenBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state
            .balances
            .get(denom)
            .map(|by_address| {
                by_address
                    .values()
                    .filter_map(|log| log.current().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn token_balance_history(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Vec<TokenBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state
            .balance_log(address, denom)
            .map(|log| log.versions.clone())
            .unwrap_or_default())
    }

    async fn write_token_balance(&self, write: VersionWrite<TokenBalanceVersion>) -> Result<()> {
        let mut state = self.state.write().await;
        let open_height = state
            .balance_log(&write.version.address, &write.version.denom)
            .and_then(|log| log.current())
            .map(|v| v.block_height);
        write.check(open_height)?;

        state
            .balances
            .entry(write.version.denom.clone())
            .or_default()
            .entry(write.version.address.clone())
            .or_default()
            .apply(write);
        Ok(())
    }

    async fn current_points_balance(&self, address: &str) -> Result<Option<PointsBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state.points.get(address).and_then(|log| log.current()).cloned())
    }

    async fn points_balance_at(
        &self,
        address: &str,
        height: i64,
    ) -> Result<Option<PointsBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state
            .points
            .get(address)
            .and_then(|log| log.at_or_below(height))
            .cloned())
    }

    async fn points_balance_history(&self, address: &str) -> Result<Vec<PointsBalanceVersion>> {
        let state = self.state.read().await;
        Ok(state
            .points
            .get(address)
            .map(|log| log.versions.clone())
            .unwrap_or_default())
    }

    async fn write_points_balances(
        &self,
        writes: Vec<VersionWrite<PointsBalanceVersion>>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        // Validate the whole batch before touching anything.
        let mut seen = HashSet::with_capacity(writes.len());
        let empty = VersionLog::default();
        for write in &writes {
            let address = write.version.address.as_str();
            if !seen.insert(address) {
                return Err(LedgerError::Store(format!(
                    "address {} written twice in one batch",
                    address
                )));
            }
            state.points.get(address).unwrap_or(&empty).check(write)?;
        }

        for write in writes {
            state
                .points
                .entry(write.version.address.clone())
                .or_default()
                .apply(write);
        }
        Ok(())
    }

    async fn record_movement(&self, record: MovementRecord) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.movement_ids.insert(record.movement.id.clone()) {
            return Ok(false);
        }
        state.movements.push(record);
        Ok(true)
    }

    async fn movements_by_address(&self, address: &str) -> Result<Vec<MovementRecord>> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .filter(|record| record.movement.involves(address))
            .cloned()
            .collect())
    }

    async fn movements_by_denom(&self, denom: &str) -> Result<Vec<MovementRecord>> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .filter(|record| record.movement.denom == denom)
            .cloned()
            .collect())
    }

    async fn last_processed_height(&self) -> Result<Option<i64>> {
        Ok(self.state.read().await.last_processed_height)
    }

    async fn record_processed_height(&self, height: i64) -> Result<()> {
        self.state.write().await.last_processed_height = Some(height);
        Ok(())
    }
}
