//! Block-by-block driver for the two ledgers

use crate::accrual::PointsAccrualEngine;
use crate::error::{LedgerError, Result};
use crate::events::{EventEmitter, EventSubscriber};
use crate::ledger::BalanceLedger;
use crate::models::*;
use crate::registry::TokenRegistry;
use crate::store::LedgerStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Feeds blocks into the balance ledger and the accrual engine in height order
pub struct PointsIndexer<S> {
    ledger: BalanceLedger<S>,
    engine: PointsAccrualEngine<S>,
    registry: Arc<TokenRegistry>,
    event_emitter: EventEmitter,
    state: Arc<RwLock<IndexerState>>,
    start_block: i64,
}

#[derive(Default)]
struct IndexerState {
    last_processed_height: Option<i64>,
}

impl<S: LedgerStore> PointsIndexer<S> {
    /// Create an indexer over `store`, resuming after its last processed block
    pub async fn new(store: Arc<S>, registry: Arc<TokenRegistry>) -> Result<Self> {
        let ledger = BalanceLedger::new(store, Arc::clone(&registry));
        let engine = PointsAccrualEngine::new(ledger.clone(), Arc::clone(&registry));

        let indexer = Self {
            ledger,
            engine,
            registry,
            event_emitter: EventEmitter::default(),
            state: Arc::new(RwLock::new(IndexerState::default())),
            start_block: 0,
        };

        indexer.load_state().await?;

        Ok(indexer)
    }

    /// Blocks below `start_block` are acknowledged but not processed
    pub fn with_start_block(mut self, start_block: i64) -> Self {
        self.start_block = start_block;
        self
    }

    async fn load_state(&self) -> Result<()> {
        let last = self.ledger.store().last_processed_height().await?;
        if let Some(height) = last {
            info!("Resuming after block {}", height);
        }

        let mut state = self.state.write().await;
        state.last_processed_height = last;

        Ok(())
    }

    pub fn ledger(&self) -> &BalanceLedger<S> {
        &self.ledger
    }

    pub fn engine(&self) -> &PointsAccrualEngine<S> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    pub fn event_emitter(&self) -> &EventEmitter {
        &self.event_emitter
    }

    pub fn subscribe_events(&self) -> EventSubscriber {
        EventSubscriber::new(&self.event_emitter)
    }

    /// Process one block: accrue points from the previous block's balances,
    /// then apply this block's deltas.
    ///
    /// Blocks must arrive in strictly increasing height order.
    pub async fn process_block(&self, block: BlockInput) -> Result<BlockReport> {
        // Held for the whole block so there is a single writer.
        let mut state = self.state.write().await;

        if let Some(last) = state.last_processed_height {
            if block.height <= last {
                return Err(LedgerError::BlockOutOfOrder {
                    last,
                    received: block.height,
                });
            }
        }

        if block.height < self.start_block {
            debug!(
                "Skipping block {} below start block {}",
                block.height, self.start_block
            );
            return Ok(BlockReport {
                height: block.height,
                skipped: true,
                ..Default::default()
            });
        }

        debug!(
            "Processing block {} with {} deltas",
            block.height,
            block.deltas.len()
        );

        let tick = self.engine.tick(block.tick()).await?;
        let mut report = BlockReport {
            height: block.height,
            skipped: false,
            accruals: tick.accruals,
            balance_changes: Vec::with_capacity(block.deltas.len()),
            movements: Vec::with_capacity(block.movements.len()),
            anomalies: tick.anomalies,
        };

        for delta in &block.deltas {
            if delta.block_height != block.height {
                let anomaly = Anomaly::InvalidInput {
                    reason: format!(
                        "delta for {}/{} at height {} delivered with block {}",
                        delta.address, delta.denom, delta.block_height, block.height
                    ),
                };
                warn!("Dropping delta: {}", anomaly);
                report.anomalies.push(anomaly);
                continue;
            }

            let (change, anomalies) = self.ledger.apply_delta(delta).await?.into_parts();
            report.balance_changes.extend(change);
            report.anomalies.extend(anomalies);
        }

        for movement in block.movements {
            if movement.block_height != block.height {
                let anomaly = Anomaly::InvalidInput {
                    reason: format!(
                        "movement {} at height {} delivered with block {}",
                        movement.id, movement.block_height, block.height
                    ),
                };
                warn!("Dropping movement: {}", anomaly);
                report.anomalies.push(anomaly);
                continue;
            }

            let id = movement.id.clone();
            let record = MovementRecord {
                movement,
                timestamp: block.timestamp,
            };
            if self.ledger.store().record_movement(record.clone()).await? {
                report.movements.push(record);
            } else {
                let anomaly = Anomaly::InvalidInput {
                    reason: format!("movement id {} already recorded", id),
                };
                warn!("Dropping movement: {}", anomaly);
                report.anomalies.push(anomaly);
            }
        }

        self.ledger.store().record_processed_height(block.height).await?;
        state.last_processed_height = Some(block.height);
        drop(state);

        info!(
            "Indexed block {}: {} balance changes, {} accruals, {} anomalies",
            report.height,
            report.balance_changes.len(),
            report.accruals.len(),
            report.anomalies.len()
        );

        for change in &report.balance_changes {
            self.event_emitter.emit_balance_updated(change.clone());
        }
        for change in &report.accruals {
            self.event_emitter.emit_points_accrued(change.clone());
        }
        for record in &report.movements {
            self.event_emitter.emit_movement_recorded(record.clone());
        }
        for anomaly in &report.anomalies {
            self.event_emitter.emit_anomaly(anomaly.clone());
        }
        self.event_emitter.emit_block_processed(report.height);

        Ok(report)
    }

    pub async fn get_token_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<TokenBalanceVersion>> {
        self.ledger.current_balance(address, denom).await
    }

    pub async fn get_points_balance(&self, address: &str) -> Result<Option<PointsBalanceVersion>> {
        self.engine.current_points(address).await
    }

    pub async fn get_points_balance_at(
        &self,
        address: &str,
        height: i64,
    ) -> Result<Option<PointsBalanceVersion>> {
        self.engine.points_at(address, height).await
    }

    /// Report deltas that reached the indexer outside of any block.
    ///
    /// Nothing is applied. A delta at or below the last processed height can
    /// no longer be applied without breaking the points chain; any other
    /// arrived ahead of its block header.
    pub async fn report_orphaned_deltas(&self, deltas: &[BalanceDelta]) -> Vec<Anomaly> {
        let last = self.state.read().await.last_processed_height;

        let anomalies: Vec<Anomaly> = deltas
            .iter()
            .map(|delta| {
                let reason = match last {
                    Some(last) if delta.block_height <= last => format!(
                        "delta for {}/{} at height {} arrived after block {} was indexed",
                        delta.address, delta.denom, delta.block_height, last
                    ),
                    _ => format!(
                        "delta for {}/{} at height {} arrived without its block header",
                        delta.address, delta.denom, delta.block_height
                    ),
                };
                Anomaly::InvalidInput { reason }
            })
            .collect();

        for anomaly in &anomalies {
            warn!("Dropping delta: {}", anomaly);
            self.event_emitter.emit_anomaly(anomaly.clone());
        }
        anomalies
    }

    pub async fn get_movements_by_address(&self, address: &str) -> Result<Vec<MovementRecord>> {
        self.ledger.store().movements_by_address(address).await
    }

    pub async fn get_movements_by_denom(&self, denom: &str) -> Result<Vec<MovementRecord>> {
        self.ledger.store().movements_by_denom(denom).await
    }

    /// Get the last processed block height
    pub async fn get_last_processed_height(&self) -> Option<i64> {
        self.state.read().await.last_processed_height
    }
}
