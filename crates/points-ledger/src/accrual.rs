//! Per-block points accrual

use crate::error::Result;
use crate::ledger::BalanceLedger;
use crate::models::{Anomaly, BlockTick, PointsBalanceVersion, PointsChange, TickReport};
use crate::registry::TokenRegistry;
use crate::store::{LedgerStore, VersionWrite};
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Extends each holder's points chain from the previous block's balances
pub struct PointsAccrualEngine<S> {
    ledger: BalanceLedger<S>,
    registry: Arc<TokenRegistry>,
}

impl<S: LedgerStore> PointsAccrualEngine<S> {
    pub fn new(ledger: BalanceLedger<S>, registry: Arc<TokenRegistry>) -> Self {
        Self { ledger, registry }
    }

    /// Accrue points for `tick.block_height` from balances no newer than the
    /// previous block.
    ///
    /// Every new points version of the tick is committed in one store write,
    /// so a failing tick leaves no partial state behind.
    pub async fn tick(&self, tick: BlockTick) -> Result<TickReport> {
        let BlockTick {
            block_height,
            block_time_seconds,
        } = tick;
        let mut report = TickReport {
            block_height,
            block_time_seconds,
            ..Default::default()
        };

        if block_height < 0 {
            let anomaly = Anomaly::InvalidInput {
                reason: format!("tick at negative height {}", block_height),
            };
            warn!("Dropping tick: {}", anomaly);
            report.anomalies.push(anomaly);
            return Ok(report);
        }

        let totals = self.accumulate(block_height, block_time_seconds, &mut report.anomalies).await?;

        let store = self.ledger.store();
        let mut writes = Vec::with_capacity(totals.len());
        for (address, accrued) in totals {
            let previous = store.current_points_balance(&address).await?;

            if let Some(previous) = &previous {
                if previous.block_height >= block_height {
                    let anomaly = Anomaly::StalePointsVersion {
                        address: address.clone(),
                        current_height: previous.block_height,
                        tick_height: block_height,
                    };
                    error!("Skipping accrual: {}", anomaly);
                    report.anomalies.push(anomaly);
                    continue;
                }
            }

            let previous_height = previous.as_ref().map(|p| p.block_height);
            let old_balance = previous.map(|p| p.balance).unwrap_or_default();
            let new_balance = &old_balance + &accrued;

            let version = PointsBalanceVersion {
                address: address.clone(),
                block_height,
                balance: new_balance.clone(),
                is_current: true,
            };
            writes.push(match previous_height {
                Some(closes) => VersionWrite::advance(closes, version),
                None => VersionWrite::open(version),
            });
            report.accruals.push(PointsChange {
                address,
                block_height,
                previous_height,
                old_balance,
                accrued,
                new_balance,
            });
        }

        store.write_points_balances(writes).await?;

        if !report.accruals.is_empty() {
            info!(
                "Accrued points for {} addresses at height {}",
                report.accruals.len(),
                block_height
            );
        }
        Ok(report)
    }

    /// Per-address accrual of one tick. Only nonzero totals are returned.
    async fn accumulate(
        &self,
        block_height: i64,
        block_time_seconds: i64,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<BTreeMap<String, BigUint>> {
        let mut totals: BTreeMap<String, BigUint> = BTreeMap::new();

        for descriptor in self.registry.accruing_at(block_time_seconds) {
            if descriptor.multiplier == 0 {
                continue;
            }

            let rows = self
                .ledger
                .current_balances(&descriptor.denom, self.registry.excluded_addresses())
                .await?;

            for row in rows {
                if row.block_height > block_height - 1 {
                    let anomaly = Anomaly::ConsistencyViolation {
                        address: row.address,
                        denom: row.denom,
                        version_height: row.block_height,
                        tick_height: block_height,
                    };
                    error!("Skipping balance: {}", anomaly);
                    anomalies.push(anomaly);
                    continue;
                }

                // Each (address, denom) holding is floored at zero on its own, so a
                // negative balance in one token never offsets another.
                let held = match row.balance.to_biguint() {
                    Some(held) if !held.is_zero() => held,
                    _ => continue,
                };

                *totals.entry(row.address).or_default() += held * descriptor.multiplier;
            }
        }

        totals.retain(|_, total| !total.is_zero());
        debug!(
            "Tick {} at time {}: {} addresses accrue",
            block_height,
            block_time_seconds,
            totals.len()
        );
        Ok(totals)
    }

    pub async fn current_points(&self, address: &str) -> Result<Option<PointsBalanceVersion>> {
        self.ledger.store().current_points_balance(address).await
    }

    /// Points as of `height`: the latest version at or below it
    pub async fn points_at(&self, address: &str, height: i64) -> Result<Option<PointsBalanceVersion>> {
        self.ledger.store().points_balance_at(address, height).await
    }

    pub async fn points_history(&self, address: &str) -> Result<Vec<PointsBalanceVersion>> {
        self.ledger.store().points_balance_history(address).await
    }
}
