//! Version-chained token balance ledger

use crate::error::Result;
use crate::models::{
    Anomaly, ApplyOutcome, BalanceChange, BalanceDelta, TokenBalanceVersion, VersionTransition,
};
use crate::registry::TokenRegistry;
use crate::store::{LedgerStore, VersionWrite};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Balance of every (address, denom) pair, one open version per pair.
pub struct BalanceLedger<S> {
    store: Arc<S>,
    registry: Arc<TokenRegistry>,
}

impl<S> Clone for BalanceLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

fn validate_delta(block_height: i64, address: &str, denom: &str) -> Option<String> {
    if block_height < 0 {
        Some(format!("negative block height {}", block_height))
    } else if address.trim().is_empty() {
        Some(format!("empty address in delta at height {}", block_height))
    } else if denom.trim().is_empty() {
        Some(format!("empty denom in delta for {} at height {}", address, block_height))
    } else {
        None
    }
}

impl<S: LedgerStore> BalanceLedger<S> {
    pub fn new(store: Arc<S>, registry: Arc<TokenRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn apply_delta(&self, delta: &BalanceDelta) -> Result<ApplyOutcome> {
        self.apply(delta.block_height, &delta.address, &delta.denom, &delta.delta)
            .await
    }

    /// Fold a signed delta into the chain of (address, denom).
    ///
    /// A delta older than the open version is rejected and leaves the chain
    /// untouched. Store failures are the only errors.
    pub async fn apply(
        &self,
        block_height: i64,
        address: &str,
        denom: &str,
        delta: &BigInt,
    ) -> Result<ApplyOutcome> {
        if let Some(reason) = validate_delta(block_height, address, denom) {
            warn!("Dropping delta: {}", reason);
            return Ok(ApplyOutcome::Rejected(Anomaly::InvalidInput { reason }));
        }

        let open = self.store.current_token_balance(address, denom).await?;

        let (write, old_balance, transition) = match open {
            None => {
                let version = TokenBalanceVersion {
                    address: address.to_string(),
                    denom: denom.to_string(),
                    block_height,
                    balance: delta.clone(),
                    is_current: true,
                };
                (VersionWrite::open(version), BigInt::zero(), VersionTransition::Created)
            }
            Some(open) if open.block_height == block_height => {
                let old_balance = open.balance.clone();
                let version = TokenBalanceVersion {
                    balance: &open.balance + delta,
                    ..open
                };
                (VersionWrite::open(version), old_balance, VersionTransition::Coalesced)
            }
            Some(open) if open.block_height < block_height => {
                let closed_height = open.block_height;
                let version = TokenBalanceVersion {
                    address: address.to_string(),
                    denom: denom.to_string(),
                    block_height,
                    balance: &open.balance + delta,
                    is_current: true,
                };
                (
                    VersionWrite::advance(closed_height, version),
                    open.balance,
                    VersionTransition::Advanced { closed_height },
                )
            }
            Some(open) => {
                let anomaly = Anomaly::OutOfOrderVersion {
                    address: address.to_string(),
                    denom: denom.to_string(),
                    current_height: open.block_height,
                    delta_height: block_height,
                };
                warn!("Dropping delta: {}", anomaly);
                return Ok(ApplyOutcome::Rejected(anomaly));
            }
        };

        let new_balance = write.version.balance.clone();
        self.store.write_token_balance(write).await?;

        debug!(
            "Balance {}/{} at height {}: {} -> {}",
            address, denom, block_height, old_balance, new_balance
        );

        let mut anomalies = Vec::new();
        if !self.registry.is_tracked(denom) {
            debug!("Denom {} is not tracked for points", denom);
            anomalies.push(Anomaly::UnknownDenom {
                address: address.to_string(),
                denom: denom.to_string(),
                block_height,
            });
        }
        if new_balance.is_negative() {
            let anomaly = Anomaly::NegativeBalance {
                address: address.to_string(),
                denom: denom.to_string(),
                block_height,
                balance: new_balance.clone(),
            };
            warn!("{}", anomaly);
            anomalies.push(anomaly);
        }

        Ok(ApplyOutcome::Applied {
            change: BalanceChange {
                address: address.to_string(),
                denom: denom.to_string(),
                block_height,
                old_balance,
                new_balance,
                transition,
            },
            anomalies,
        })
    }

    /// Open versions of `denom`, minus the excluded addresses
    pub async fn current_balances(
        &self,
        denom: &str,
        excluding: &HashSet<String>,
    ) -> Result<Vec<TokenBalanceVersion>> {
        let mut rows = self.store.current_token_balances(denom).await?;
        rows.retain(|row| !excluding.contains(&row.address));
        Ok(rows)
    }

    pub async fn current_balance(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Option<TokenBalanceVersion>> {
        self.store.current_token_balance(address, denom).await
    }

    pub async fn balance_history(
        &self,
        address: &str,
        denom: &str,
    ) -> Result<Vec<TokenBalanceVersion>> {
        self.store.token_balance_history(address, denom).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TokenDescriptor, TokenType};
    use crate::store::MemoryStore;

    fn create_test_ledger() -> BalanceLedger<MemoryStore> {
        let registry = TokenRegistry::new(
            vec![TokenDescriptor {
                denom: "A".to_string(),
                token_type: TokenType::Yield,
                multiplier: 2,
                maturity_epoch_seconds: i64::MAX,
            }],
            Vec::new(),
        )
        .unwrap();
        BalanceLedger::new(Arc::new(MemoryStore::new()), Arc::new(registry))
    }

    fn amount(v: i64) -> BigInt {
        BigInt::from(v)
    }

    #[tokio::test]
    async fn test_first_delta_creates_version() {
        let ledger = create_test_ledger();
        let outcome = ledger.apply(100, "x", "A", &amount(100)).await.unwrap();

        let change = outcome.change().unwrap();
        assert_eq!(change.transition, VersionTransition::Created);
        assert_eq!(change.new_balance, amount(100));
        assert!(outcome.anomalies().is_empty());
    }

    #[tokio::test]
    async fn test_same_block_deltas_coalesce() {
        let ledger = create_test_ledger();
        for delta in [10, 20, -5, 7] {
            ledger.apply(50, "x", "A", &amount(delta)).await.unwrap();
        }

        let history = ledger.balance_history("x", "A").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].balance, amount(32));
        assert!(history[0].is_current);
    }

    #[tokio::test]
    async fn test_later_block_closes_previous_version() {
        let ledger = create_test_ledger();
        ledger.apply(100, "x", "A", &amount(100)).await.unwrap();
        let outcome = ledger.apply(102, "x", "A", &amount(-40)).await.unwrap();

        assert_eq!(
            outcome.change().unwrap().transition,
            VersionTransition::Advanced { closed_height: 100 }
        );
        let history = ledger.balance_history("x", "A").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_current);
        assert_eq!(history[0].balance, amount(100));
        assert_eq!(history[1].balance, amount(60));
        assert_eq!(history.iter().filter(|v| v.is_current).count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_delta_is_rejected() {
        let ledger = create_test_ledger();
        ledger.apply(100, "x", "A", &amount(100)).await.unwrap();
        let before = ledger.balance_history("x", "A").await.unwrap();

        let outcome = ledger.apply(99, "x", "A", &amount(5)).await.unwrap();
        assert!(matches!(
            outcome,
            ApplyOutcome::Rejected(Anomaly::OutOfOrderVersion {
                current_height: 100,
                delta_height: 99,
                ..
            })
        ));
        assert_eq!(ledger.balance_history("x", "A").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_negative_balance_is_kept_and_flagged() {
        let ledger = create_test_ledger();
        let outcome = ledger.apply(3, "x", "A", &amount(-10)).await.unwrap();

        assert_eq!(outcome.change().unwrap().new_balance, amount(-10));
        assert!(matches!(
            outcome.anomalies(),
            [Anomaly::NegativeBalance { .. }]
        ));
    }

    #[tokio::test]
    async fn test_unknown_denom_is_still_applied() {
        let ledger = create_test_ledger();
        let outcome = ledger.apply(3, "x", "untracked", &amount(10)).await.unwrap();

        assert!(outcome.change().is_some());
        assert!(matches!(outcome.anomalies(), [Anomaly::UnknownDenom { .. }]));
        let current = ledger.current_balance("x", "untracked").await.unwrap().unwrap();
        assert_eq!(current.balance, amount(10));
    }

    #[tokio::test]
    async fn test_malformed_delta_is_rejected() {
        let ledger = create_test_ledger();
        let outcome = ledger.apply(3, "", "A", &amount(10)).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Rejected(Anomaly::InvalidInput { .. })));

        let outcome = ledger.apply(-1, "x", "A", &amount(10)).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Rejected(Anomaly::InvalidInput { .. })));

        assert!(ledger.current_balances("A", &HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_current_balances_skip_excluded() {
        let ledger = create_test_ledger();
        ledger.apply(1, "x", "A", &amount(1)).await.unwrap();
        ledger.apply(1, "amm", "A", &amount(1)).await.unwrap();

        let excluded: HashSet<String> = ["amm".to_string()].into_iter().collect();
        let rows = ledger.current_balances("A", &excluded).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "x");
    }
}
