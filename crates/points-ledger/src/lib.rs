//! Points ledger crate for the Fission points indexer
//!
//! This crate maintains two version-chained ledgers: the balance of every
//! (address, denom) pair, and the reward points accrued by holders of
//! tracked tokens until their maturity.

pub mod accrual;
pub mod config;
pub mod error;
pub mod events;
pub mod indexer;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod registry;
pub mod store;

// Re-export main types for convenience
pub use accrual::PointsAccrualEngine;
pub use config::DatabaseConfig;
pub use error::{LedgerError, Result};
pub use events::{EventEmitter, EventSubscriber, LedgerEvent};
pub use indexer::PointsIndexer;
pub use ledger::BalanceLedger;
pub use models::{
    Anomaly, ApplyOutcome, BalanceChange, BalanceDelta, BlockInput, BlockReport, BlockTick,
    Movement, MovementKind, MovementRecord, PointsBalanceVersion, PointsChange, TickReport,
    TokenBalanceVersion, VersionTransition,
};
pub use registry::{RegistryConfig, TokenDescriptor, TokenRegistry, TokenType};
pub use store::{LedgerStore, MemoryStore, SqliteStore};

pub use num_bigint;
