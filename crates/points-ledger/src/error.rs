//! Error types for the points ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    #[error("Block out of order: last processed height {last}, received {received}")]
    BlockOutOfOrder { last: i64, received: i64 },

    #[error("Event system error: {0}")]
    EventSystem(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
