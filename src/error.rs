use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] points_ledger::LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
