//! Configuration types for the ledger database

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; `None` keeps the ledgers in an in-memory SQLite database
    pub sqlite_path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Some(PathBuf::from("points.db")),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_seconds: default_connection_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            sqlite_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Every pooled connection to `:memory:` opens its own database, so the
    /// pool is pinned to a single connection.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: None,
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path.is_none()
    }

    pub fn connection_url(&self) -> Result<String> {
        match &self.sqlite_path {
            None => Ok("sqlite::memory:".to_string()),
            Some(path) => {
                if path.as_os_str().is_empty() {
                    return Err(LedgerError::Config("SQLite path is empty".to_string()));
                }
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(LedgerError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(LedgerError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.is_in_memory() && self.max_connections != 1 {
            return Err(LedgerError::Config(
                "an in-memory database requires max_connections = 1".to_string(),
            ));
        }
        Ok(())
    }
}
