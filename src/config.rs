//! Indexer configuration: a TOML file with `FISSION_INDEXER__*` overrides

use crate::error::Result;
use config::{Config, Environment, File, FileFormat};
use points_ledger::{DatabaseConfig, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "FISSION_INDEXER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// First block that is indexed; earlier blocks are skipped
    #[serde(default)]
    pub start_block: i64,
}

impl IndexerConfig {
    /// Load from a file, letting the environment override individual keys,
    /// e.g. `FISSION_INDEXER__DATABASE__SQLITE_PATH=/data/points.db`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use points_ledger::TokenType;
    use std::path::PathBuf;

    #[test]
    fn test_parse_minimal() {
        let config = IndexerConfig::from_toml("start_block = 7").unwrap();
        assert_eq!(config.start_block, 7);
        assert!(config.registry.tokens.is_empty());
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_parse_registry_and_database() {
        let text = r#"
            start_block = 100

            [database]
            sqlite_path = "points.db"
            max_connections = 4

            [registry]
            excluded_addresses = ["neutron1minter"]

            [[registry.tokens]]
            denom = "factory/neutron1minter/P/240906"
            type = "Principal"
            multiplier = 2
            maturity = 1725638534
        "#;

        let config = IndexerConfig::from_toml(text).unwrap();
        assert_eq!(config.database.sqlite_path, Some(PathBuf::from("points.db")));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.registry.excluded_addresses, vec!["neutron1minter"]);

        let token = &config.registry.tokens[0];
        assert_eq!(token.token_type, TokenType::Principal);
        assert_eq!(token.multiplier, 2);
        assert_eq!(token.maturity_epoch_seconds, 1_725_638_534);
    }

    #[test]
    fn test_load_bundled_testnet_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pion-1.toml");
        let config = IndexerConfig::load(path).unwrap();

        assert_eq!(config.start_block, 18_538_216);
        assert_eq!(config.registry.tokens.len(), 9);
        assert_eq!(config.registry.excluded_addresses.len(), 3);
    }
}
