//! Tracked token registry

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Principal,
    Yield,
    StakedYield,
    #[serde(alias = "Lp")]
    LP,
}

/// A token that accrues points for its holders until maturity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub denom: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub multiplier: u64,
    #[serde(alias = "maturity")]
    pub maturity_epoch_seconds: i64,
}

impl TokenDescriptor {
    /// A token stops accruing once the block time reaches its maturity.
    pub fn accrues_at(&self, block_time_seconds: i64) -> bool {
        self.maturity_epoch_seconds > block_time_seconds
    }
}

/// Registry as it appears in configuration files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub tokens: Vec<TokenDescriptor>,
    #[serde(default)]
    pub excluded_addresses: Vec<String>,
}

/// Immutable set of tracked tokens and addresses exempt from accrual
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    descriptors: Vec<TokenDescriptor>,
    by_denom: HashMap<String, usize>,
    excluded_addresses: HashSet<String>,
}

impl TokenRegistry {
    pub fn new(
        descriptors: Vec<TokenDescriptor>,
        excluded_addresses: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let mut by_denom = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.denom.trim().is_empty() {
                return Err(LedgerError::InvalidRegistry(format!(
                    "token #{} has an empty denom",
                    index
                )));
            }
            if by_denom.insert(descriptor.denom.clone(), index).is_some() {
                return Err(LedgerError::InvalidRegistry(format!(
                    "denom {} is listed more than once",
                    descriptor.denom
                )));
            }
        }

        let excluded_addresses: HashSet<String> = excluded_addresses.into_iter().collect();
        if excluded_addresses.iter().any(|a| a.trim().is_empty()) {
            return Err(LedgerError::InvalidRegistry(
                "excluded address list contains an empty entry".to_string(),
            ));
        }

        Ok(Self {
            descriptors,
            by_denom,
            excluded_addresses,
        })
    }

    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        Self::new(config.tokens, config.excluded_addresses)
    }

    pub fn descriptors(&self) -> &[TokenDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, denom: &str) -> Option<&TokenDescriptor> {
        self.by_denom.get(denom).map(|&i| &self.descriptors[i])
    }

    pub fn is_tracked(&self, denom: &str) -> bool {
        self.by_denom.contains_key(denom)
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded_addresses.contains(address)
    }

    pub fn excluded_addresses(&self) -> &HashSet<String> {
        &self.excluded_addresses
    }

    /// Descriptors still accruing at the given block time
    pub fn accruing_at(&self, block_time_seconds: i64) -> impl Iterator<Item = &TokenDescriptor> {
        self.descriptors
            .iter()
            .filter(move |d| d.accrues_at(block_time_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(denom: &str, maturity: i64) -> TokenDescriptor {
        TokenDescriptor {
            denom: denom.to_string(),
            token_type: TokenType::Principal,
            multiplier: 1,
            maturity_epoch_seconds: maturity,
        }
    }

    #[test]
    fn test_rejects_duplicate_denoms() {
        let result = TokenRegistry::new(vec![token("A", 10), token("A", 20)], Vec::new());
        assert!(matches!(result, Err(LedgerError::InvalidRegistry(_))));
    }

    #[test]
    fn test_rejects_empty_excluded_address() {
        let result = TokenRegistry::new(vec![token("A", 10)], vec![" ".to_string()]);
        assert!(matches!(result, Err(LedgerError::InvalidRegistry(_))));
    }

    #[test]
    fn test_maturity_is_exclusive() {
        let registry = TokenRegistry::new(vec![token("A", 100), token("B", 200)], Vec::new()).unwrap();

        let at_99: Vec<_> = registry.accruing_at(99).map(|d| d.denom.as_str()).collect();
        assert_eq!(at_99, vec!["A", "B"]);

        let at_100: Vec<_> = registry.accruing_at(100).map(|d| d.denom.as_str()).collect();
        assert_eq!(at_100, vec!["B"]);
    }

    #[test]
    fn test_lookup_and_exclusion() {
        let registry = TokenRegistry::new(
            vec![token("A", 100)],
            vec!["amm".to_string(), "router".to_string()],
        )
        .unwrap();

        assert!(registry.is_tracked("A"));
        assert!(!registry.is_tracked("B"));
        assert_eq!(registry.descriptor("A").map(|d| d.maturity_epoch_seconds), Some(100));
        assert!(registry.is_excluded("amm"));
        assert!(!registry.is_excluded("alice"));
    }
}
