use crate::{
    error::{NormalizeError, Result},
    types::{AttributeValue, Coin, Normalized, RawChainEvent, RawEvent},
};
use num_bigint::BigUint;
use points_ledger::{BlockTick, Movement, MovementKind, TokenRegistry};
use std::collections::HashSet;
use tracing::{debug, error};

pub const TRANSFER_EVENT: &str = "transfer";
pub const MINT_EVENT: &str = "tf_mint";
pub const BURN_EVENT: &str = "tf_burn";

const MIN_DENOM_LEN: usize = 3;
const MAX_DENOM_LEN: usize = 128;

/// Parse a Cosmos coin list. Whitespace is ignored and empty entries are skipped.
pub fn parse_coins(input: &str) -> Result<Vec<Coin>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    compact
        .split(',')
        .filter(|part| !part.is_empty())
        .map(parse_coin)
        .collect()
}

fn parse_coin(part: &str) -> Result<Coin> {
    let split = part
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| NormalizeError::InvalidCoin(part.to_string()))?;
    let (digits, denom) = part.split_at(split);

    if digits.is_empty() || !is_valid_denom(denom) {
        return Err(NormalizeError::InvalidCoin(part.to_string()));
    }

    let amount = digits
        .parse::<BigUint>()
        .map_err(|_| NormalizeError::InvalidCoin(part.to_string()))?;

    Ok(Coin {
        denom: denom.to_string(),
        amount,
    })
}

fn is_valid_denom(denom: &str) -> bool {
    let mut chars = denom.chars();
    let starts_alpha = chars.next().map_or(false, |c| c.is_ascii_alphabetic());

    starts_alpha
        && (MIN_DENOM_LEN..=MAX_DENOM_LEN).contains(&denom.len())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
}

/// Turns raw chain events into ledger inputs
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    denom_filter: Option<HashSet<String>>,
}

impl EventNormalizer {
    /// A normalizer that passes every denom through
    pub fn new() -> Self {
        Self::default()
    }

    /// Only emit deltas for the given denoms
    pub fn tracking(denoms: impl IntoIterator<Item = String>) -> Self {
        Self {
            denom_filter: Some(denoms.into_iter().collect()),
        }
    }

    pub fn for_registry(registry: &TokenRegistry) -> Self {
        Self::tracking(registry.descriptors().iter().map(|d| d.denom.clone()))
    }

    fn keeps(&self, denom: &str) -> bool {
        self.denom_filter
            .as_ref()
            .map_or(true, |denoms| denoms.contains(denom))
    }

    pub fn normalize(&self, event: &RawChainEvent) -> Normalized {
        match event {
            RawChainEvent::NewBlock { height, time } => Normalized::Tick(BlockTick {
                block_height: *height,
                block_time_seconds: time.timestamp(),
            }),
            RawChainEvent::Event(event) => match self.normalize_event(event) {
                Ok(Some(movements)) => Normalized::Movements(movements),
                Ok(None) => {
                    debug!("Ignoring {} event at height {}", event.kind, event.block_height);
                    Normalized::Discard(format!("unhandled event type {}", event.kind))
                }
                Err(e) => {
                    error!("Discarding {} event at height {}: {}", event.kind, event.block_height, e);
                    Normalized::Discard(e.to_string())
                }
            },
        }
    }

    /// `Ok(None)` for event kinds that never move balances
    pub fn normalize_event(&self, event: &RawEvent) -> Result<Option<Vec<Movement>>> {
        let (kind, sender, recipient) = match event.kind.as_str() {
            TRANSFER_EVENT => (
                MovementKind::Transfer,
                Some(attribute(event, "sender")?),
                Some(attribute(event, "recipient")?),
            ),
            MINT_EVENT => (
                MovementKind::Mint,
                None,
                Some(attribute(event, "mint_to_address")?),
            ),
            BURN_EVENT => (
                MovementKind::Burn,
                Some(attribute(event, "burn_from_address")?),
                None,
            ),
            _ => return Ok(None),
        };

        let movements = self
            .coins(event)?
            .into_iter()
            .map(|(coin_index, coin)| Movement {
                id: Movement::record_id(&event.tx_hash, event.event_index, coin_index),
                kind,
                block_height: event.block_height,
                tx_hash: event.tx_hash.clone(),
                denom: coin.denom,
                amount: coin.amount,
                sender: sender.clone(),
                recipient: recipient.clone(),
            })
            .collect();

        Ok(Some(movements))
    }

    /// Coins of the event's `amount` attribute with their position in the list,
    /// zero amounts and filtered denoms removed
    fn coins(&self, event: &RawEvent) -> Result<Vec<(usize, Coin)>> {
        let amount = attribute(event, "amount")?;
        let coins = parse_coins(&amount)?;
        if coins.is_empty() {
            return Err(NormalizeError::EmptyCoins(event.kind.clone()));
        }

        Ok(coins
            .into_iter()
            .enumerate()
            .filter(|(_, coin)| coin.amount != BigUint::default() && self.keeps(&coin.denom))
            .collect())
    }
}

/// Text of the first attribute named `key`, decoding byte values as UTF-8
fn attribute(event: &RawEvent, key: &'static str) -> Result<String> {
    let value = event
        .attributes
        .iter()
        .find(|attr| attr.key == key)
        .map(|attr| &attr.value)
        .ok_or_else(|| NormalizeError::MissingAttribute {
            kind: event.kind.clone(),
            attribute: key,
        })?;

    let text = match value {
        AttributeValue::Text(text) => text.clone(),
        AttributeValue::Bytes(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| NormalizeError::InvalidUtf8(key.to_string()))?,
    };

    if text.is_empty() {
        return Err(NormalizeError::MissingAttribute {
            kind: event.kind.clone(),
            attribute: key,
        });
    }
    Ok(text)
}
