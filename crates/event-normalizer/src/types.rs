use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use points_ledger::{BlockTick, Movement};
use serde::{Deserialize, Serialize};

/// Attribute value as delivered by the node: plain text or undecoded bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::Bytes(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttribute {
    pub key: String,
    pub value: AttributeValue,
}

impl RawAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A transaction event as emitted by the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub block_height: i64,
    /// Hash of the transaction that emitted the event
    pub tx_hash: String,
    /// Position of the event within its transaction
    pub event_index: u32,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawChainEvent {
    NewBlock { height: i64, time: DateTime<Utc> },
    Event(RawEvent),
}

/// One entry of a Cosmos coin list such as `"100uatom,5factory/x/y"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub denom: String,
    pub amount: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Tracked coins moved by the event; their deltas follow from `Movement::deltas`
    Movements(Vec<Movement>),
    Tick(BlockTick),
    Discard(String),
}
