//! Normalization of raw Cosmos chain events
//!
//! Transfer, token-factory mint and burn events become movement records, one
//! per tracked coin, each implying its signed balance deltas. New block
//! headers become block ticks. Everything else is discarded.

pub mod error;
pub mod parser;
pub mod types;

pub use error::{NormalizeError, Result};
pub use parser::{parse_coins, EventNormalizer, BURN_EVENT, MINT_EVENT, TRANSFER_EVENT};
pub use types::{AttributeValue, Coin, Normalized, RawAttribute, RawChainEvent, RawEvent};
