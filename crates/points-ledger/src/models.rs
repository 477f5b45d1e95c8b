//! Data models for the points ledger

use chrono::{DateTime, Utc};
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Big integers travel as decimal strings in every serialized form.
pub(crate) mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: Display,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Shared shape of both version chains: a row is OPEN while current and
/// becomes CLOSED exactly once, when the next version for its key is written.
pub trait Versioned {
    fn height(&self) -> i64;
    fn is_current(&self) -> bool;
    fn close(&mut self);
}

/// Balance of one (address, denom) pair as of one block height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalanceVersion {
    pub address: String,
    pub denom: String,
    pub block_height: i64,
    #[serde(with = "decimal")]
    pub balance: BigInt,
    pub is_current: bool,
}

impl Versioned for TokenBalanceVersion {
    fn height(&self) -> i64 {
        self.block_height
    }

    fn is_current(&self) -> bool {
        self.is_current
    }

    fn close(&mut self) {
        self.is_current = false;
    }
}

/// Cumulative points of one address as of one block height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBalanceVersion {
    pub address: String,
    pub block_height: i64,
    #[serde(with = "decimal")]
    pub balance: BigUint,
    pub is_current: bool,
}

impl Versioned for PointsBalanceVersion {
    fn height(&self) -> i64 {
        self.block_height
    }

    fn is_current(&self) -> bool {
        self.is_current
    }

    fn close(&mut self) {
        self.is_current = false;
    }
}

/// Signed change to one address's balance of one denom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub block_height: i64,
    pub address: String,
    pub denom: String,
    #[serde(with = "decimal")]
    pub delta: BigInt,
}

impl BalanceDelta {
    pub fn new(
        block_height: i64,
        address: impl Into<String>,
        denom: impl Into<String>,
        delta: impl Into<BigInt>,
    ) -> Self {
        Self {
            block_height,
            address: address.into(),
            denom: denom.into(),
            delta: delta.into(),
        }
    }
}

/// Per-block trigger for points accrual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTick {
    pub block_height: i64,
    pub block_time_seconds: i64,
}

/// What kind of event moved a tracked coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    Transfer,
    Mint,
    Burn,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Transfer => "Transfer",
            MovementKind::Mint => "Mint",
            MovementKind::Burn => "Burn",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Transfer" => Some(MovementKind::Transfer),
            "Mint" => Some(MovementKind::Mint),
            "Burn" => Some(MovementKind::Burn),
            _ => None,
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one coin moved by a transfer, mint or burn.
///
/// Mints have no sender and burns no recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// `{tx_hash}-{event_index}-{coin_index}`
    pub id: String,
    pub kind: MovementKind,
    pub block_height: i64,
    pub tx_hash: String,
    pub denom: String,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

impl Movement {
    pub fn record_id(tx_hash: &str, event_index: u32, coin_index: usize) -> String {
        format!("{}-{}-{}", tx_hash, event_index, coin_index)
    }

    /// Balance deltas implied by this movement: sender debited, recipient credited
    pub fn deltas(&self) -> Vec<BalanceDelta> {
        let amount = BigInt::from(self.amount.clone());
        let mut deltas = Vec::with_capacity(2);
        if let Some(sender) = &self.sender {
            deltas.push(BalanceDelta::new(
                self.block_height,
                sender.as_str(),
                self.denom.as_str(),
                -amount.clone(),
            ));
        }
        if let Some(recipient) = &self.recipient {
            deltas.push(BalanceDelta::new(
                self.block_height,
                recipient.as_str(),
                self.denom.as_str(),
                amount,
            ));
        }
        deltas
    }

    pub fn involves(&self, address: &str) -> bool {
        self.sender.as_deref() == Some(address) || self.recipient.as_deref() == Some(address)
    }
}

/// A stored movement together with the time of its block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    #[serde(flatten)]
    pub movement: Movement,
    pub timestamp: DateTime<Utc>,
}

/// Input data for processing one block
///
/// `movements` are the audit records of the events whose balance effects are
/// already part of `deltas`; they are stored, not applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInput {
    pub height: i64,
    pub timestamp: DateTime<Utc>,
    pub deltas: Vec<BalanceDelta>,
    #[serde(default)]
    pub movements: Vec<Movement>,
}

impl BlockInput {
    pub fn new(height: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            height,
            timestamp,
            deltas: Vec::new(),
            movements: Vec::new(),
        }
    }

    /// Append a movement and the deltas it implies
    pub fn push_movement(&mut self, movement: Movement) {
        self.deltas.extend(movement.deltas());
        self.movements.push(movement);
    }

    pub fn tick(&self) -> BlockTick {
        BlockTick {
            block_height: self.height,
            block_time_seconds: self.timestamp.timestamp(),
        }
    }
}

/// How a balance write moved its version chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionTransition {
    /// First version ever written for the key
    Created,
    /// Same-height delta folded into the open version
    Coalesced,
    /// Previous version closed, new one opened
    Advanced { closed_height: i64 },
}

/// Event data for a balance update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub address: String,
    pub denom: String,
    pub block_height: i64,
    #[serde(with = "decimal")]
    pub old_balance: BigInt,
    #[serde(with = "decimal")]
    pub new_balance: BigInt,
    pub transition: VersionTransition,
}

/// Event data for a points accrual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsChange {
    pub address: String,
    pub block_height: i64,
    pub previous_height: Option<i64>,
    #[serde(with = "decimal")]
    pub old_balance: BigUint,
    #[serde(with = "decimal")]
    pub accrued: BigUint,
    #[serde(with = "decimal")]
    pub new_balance: BigUint,
}

/// Per-item condition reported alongside the state changes of a call.
/// None of these abort processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    InvalidInput {
        reason: String,
    },
    OutOfOrderVersion {
        address: String,
        denom: String,
        current_height: i64,
        delta_height: i64,
    },
    UnknownDenom {
        address: String,
        denom: String,
        block_height: i64,
    },
    ConsistencyViolation {
        address: String,
        denom: String,
        version_height: i64,
        tick_height: i64,
    },
    NegativeBalance {
        address: String,
        denom: String,
        block_height: i64,
        #[serde(with = "decimal")]
        balance: BigInt,
    },
    /// A tick would not extend the address's points chain forward
    StalePointsVersion {
        address: String,
        current_height: i64,
        tick_height: i64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::InvalidInput { reason } => write!(f, "invalid input: {}", reason),
            Anomaly::OutOfOrderVersion {
                address,
                denom,
                current_height,
                delta_height,
            } => write!(
                f,
                "out of order delta for {}/{}: current version at {}, delta at {}",
                address, denom, current_height, delta_height
            ),
            Anomaly::UnknownDenom {
                address,
                denom,
                block_height,
            } => write!(
                f,
                "untracked denom {} for {} at height {}",
                denom, address, block_height
            ),
            Anomaly::ConsistencyViolation {
                address,
                denom,
                version_height,
                tick_height,
            } => write!(
                f,
                "balance {}/{} at height {} is not older than tick {}",
                address, denom, version_height, tick_height
            ),
            Anomaly::NegativeBalance {
                address,
                denom,
                block_height,
                balance,
            } => write!(
                f,
                "negative balance {} for {}/{} at height {}",
                balance, address, denom, block_height
            ),
            Anomaly::StalePointsVersion {
                address,
                current_height,
                tick_height,
            } => write!(
                f,
                "points of {} already at height {}, tick at {}",
                address, current_height, tick_height
            ),
        }
    }
}

/// Result of a single `apply` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        change: BalanceChange,
        anomalies: Vec<Anomaly>,
    },
    Rejected(Anomaly),
}

impl ApplyOutcome {
    pub fn change(&self) -> Option<&BalanceChange> {
        match self {
            ApplyOutcome::Applied { change, .. } => Some(change),
            ApplyOutcome::Rejected(_) => None,
        }
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            ApplyOutcome::Applied { anomalies, .. } => anomalies,
            ApplyOutcome::Rejected(anomaly) => std::slice::from_ref(anomaly),
        }
    }

    pub fn into_parts(self) -> (Option<BalanceChange>, Vec<Anomaly>) {
        match self {
            ApplyOutcome::Applied { change, anomalies } => (Some(change), anomalies),
            ApplyOutcome::Rejected(anomaly) => (None, vec![anomaly]),
        }
    }
}

/// Result of a points tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub block_height: i64,
    pub block_time_seconds: i64,
    pub accruals: Vec<PointsChange>,
    pub anomalies: Vec<Anomaly>,
}

/// Result of processing a whole block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReport {
    pub height: i64,
    /// Block lies below the configured start height and was not processed
    pub skipped: bool,
    pub accruals: Vec<PointsChange>,
    pub balance_changes: Vec<BalanceChange>,
    pub movements: Vec<MovementRecord>,
    pub anomalies: Vec<Anomaly>,
}
