//! Event system for the points indexer

use crate::error::{LedgerError, Result};
use crate::models::{Anomaly, BalanceChange, MovementRecord, PointsChange};
use serde::Serialize;
use tokio::sync::broadcast;

/// Event types that can be emitted by the indexer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceUpdated(BalanceChange),
    PointsAccrued(PointsChange),
    MovementRecorded(MovementRecord),
    Anomaly(Anomaly),
    BlockProcessed { height: i64 },
}

/// Event emitter for broadcasting ledger events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit_balance_updated(&self, change: BalanceChange) {
        self.emit(LedgerEvent::BalanceUpdated(change));
    }

    pub fn emit_points_accrued(&self, change: PointsChange) {
        self.emit(LedgerEvent::PointsAccrued(change));
    }

    pub fn emit_movement_recorded(&self, record: MovementRecord) {
        self.emit(LedgerEvent::MovementRecorded(record));
    }

    pub fn emit_anomaly(&self, anomaly: Anomaly) {
        self.emit(LedgerEvent::Anomaly(anomaly));
    }

    pub fn emit_block_processed(&self, height: i64) {
        self.emit(LedgerEvent::BlockProcessed { height });
    }

    /// Sending with nobody listening is not an error.
    fn emit(&self, event: LedgerEvent) {
        match self.sender.send(event) {
            Ok(count) => tracing::trace!("Event sent to {} subscribers", count),
            Err(_) => tracing::trace!("No active subscribers for event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Event subscriber for receiving ledger events
pub struct EventSubscriber {
    receiver: broadcast::Receiver<LedgerEvent>,
}

impl EventSubscriber {
    pub fn new(emitter: &EventEmitter) -> Self {
        Self {
            receiver: emitter.subscribe(),
        }
    }

    pub async fn recv(&mut self) -> Result<LedgerEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| LedgerError::EventSystem(e.to_string()))
    }

    /// Try to receive the next event without blocking
    pub fn try_recv(&mut self) -> Result<Option<LedgerEvent>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(LedgerError::EventSystem(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emitter() {
        let emitter = EventEmitter::new(10);
        let mut subscriber = EventSubscriber::new(&emitter);

        emitter.emit_anomaly(Anomaly::InvalidInput {
            reason: "empty address".to_string(),
        });
        emitter.emit_block_processed(7);

        match subscriber.recv().await.unwrap() {
            LedgerEvent::Anomaly(Anomaly::InvalidInput { reason }) => {
                assert_eq!(reason, "empty address")
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(matches!(
            subscriber.recv().await.unwrap(),
            LedgerEvent::BlockProcessed { height: 7 }
        ));
        assert!(subscriber.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = EventEmitter::default();
        assert_eq!(emitter.subscriber_count(), 0);
        emitter.emit_block_processed(1);
    }
}
