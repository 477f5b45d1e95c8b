//! Groups a stream of raw chain events into per-block ledger inputs

use event_normalizer::{EventNormalizer, Normalized, RawChainEvent};
use points_ledger::{BalanceDelta, BlockInput, TokenRegistry};
use tracing::debug;

/// A block header opens a block; the transaction events that follow belong to
/// it until the next header arrives.
///
/// The open block survives across input chunks, so one block may be split
/// over several reads. Deltas seen while no block is open are kept aside as
/// orphans for the caller to report.
pub struct BlockAssembler {
    normalizer: EventNormalizer,
    pending: Option<BlockInput>,
    orphans: Vec<BalanceDelta>,
    discarded: u64,
}

impl BlockAssembler {
    pub fn new(normalizer: EventNormalizer) -> Self {
        Self {
            normalizer,
            pending: None,
            orphans: Vec::new(),
            discarded: 0,
        }
    }

    pub fn for_registry(registry: &TokenRegistry) -> Self {
        Self::new(EventNormalizer::for_registry(registry))
    }

    /// Feed one event; returns the previous block once a new header closes it
    pub fn push(&mut self, event: &RawChainEvent) -> Option<BlockInput> {
        match self.normalizer.normalize(event) {
            Normalized::Tick(_) => {
                let RawChainEvent::NewBlock { height, time } = event else {
                    return None;
                };
                self.pending.replace(BlockInput::new(*height, *time))
            }
            Normalized::Movements(movements) => {
                match self.pending.as_mut() {
                    Some(block) => movements.into_iter().for_each(|m| block.push_movement(m)),
                    None => {
                        for movement in movements {
                            self.orphans.extend(movement.deltas());
                        }
                    }
                }
                None
            }
            Normalized::Discard(reason) => {
                debug!("Discarded event: {}", reason);
                self.discarded += 1;
                None
            }
        }
    }

    /// Close the open block. Only for input known to be complete.
    pub fn finish(&mut self) -> Option<BlockInput> {
        self.pending.take()
    }

    /// Height of the block still collecting events
    pub fn pending_height(&self) -> Option<i64> {
        self.pending.as_ref().map(|block| block.height)
    }

    /// Deltas received while no block was open
    pub fn take_orphans(&mut self) -> Vec<BalanceDelta> {
        std::mem::take(&mut self.orphans)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
