#![warn(clippy::all)]

//! Fission points indexer
//!
//! Wires the configuration, the SQLite-backed ledgers and the event
//! normalizer together into a block-by-block indexing pipeline.

pub mod assembler;
pub mod config;
pub mod error;

pub use assembler::BlockAssembler;
pub use config::IndexerConfig;
pub use error::{IndexerError, Result};

use event_normalizer::RawChainEvent;
use points_ledger::{LedgerStore, PointsIndexer, SqliteStore, TokenRegistry};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Open the configured database and build an indexer over it
pub async fn open_indexer(config: IndexerConfig) -> Result<PointsIndexer<SqliteStore>> {
    let registry = Arc::new(TokenRegistry::from_config(config.registry)?);
    let store = Arc::new(SqliteStore::connect(config.database).await?);

    info!(
        "Tracking {} tokens, {} excluded addresses",
        registry.descriptors().len(),
        registry.excluded_addresses().len()
    );

    Ok(PointsIndexer::new(store, registry)
        .await?
        .with_start_block(config.start_block))
}

/// What to do with the open block when the input runs out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EndOfInput {
    /// More events of the last block may follow; leave it open
    #[default]
    Hold,
    /// The input is complete; index the last block too
    Flush,
}

/// Totals for one run over an event stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks: u64,
    pub skipped: u64,
    pub anomalies: u64,
    pub discarded_events: u64,
    /// Deltas that arrived outside any block; each is also counted as an anomaly
    pub orphaned_deltas: u64,
    /// Block left open at the end of the input
    pub pending_height: Option<i64>,
}

/// Index newline-delimited JSON chain events until the reader is exhausted.
///
/// The assembler carries an unfinished block from one call to the next.
pub async fn run_stream<S, R>(
    indexer: &PointsIndexer<S>,
    assembler: &mut BlockAssembler,
    reader: R,
    end: EndOfInput,
) -> Result<RunSummary>
where
    S: LedgerStore,
    R: AsyncBufRead + Unpin,
{
    let mut summary = RunSummary::default();
    let discarded_before = assembler.discarded();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: RawChainEvent = serde_json::from_str(&line)?;
        let finished = assembler.push(&event);
        report_orphans(indexer, assembler, &mut summary).await;
        if let Some(block) = finished {
            process(indexer, block, &mut summary).await?;
        }
    }

    if end == EndOfInput::Flush {
        if let Some(block) = assembler.finish() {
            process(indexer, block, &mut summary).await?;
        }
    }
    summary.pending_height = assembler.pending_height();
    summary.discarded_events = assembler.discarded() - discarded_before;

    info!(
        "Indexed {} blocks ({} skipped, {} anomalies)",
        summary.blocks, summary.skipped, summary.anomalies
    );
    if let Some(height) = summary.pending_height {
        info!("Block {} is still open and was not indexed", height);
    }
    Ok(summary)
}

async fn report_orphans<S: LedgerStore>(
    indexer: &PointsIndexer<S>,
    assembler: &mut BlockAssembler,
    summary: &mut RunSummary,
) {
    let orphans = assembler.take_orphans();
    if orphans.is_empty() {
        return;
    }
    let anomalies = indexer.report_orphaned_deltas(&orphans).await;
    summary.orphaned_deltas += orphans.len() as u64;
    summary.anomalies += anomalies.len() as u64;
}

async fn process<S: LedgerStore>(
    indexer: &PointsIndexer<S>,
    block: points_ledger::BlockInput,
    summary: &mut RunSummary,
) -> Result<()> {
    let report = indexer.process_block(block).await?;

    summary.blocks += 1;
    if report.skipped {
        summary.skipped += 1;
    }
    for anomaly in &report.anomalies {
        warn!("Block {}: {}", report.height, anomaly);
    }
    summary.anomalies += report.anomalies.len() as u64;
    Ok(())
}
