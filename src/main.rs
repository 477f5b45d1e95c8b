use clap::Parser;
use fission_points_indexer::{
    init_tracing, open_indexer, run_stream, BlockAssembler, EndOfInput, IndexerConfig, Result,
    RunSummary,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::error;

/// Index newline-delimited JSON chain events read from stdin
#[derive(Parser, Debug)]
#[command(name = "fission-points-indexer")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/pion-1.toml", value_name = "PATH")]
    config: PathBuf,

    /// Overrides the configured start block
    #[arg(long, value_name = "HEIGHT")]
    start_block: Option<i64>,

    /// The input ends on a block boundary; also index the last block
    #[arg(long = "final")]
    final_input: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => {
            println!(
                "{} blocks indexed, {} skipped, {} anomalies, {} events discarded",
                summary.blocks, summary.skipped, summary.anomalies, summary.discarded_events
            );
            if let Some(height) = summary.pending_height {
                println!(
                    "block {} left open; resume from its header or rerun with --final",
                    height
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Indexer stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let mut config = IndexerConfig::load(&cli.config)?;
    if let Some(start_block) = cli.start_block {
        config.start_block = start_block;
    }

    let end = if cli.final_input {
        EndOfInput::Flush
    } else {
        EndOfInput::Hold
    };

    let indexer = open_indexer(config).await?;
    let mut assembler = BlockAssembler::for_registry(indexer.registry());
    run_stream(&indexer, &mut assembler, BufReader::new(tokio::io::stdin()), end).await
}
