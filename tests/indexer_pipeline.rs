//! Stream of JSON chain events through the full SQLite-backed pipeline

use fission_points_indexer::{
    open_indexer, run_stream, BlockAssembler, EndOfInput, IndexerConfig, IndexerError, RunSummary,
};
use points_ledger::num_bigint::{BigInt, BigUint};
use points_ledger::{LedgerError, LedgerStore, MovementKind, PointsIndexer};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const DENOM: &str = "factory/neutron1minter/P/240906";

fn config_toml(database: &str, start_block: i64) -> String {
    format!(
        r#"
        start_block = {start_block}

        [database]
        {database}

        [registry]
        excluded_addresses = ["neutron1minter"]

        [[registry.tokens]]
        denom = "{DENOM}"
        type = "Principal"
        multiplier = 3
        maturity = 1725638534
        "#
    )
}

fn in_memory(start_block: i64) -> IndexerConfig {
    IndexerConfig::from_toml(&config_toml(
        "max_connections = 1\n        min_connections = 1",
        start_block,
    ))
    .unwrap()
}

fn header(height: i64, time: &str) -> String {
    format!(r#"{{"NewBlock":{{"height":{height},"time":"{time}"}}}}"#)
}

fn event(kind: &str, height: i64, event_index: u32, attributes: &[(&str, &str)]) -> String {
    let attributes: Vec<String> = attributes
        .iter()
        .map(|(k, v)| format!(r#"{{"key":"{k}","value":"{v}"}}"#))
        .collect();
    format!(
        r#"{{"Event":{{"type":"{kind}","block_height":{height},"tx_hash":"TX{height}","event_index":{event_index},"attributes":[{}]}}}}"#,
        attributes.join(",")
    )
}

fn stream() -> String {
    let amount = format!("500{DENOM}");
    let lines = vec![
        header(10, "2024-09-01T00:00:00Z"),
        event("tf_mint", 10, 0, &[("amount", &amount), ("mint_to_address", "neutron1minter")]),
        event(
            "transfer",
            10,
            1,
            &[("sender", "neutron1minter"), ("recipient", "alice"), ("amount", &amount)],
        ),
        event("message", 10, 2, &[("action", "/cosmos.bank.v1beta1.MsgSend")]),
        header(11, "2024-09-01T00:00:06Z"),
        event("transfer", 11, 0, &[("sender", "alice"), ("recipient", "bob"), ("amount", "7uatom")]),
        String::new(),
        header(12, "2024-09-01T00:00:12Z"),
    ];
    lines.join("\n")
}

/// One complete run over `input`, as for a finished export
async fn run_to_end<S: LedgerStore>(
    indexer: &PointsIndexer<S>,
    input: &str,
) -> fission_points_indexer::Result<RunSummary> {
    let mut assembler = BlockAssembler::for_registry(indexer.registry());
    run_stream(indexer, &mut assembler, input.as_bytes(), EndOfInput::Flush).await
}

#[tokio::test]
async fn test_run_stream_indexes_blocks() {
    let indexer = open_indexer(in_memory(0)).await.unwrap();

    let summary = run_to_end(&indexer, &stream()).await.unwrap();
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.pending_height, None);
    assert_eq!(summary.anomalies, 0);
    assert_eq!(summary.discarded_events, 1);

    assert_eq!(indexer.get_last_processed_height().await, Some(12));

    let alice = indexer.get_token_balance("alice", DENOM).await.unwrap().unwrap();
    assert_eq!(alice.balance, BigInt::from(500));

    // Untracked denoms never reach the ledger.
    assert!(indexer.get_token_balance("bob", "uatom").await.unwrap().is_none());

    // Two ticks over 500 tokens at multiplier 3.
    let points = indexer.get_points_balance("alice").await.unwrap().unwrap();
    assert_eq!(points.block_height, 12);
    assert_eq!(points.balance, BigUint::from(3000u32));
    assert!(indexer
        .get_points_balance("neutron1minter")
        .await
        .unwrap()
        .is_none());

    let minted = indexer.get_movements_by_denom(DENOM).await.unwrap();
    let kinds: Vec<MovementKind> = minted.iter().map(|r| r.movement.kind).collect();
    assert_eq!(kinds, vec![MovementKind::Mint, MovementKind::Transfer]);
    assert_eq!(minted[1].movement.id, "TX10-1-0");
    assert_eq!(minted[1].movement.recipient.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_blocks_below_start_are_skipped() {
    let indexer = open_indexer(in_memory(11)).await.unwrap();

    let summary = run_to_end(&indexer, &stream()).await.unwrap();
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.skipped, 1);
    assert!(indexer.get_token_balance("alice", DENOM).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_line_stops_the_run() {
    let indexer = open_indexer(in_memory(0)).await.unwrap();

    let input = format!("{}\nnot json\n", header(1, "2024-09-01T00:00:00Z"));
    let result = run_to_end(&indexer, &input).await;
    assert!(matches!(result, Err(IndexerError::Serialization(_))));
}

#[tokio::test]
async fn test_resume_from_database_file() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path: PathBuf = std::env::temp_dir().join(format!("fission-points-{}.db", nanos));
    let database = format!("sqlite_path = \"{}\"\n        max_connections = 2", path.display());

    {
        let config = IndexerConfig::from_toml(&config_toml(&database, 0)).unwrap();
        let indexer = open_indexer(config).await.unwrap();
        run_to_end(&indexer, &stream()).await.unwrap();
    }

    let config = IndexerConfig::from_toml(&config_toml(&database, 0)).unwrap();
    let indexer = open_indexer(config).await.unwrap();
    assert_eq!(indexer.get_last_processed_height().await, Some(12));

    let replay = header(12, "2024-09-01T00:00:12Z");
    let result = run_to_end(&indexer, &replay).await;
    assert!(matches!(
        result,
        Err(IndexerError::Ledger(LedgerError::BlockOutOfOrder { last: 12, received: 12 }))
    ));

    let points = indexer.get_points_balance("alice").await.unwrap().unwrap();
    assert_eq!(points.balance, BigUint::from(3000u32));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_block_split_across_reads_is_applied_whole() {
    let indexer = open_indexer(in_memory(0)).await.unwrap();
    let mut assembler = BlockAssembler::for_registry(indexer.registry());
    let mint = |index: u32, amount: u32| {
        let amount = format!("{amount}{DENOM}");
        event("tf_mint", 10, index, &[("amount", &amount), ("mint_to_address", "alice")])
    };

    let first = [header(10, "2024-09-01T00:00:00Z"), mint(0, 5)].join("\n");
    let summary = run_stream(&indexer, &mut assembler, first.as_bytes(), EndOfInput::Hold)
        .await
        .unwrap();
    assert_eq!(summary.blocks, 0);
    assert_eq!(summary.pending_height, Some(10));
    assert_eq!(indexer.get_last_processed_height().await, None);

    let second = [mint(1, 7), header(11, "2024-09-01T00:00:06Z")].join("\n");
    let summary = run_stream(&indexer, &mut assembler, second.as_bytes(), EndOfInput::Hold)
        .await
        .unwrap();
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.anomalies, 0);
    assert_eq!(summary.orphaned_deltas, 0);
    assert_eq!(summary.pending_height, Some(11));
    assert_eq!(indexer.get_last_processed_height().await, Some(10));

    let alice = indexer.get_token_balance("alice", DENOM).await.unwrap().unwrap();
    assert_eq!(alice.balance, BigInt::from(12));
    assert_eq!(indexer.get_movements_by_address("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_late_delta_is_reported_not_dropped_silently() {
    let indexer = open_indexer(in_memory(0)).await.unwrap();
    let amount = format!("5{DENOM}");
    let mint = event("tf_mint", 10, 0, &[("amount", &amount), ("mint_to_address", "alice")]);

    let first = [header(10, "2024-09-01T00:00:00Z"), mint].join("\n");
    run_to_end(&indexer, &first).await.unwrap();
    assert_eq!(indexer.get_last_processed_height().await, Some(10));

    // A fresh reader sees the tail of block 10 after it was indexed.
    let late = event("tf_mint", 10, 1, &[("amount", &amount), ("mint_to_address", "alice")]);
    let mut subscriber = indexer.subscribe_events();
    let summary = run_to_end(&indexer, &late).await.unwrap();

    assert_eq!(summary.blocks, 0);
    assert_eq!(summary.orphaned_deltas, 1);
    assert_eq!(summary.anomalies, 1);
    assert_eq!(summary.discarded_events, 0);
    assert!(matches!(
        subscriber.recv().await.unwrap(),
        points_ledger::LedgerEvent::Anomaly(points_ledger::Anomaly::InvalidInput { .. })
    ));

    let alice = indexer.get_token_balance("alice", DENOM).await.unwrap().unwrap();
    assert_eq!(alice.balance, BigInt::from(5));
}
