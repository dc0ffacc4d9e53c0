#![cfg(feature = "test-utils")]

//! End-to-end pipeline tests over scripted sources and the in-memory warehouse.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use siphon::ddl::DdlOutcome;
use siphon::destination::memory::MemoryWarehouse;
use siphon::destination::{ConstraintKind, TableConstraint, TableMeta};
use siphon::error::ErrorKind;
use siphon::pipeline::Pipeline;
use siphon::source::{LogRecord, RowsKind};
use siphon::test_utils::scripted::{ScriptedCompiler, ScriptedConnector, ScriptedItem};
use siphon::types::{Cell, TableRef};
use siphon_config::shared::{FlushConfig, PipelineConfig, SourceConfig, SourceDriverConfig};
use siphon_telemetry::tracing::init_test_tracing;
use uuid::Uuid;

const SID_A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
const SID_B: &str = "b9f4a9c0-81d4-11e1-bc16-c80aa9429562";

fn source(name: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        driver: SourceDriverConfig::Replay {
            path: PathBuf::from("unused.jsonl"),
        },
        position: None,
        idle_timeout_secs: 30,
        reconnect_delay_secs: 0,
        schemas: Vec::new(),
    }
}

fn pipeline_config(sources: Vec<SourceConfig>, max_transactions: usize) -> PipelineConfig {
    PipelineConfig {
        id: 1,
        sources,
        flush: FlushConfig {
            max_transactions,
            max_fill_ms: 600_000,
            idle_tick_ms: 50,
            delete_pack: 5000,
        },
        event_channel_capacity: 128,
    }
}

fn orders_table() -> TableRef {
    TableRef::new("shop", "orders")
}

fn orders_meta() -> TableMeta {
    TableMeta {
        columns: vec!["id".to_string(), "name".to_string()],
        constraints: vec![TableConstraint {
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["id".to_string()],
        }],
        enums: Vec::new(),
    }
}

fn advance(sid: &str, sequence: u64) -> ScriptedItem {
    ScriptedItem::Record(LogRecord::PositionAdvance {
        source_uuid: Uuid::parse_str(sid).unwrap(),
        sequence,
    })
}

fn rows(kind: RowsKind, rows: Vec<Vec<Cell>>) -> ScriptedItem {
    ScriptedItem::Record(LogRecord::Rows { kind, rows })
}

fn row(id: i64, name: &str) -> Vec<Cell> {
    vec![Cell::Int(id), Cell::Text(name.to_string())]
}

/// A full transaction against `shop.orders`: advance, begin, reference, rows, commit.
fn orders_txn(sid: &str, sequence: u64, kind: RowsKind, images: Vec<Vec<Cell>>) -> Vec<ScriptedItem> {
    vec![
        advance(sid, sequence),
        ScriptedItem::Record(LogRecord::Begin),
        ScriptedItem::Record(LogRecord::TableReference {
            table: orders_table(),
        }),
        rows(kind, images),
        ScriptedItem::Record(LogRecord::Commit),
    ]
}

async fn wait_for<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_then_delete_in_one_window_flushes_nothing() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.extend(orders_txn(SID_A, 2, RowsKind::Delete, vec![row(1, "a")]));
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 2),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    // The flush fires once both transactions are staged and commits the position.
    wait_for("position commit", || async {
        warehouse.position("src").await.is_some()
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:1-2").as_str())
    );
    assert!(warehouse.artifacts().await.is_empty());
    assert!(
        warehouse
            .statements()
            .await
            .iter()
            .all(|sql| !sql.starts_with("DELETE")),
        "a cancelled insert/delete pair must not reach the warehouse"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn update_after_flush_issues_keyed_delete_and_bulk_insert() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.extend(orders_txn(
        SID_A,
        2,
        RowsKind::Update,
        vec![row(1, "a"), row(1, "b")],
    ));
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 1),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    wait_for("both flushes", || async {
        warehouse.artifacts().await.len() == 2
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    let deletes: Vec<String> = warehouse
        .statements()
        .await
        .into_iter()
        .filter(|sql| sql.starts_with("DELETE"))
        .collect();
    assert_eq!(
        deletes,
        vec!["DELETE FROM \"shop\".\"orders\" WHERE \"id\" IN (1)".to_string()]
    );

    let artifacts = warehouse.artifacts().await;
    assert!(artifacts[0].1.contains("\"1\",\"a\""));
    assert!(artifacts[1].1.contains("\"1\",\"b\""));
    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:1-2").as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn interleaved_sources_converge_with_independent_positions() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script_a = orders_txn(SID_A, 10, RowsKind::Insert, vec![row(1, "from-a")]);
    script_a.push(ScriptedItem::Hang);
    connector.push_script("alpha", script_a).await;

    let mut script_b = orders_txn(SID_B, 20, RowsKind::Insert, vec![row(2, "from-b")]);
    script_b.push(ScriptedItem::Hang);
    connector.push_script("beta", script_b).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("alpha"), source("beta")], 2),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    wait_for("both positions", || async {
        warehouse.position("alpha").await.is_some() && warehouse.position("beta").await.is_some()
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    // Whatever order the two sources were merged in, both rows land and each source
    // keeps its own position.
    assert_eq!(
        warehouse.position("alpha").await.as_deref(),
        Some(format!("{SID_A}:10-10").as_str())
    );
    assert_eq!(
        warehouse.position("beta").await.as_deref(),
        Some(format!("{SID_B}:20-20").as_str())
    );

    let loaded: String = warehouse
        .artifacts()
        .await
        .into_iter()
        .map(|(_, artifact)| artifact)
        .collect();
    assert!(loaded.contains("\"1\",\"from-a\""));
    assert!(loaded.contains("\"2\",\"from-b\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_flush_leaves_durable_positions_untouched() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;
    warehouse.fail_next_commit().await;

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 1),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

    assert_eq!(warehouse.position("src").await, None);
    assert!(warehouse.artifacts().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_flushes_staged_work() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        // Threshold far above one transaction: only shutdown can flush this.
        pipeline_config(vec![source("src")], 100),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    let inspect = pipeline.inspect_handle();
    wait_for("transaction staged", || async {
        inspect.snapshot().await.staged_transactions == 1
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:1-1").as_str())
    );
    assert_eq!(warehouse.artifacts().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_review_blocks_the_pipeline_until_skip() {
    init_test_tracing();

    let statement = "ALTER TABLE orders CHANGE name label varchar(64)";

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script = vec![
        advance(SID_A, 5),
        ScriptedItem::Record(LogRecord::Statement {
            schema: "shop".to_string(),
            query: statement.to_string(),
        }),
    ];
    script.extend(orders_txn(SID_A, 6, RowsKind::Insert, vec![row(1, "a")]));
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let compiler = ScriptedCompiler::new().with(statement, DdlOutcome::ManualReview);

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 1),
        connector,
        compiler,
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    let skip = pipeline.skip_handle();
    wait_for("statement parked for review", || async {
        skip.pending().await.is_some()
    })
    .await;

    // While blocked, nothing moves: no position, no artifacts.
    assert_eq!(warehouse.position("src").await, None);
    assert!(warehouse.artifacts().await.is_empty());

    let skipped = skip.skip().await;
    assert_eq!(skipped.as_deref(), Some(statement));

    // After the skip the position advances and the queued transaction flushes.
    wait_for("pipeline resumed", || async {
        warehouse.artifacts().await.len() == 1
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:5-6").as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn noop_schema_statement_advances_position_without_flush() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();

    let connector = ScriptedConnector::new();
    let script = vec![
        advance(SID_A, 3),
        ScriptedItem::Record(LogRecord::Statement {
            schema: "shop".to_string(),
            query: "GRANT SELECT ON shop.* TO 'reporting'@'%'".to_string(),
        }),
        ScriptedItem::Hang,
    ];
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 100),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    wait_for("schema position persisted", || async {
        warehouse.position("src").await.is_some()
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:3-3").as_str())
    );
    assert!(warehouse.artifacts().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn applied_schema_change_invalidates_the_table_cache() {
    init_test_tracing();

    let statement = "ALTER TABLE orders ADD COLUMN note text";
    let compiled = "ALTER TABLE \"shop\".\"orders\" ADD COLUMN \"note\" text";

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.push(advance(SID_A, 2));
    script.push(ScriptedItem::Record(LogRecord::Statement {
        schema: "shop".to_string(),
        query: statement.to_string(),
    }));
    script.extend(orders_txn(SID_A, 3, RowsKind::Insert, vec![row(2, "b")]));
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let compiler = ScriptedCompiler::new().with(
        statement,
        DdlOutcome::Applied {
            statements: vec![compiled.to_string()],
            invalidates: vec![orders_table()],
        },
    );

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 1),
        connector,
        compiler,
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    wait_for("second flush", || async {
        warehouse.artifacts().await.len() == 2
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert!(
        warehouse
            .statements()
            .await
            .iter()
            .any(|sql| sql == compiled),
        "the compiled schema statement must reach the warehouse"
    );
    // The cache was rebuilt after invalidation: catalog metadata was fetched twice.
    assert_eq!(warehouse.meta_fetches(&orders_table()).await, 2);
    assert_eq!(
        warehouse.position("src").await.as_deref(),
        Some(format!("{SID_A}:1-3").as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_resumes_from_the_committed_position() {
    init_test_tracing();

    let warehouse = MemoryWarehouse::new();
    warehouse.set_table_meta(orders_table(), orders_meta()).await;

    let connector = ScriptedConnector::new();
    let mut first = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    first.push(ScriptedItem::Hang);
    connector.push_script("src", first).await;
    connector.push_script("src", vec![ScriptedItem::Hang]).await;

    let mut short_lived = source("src");
    short_lived.idle_timeout_secs = 1;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![short_lived], 1),
        connector.clone(),
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    wait_for("reconnect", || async {
        connector.connects().await.len() == 2
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    let connects = connector.connects().await;
    assert_eq!(connects[0], ("src".to_string(), String::new()));
    assert_eq!(
        connects[1],
        ("src".to_string(), format!("{SID_A}:1-1"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_destination_table_is_fatal() {
    init_test_tracing();

    // No scripted metadata: the table does not exist at the destination.
    let warehouse = MemoryWarehouse::new();

    let connector = ScriptedConnector::new();
    let mut script = orders_txn(SID_A, 1, RowsKind::Insert, vec![row(1, "a")]);
    script.push(ScriptedItem::Hang);
    connector.push_script("src", script).await;

    let mut pipeline = Pipeline::new(
        1,
        pipeline_config(vec![source("src")], 1),
        connector,
        ScriptedCompiler::new(),
        warehouse.clone(),
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationTableMissing);
}
