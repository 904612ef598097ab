// End-to-end pipeline scenarios: row flow, failures, error hops and synchronization

use rowflow_engine::graph::{ErrorHandling, Hop, PartitionMethod, PipelineGraph, StepMeta};
use rowflow_engine::row::{Value, ValueType};
use rowflow_engine::steps::{
    BlockUntilFinishedPlugin, CheckValuePlugin, CollectPlugin, DelayPlugin, DetectLastRowPlugin,
    FieldsChangeSequencePlugin, GenerateField, GeneratePlugin, LookupKey, LookupValue,
    PassThroughPlugin, RowCollector, StreamLookupPlugin, WatchedStep,
};
use rowflow_engine::{
    progress_channel, EngineError, ExecutionEvent, ExecutionState, PipelineExecution,
    WorkerStatus,
};

use std::sync::Arc;
use std::time::Duration;

fn generate(name: &str, limit: u64) -> StepMeta {
    StepMeta::new(
        name,
        Arc::new(
            GeneratePlugin::new(limit)
                .with_sequence("id", 1)
                .with_field(GenerateField::constant("name", ValueType::String, "x")),
        ),
    )
}

fn collect(name: &str) -> (StepMeta, RowCollector) {
    let plugin = CollectPlugin::new();
    let collector = plugin.collector().clone();
    (StepMeta::new(name, Arc::new(plugin)), collector)
}

fn ids(collector: &RowCollector) -> Vec<i64> {
    collector
        .values()
        .iter()
        .filter_map(|row| row.first().and_then(Value::as_integer))
        .collect()
}

async fn run(graph: PipelineGraph) -> rowflow_engine::PipelineResult {
    PipelineExecution::new(Arc::new(graph))
        .execute()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rows_flow_in_order_through_linear_pipeline() {
    let mut g = PipelineGraph::new("linear");
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", 100)).unwrap();
    g.add_step(StepMeta::new("pass", Arc::new(PassThroughPlugin)))
        .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "pass")).unwrap();
    g.add_hop(Hop::new("pass", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(ids(&rows), (1..=100).collect::<Vec<_>>());
    assert!(result.workers.iter().all(|w| w.status == WorkerStatus::Finished));
    assert_eq!(result.worker("gen", 0).unwrap().lines_written, 100);
    for step in ["pass", "sink"] {
        let worker = result.worker(step, 0).unwrap();
        assert_eq!(worker.lines_read, 100, "{}", step);
        assert_eq!(worker.lines_written, 100, "{}", step);
    }
    assert_eq!(result.total_errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_row_failure_fails_worker_and_pipeline() {
    let mut g = PipelineGraph::new("failing");
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", 100)).unwrap();
    g.add_step(StepMeta::new(
        "transform",
        Arc::new(CheckValuePlugin::new("id", vec!["13".to_string()])),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "transform")).unwrap();
    g.add_hop(Hop::new("transform", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Failed);
    let transform = result.worker("transform", 0).unwrap();
    assert_eq!(transform.status, WorkerStatus::Failed);
    assert_eq!(transform.errors, 1);
    assert_eq!(result.total_errors, 1);
    assert_eq!(ids(&rows), (1..=12).collect::<Vec<_>>());
    assert_eq!(result.worker("sink", 0).unwrap().status, WorkerStatus::Finished);
    assert_eq!(result.error_messages.len(), 1);
    assert!(result.error_messages[0].starts_with("transform.0"));
}

fn two_branches(healthy_limit: u64, delay_ms: u64) -> (PipelineGraph, RowCollector) {
    let mut g = PipelineGraph::new("branches");
    g.settings.wait_timeout_ms = 10;
    let (failing_sink, _) = collect("failing_sink");
    let (healthy_sink, healthy) = collect("healthy_sink");

    g.add_step(generate("failing_gen", 100)).unwrap();
    g.add_step(StepMeta::new(
        "check",
        Arc::new(CheckValuePlugin::new("id", vec!["13".to_string()])),
    ))
    .unwrap();
    g.add_step(failing_sink).unwrap();
    g.add_hop(Hop::new("failing_gen", "check")).unwrap();
    g.add_hop(Hop::new("check", "failing_sink")).unwrap();

    g.add_step(generate("healthy_gen", healthy_limit)).unwrap();
    g.add_step(StepMeta::new(
        "slow",
        Arc::new(DelayPlugin::new(Duration::from_millis(delay_ms))),
    ))
    .unwrap();
    g.add_step(healthy_sink).unwrap();
    g.add_hop(Hop::new("healthy_gen", "slow")).unwrap();
    g.add_hop(Hop::new("slow", "healthy_sink")).unwrap();

    (g, healthy)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_leaves_independent_branch_running() {
    let (g, healthy) = two_branches(50, 2);

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.worker("check", 0).unwrap().status, WorkerStatus::Failed);
    assert_eq!(ids(&healthy), (1..=50).collect::<Vec<_>>());
    for step in ["healthy_gen", "slow", "healthy_sink"] {
        assert_eq!(
            result.worker(step, 0).unwrap().status,
            WorkerStatus::Finished,
            "{}",
            step
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_on_failure_stops_every_worker() {
    let (mut g, healthy) = two_branches(1_000_000, 1);
    g.settings.stop_on_failure = true;

    let result = PipelineExecution::new(Arc::new(g))
        .execute()
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.worker("check", 0).unwrap().status, WorkerStatus::Failed);
    for step in ["healthy_gen", "slow", "healthy_sink"] {
        assert_eq!(
            result.worker(step, 0).unwrap().status,
            WorkerStatus::Stopped,
            "{}",
            step
        );
    }
    assert!(result.workers.iter().all(|w| w.status.is_terminal()));
    assert!(healthy.len() < 1_000_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_error_hop_receives_annotated_row() {
    let mut g = PipelineGraph::new("error-hop");
    let (sink, good) = collect("sink");
    let (errors, bad) = collect("errors");

    let mut eh = ErrorHandling::new("errors");
    eh.nr_errors_field = Some("error_count".to_string());
    eh.descriptions_field = Some("error_desc".to_string());
    eh.fields_field = Some("error_field".to_string());
    eh.codes_field = Some("error_code".to_string());

    g.add_step(generate("gen", 100)).unwrap();
    g.add_step(
        StepMeta::new(
            "transform",
            Arc::new(
                CheckValuePlugin::new("id", vec!["13".to_string()])
                    .with_message("unlucky row")
                    .with_code("E13"),
            ),
        )
        .with_error_handling(eh),
    )
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_step(errors).unwrap();
    g.add_hop(Hop::new("gen", "transform")).unwrap();
    g.add_hop(Hop::new("transform", "sink")).unwrap();
    g.add_hop(Hop::error("transform", "errors")).unwrap();

    assert_eq!(
        g.input_schema_of("errors").unwrap().field_names(),
        vec!["id", "name", "error_count", "error_desc", "error_field", "error_code"]
    );

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(good.len(), 99);
    assert!(!ids(&good).contains(&13));
    assert_eq!(
        bad.values(),
        vec![vec![
            Value::Integer(13),
            Value::from("x"),
            Value::Integer(1),
            Value::from("unlucky row"),
            Value::from("id"),
            Value::from("E13"),
        ]]
    );
    let transform = result.worker("transform", 0).unwrap();
    assert_eq!(transform.lines_rejected, 1);
    assert_eq!(transform.errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_errors_fails_the_step() {
    let mut g = PipelineGraph::new("max-errors");
    let (sink, _) = collect("sink");
    let (errors, bad) = collect("errors");
    let mut eh = ErrorHandling::new("errors");
    eh.max_errors = Some(1);

    g.add_step(generate("gen", 10)).unwrap();
    g.add_step(
        StepMeta::new(
            "transform",
            Arc::new(CheckValuePlugin::new(
                "id",
                vec!["2".to_string(), "4".to_string()],
            )),
        )
        .with_error_handling(eh),
    )
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_step(errors).unwrap();
    g.add_hop(Hop::new("gen", "transform")).unwrap();
    g.add_hop(Hop::new("transform", "sink")).unwrap();
    g.add_hop(Hop::error("transform", "errors")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(bad.len(), 1);
    assert!(result.error_messages[0].contains("maximum number of rejected rows"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_block_releases_rows_after_watched_step_finished() {
    let mut g = PipelineGraph::new("blocking");
    g.settings.sync_poll_interval_ms = 10;
    let (sink, rows) = collect("sink");

    g.add_step(generate("a", 10)).unwrap();
    g.add_step(StepMeta::new(
        "block",
        Arc::new(BlockUntilFinishedPlugin::new(vec![WatchedStep::new("slow", 0)])),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_step(generate("b", 5)).unwrap();
    g.add_step(StepMeta::new(
        "slow",
        Arc::new(DelayPlugin::new(Duration::from_millis(30))),
    ))
    .unwrap();
    g.add_hop(Hop::new("a", "block")).unwrap();
    g.add_hop(Hop::new("block", "sink")).unwrap();
    g.add_hop(Hop::new("b", "slow")).unwrap();

    let mut execution = PipelineExecution::new(Arc::new(g));
    execution.prepare().await.unwrap();
    let handle = execution.start().unwrap();
    let result = handle.wait().await;

    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(ids(&rows), (1..=10).collect::<Vec<_>>());

    let board = handle.status_board();
    let slow_finished = board.find("slow", 0).unwrap().finished_at().unwrap();
    let first_row = rows.first_received_at().unwrap();
    assert!(first_row >= slow_finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_block_fails_when_watched_step_fails() {
    let mut g = PipelineGraph::new("blocking-failure");
    g.settings.sync_poll_interval_ms = 10;
    let (sink, rows) = collect("sink");

    g.add_step(generate("a", 10)).unwrap();
    g.add_step(StepMeta::new(
        "block",
        Arc::new(BlockUntilFinishedPlugin::new(vec![WatchedStep::new("check", 0)])),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_step(generate("b", 5)).unwrap();
    g.add_step(StepMeta::new(
        "check",
        Arc::new(CheckValuePlugin::new("id", vec!["2".to_string()])),
    ))
    .unwrap();
    g.add_hop(Hop::new("a", "block")).unwrap();
    g.add_hop(Hop::new("block", "sink")).unwrap();
    g.add_hop(Hop::new("b", "check")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.worker("block", 0).unwrap().status, WorkerStatus::Failed);
    assert!(rows.is_empty());
    assert!(result
        .error_messages
        .iter()
        .any(|m| m.contains("watched step 'check' copy 0 ended FAILED")));
}

#[tokio::test]
async fn test_block_watching_downstream_step_is_rejected() {
    let mut g = PipelineGraph::new("deadlock");
    let (sink, _) = collect("sink");
    g.add_step(generate("a", 1)).unwrap();
    g.add_step(StepMeta::new(
        "block",
        Arc::new(BlockUntilFinishedPlugin::new(vec![WatchedStep::new("sink", 0)])),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("a", "block")).unwrap();
    g.add_hop(Hop::new("block", "sink")).unwrap();

    let err = PipelineExecution::new(Arc::new(g))
        .execute()
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(v) => {
            assert_eq!(v.remarks[0].step.as_deref(), Some("block"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_block_watching_copy_removed_by_override_fails_init() {
    let mut g = PipelineGraph::new("copies");
    let (sink, _) = collect("sink");
    g.add_step(generate("a", 1)).unwrap();
    g.add_step(generate("b", 1).with_copies(2)).unwrap();
    g.add_step(StepMeta::new(
        "block",
        Arc::new(BlockUntilFinishedPlugin::new(vec![WatchedStep::new("b", 1)])),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("a", "block")).unwrap();
    g.add_hop(Hop::new("block", "sink")).unwrap();
    assert!(g.validate().is_ok());

    let mut execution = PipelineExecution::new(Arc::new(g)).with_copies("b", 1);
    match execution.prepare().await.unwrap_err() {
        EngineError::Init(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].step, "block");
            assert!(failures[0].message.contains("has no copy 1"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(execution.state(), ExecutionState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitioned_copies_receive_their_keys() {
    let mut g = PipelineGraph::new("partitioned");
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", 100)).unwrap();
    g.add_step(
        StepMeta::new("split", Arc::new(PassThroughPlugin))
            .with_copies(3)
            .with_partitioning("id", PartitionMethod::Mod),
    )
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "split")).unwrap();
    g.add_hop(Hop::new("split", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    let mut seen = ids(&rows);
    seen.sort_unstable();
    assert_eq!(seen, (1..=100).collect::<Vec<_>>());

    let read: Vec<u64> = (0..3)
        .map(|copy| result.worker("split", copy).unwrap().lines_read)
        .collect();
    assert_eq!(read, vec![33, 34, 33]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_copy_to_every_target_when_not_distributing() {
    let mut g = PipelineGraph::new("fan-out");
    let (left, left_rows) = collect("left");
    let (right, right_rows) = collect("right");
    g.add_step(generate("gen", 20).with_distribute(false)).unwrap();
    g.add_step(left).unwrap();
    g.add_step(right).unwrap();
    g.add_hop(Hop::new("gen", "left")).unwrap();
    g.add_hop(Hop::new("gen", "right")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(left_rows.len(), 20);
    assert_eq!(right_rows.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distribute_round_robins_over_targets() {
    let mut g = PipelineGraph::new("round-robin");
    let (left, left_rows) = collect("left");
    let (right, right_rows) = collect("right");
    g.add_step(generate("gen", 20)).unwrap();
    g.add_step(left).unwrap();
    g.add_step(right).unwrap();
    g.add_hop(Hop::new("gen", "left")).unwrap();
    g.add_hop(Hop::new("gen", "right")).unwrap();

    run(g).await;

    assert_eq!(left_rows.len(), 10);
    assert_eq!(right_rows.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_lookup_joins_info_rows() {
    let mut g = PipelineGraph::new("lookup");
    let (sink, rows) = collect("sink");
    g.add_step(StepMeta::new(
        "main",
        Arc::new(GeneratePlugin::new(5).with_sequence("id", 1)),
    ))
    .unwrap();
    g.add_step(StepMeta::new(
        "ref",
        Arc::new(
            GeneratePlugin::new(3)
                .with_sequence("key", 2)
                .with_field(GenerateField::constant("label", ValueType::String, "found")),
        ),
    ))
    .unwrap();
    g.add_step(StepMeta::new(
        "lookup",
        Arc::new(StreamLookupPlugin {
            lookup_step: "ref".to_string(),
            keys: vec![LookupKey {
                stream_field: "id".to_string(),
                lookup_field: "key".to_string(),
            }],
            values: vec![LookupValue {
                field: "label".to_string(),
                rename: None,
                default: Some("none".to_string()),
            }],
        }),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("main", "lookup")).unwrap();
    g.add_hop(Hop::info("ref", "lookup")).unwrap();
    g.add_hop(Hop::new("lookup", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    let labels: Vec<String> = rows.values().iter().map(|r| r[1].to_string()).collect();
    assert_eq!(labels, vec!["none", "found", "found", "found", "none"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookup_copies_see_every_info_copy() {
    let mut g = PipelineGraph::new("lookup-copies");
    let (sink, rows) = collect("sink");
    g.add_step(StepMeta::new(
        "main",
        Arc::new(GeneratePlugin::new(6).with_sequence("id", 1)),
    ))
    .unwrap();
    g.add_step(StepMeta::new(
        "ref_gen",
        Arc::new(
            GeneratePlugin::new(5)
                .with_sequence("key", 2)
                .with_field(GenerateField::constant("label", ValueType::String, "found")),
        ),
    ))
    .unwrap();
    g.add_step(StepMeta::new("ref", Arc::new(PassThroughPlugin)).with_copies(2))
        .unwrap();
    g.add_step(
        StepMeta::new(
            "lookup",
            Arc::new(StreamLookupPlugin {
                lookup_step: "ref".to_string(),
                keys: vec![LookupKey {
                    stream_field: "id".to_string(),
                    lookup_field: "key".to_string(),
                }],
                values: vec![LookupValue {
                    field: "label".to_string(),
                    rename: None,
                    default: Some("none".to_string()),
                }],
            }),
        )
        .with_copies(2),
    )
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("ref_gen", "ref")).unwrap();
    g.add_hop(Hop::info("ref", "lookup")).unwrap();
    g.add_hop(Hop::new("main", "lookup")).unwrap();
    g.add_hop(Hop::new("lookup", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    let mut labels: Vec<(i64, String)> = rows
        .values()
        .iter()
        .filter_map(|r| r[0].as_integer().map(|id| (id, r[1].to_string())))
        .collect();
    labels.sort();
    let expected: Vec<(i64, String)> = (1..=6)
        .map(|id| (id, if id == 1 { "none" } else { "found" }.to_string()))
        .collect();
    assert_eq!(labels, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequence_and_last_row_flags() {
    let mut g = PipelineGraph::new("flags");
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", 4)).unwrap();
    g.add_step(StepMeta::new(
        "seq",
        Arc::new(FieldsChangeSequencePlugin::new(
            "seq",
            vec!["name".to_string()],
        )),
    ))
    .unwrap();
    g.add_step(StepMeta::new(
        "last",
        Arc::new(DetectLastRowPlugin::new("is_last")),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "seq")).unwrap();
    g.add_hop(Hop::new("seq", "last")).unwrap();
    g.add_hop(Hop::new("last", "sink")).unwrap();

    let result = run(g).await;

    assert_eq!(result.status, ExecutionState::Finished);
    let values = rows.values();
    let seq: Vec<Value> = values.iter().map(|r| r[2].clone()).collect();
    let last: Vec<Value> = values.iter().map(|r| r[3].clone()).collect();
    assert_eq!(seq, (1..=4).map(Value::Integer).collect::<Vec<_>>());
    assert_eq!(
        last,
        vec![
            Value::Boolean(false),
            Value::Boolean(false),
            Value::Boolean(false),
            Value::Boolean(true)
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_events_bracket_the_run() {
    let mut g = PipelineGraph::new("events");
    let (sink, _) = collect("sink");
    g.add_step(generate("gen", 3)).unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "sink")).unwrap();

    let (tx, mut rx) = progress_channel();
    let result = PipelineExecution::new(Arc::new(g))
        .with_progress(tx)
        .execute()
        .await
        .unwrap();
    assert!(result.is_success());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::PipelineStarted { total_workers: 2, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::PipelineCompleted {
            status: ExecutionState::Finished,
            ..
        })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::WorkerCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}
