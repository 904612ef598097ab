// Lifecycle scenarios: stop, pause, safe stop, initialization failures and panics

use async_trait::async_trait;
use rowflow_engine::graph::{Hop, PipelineGraph, StepMeta};
use rowflow_engine::row::ValueType;
use rowflow_engine::steps::{
    CollectPlugin, DelayPlugin, GenerateField, GeneratePlugin, RowCollector, StepPlugin,
    TextField, TextFileInputPlugin, TextFileOutputPlugin,
};
use rowflow_engine::{
    EngineError, ExecutionState, InitContext, LocalVfs, PipelineExecution, StepError, StepIo,
    StepWorker, WorkerStatus,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pass-through step whose init and processing can be told to misbehave
#[derive(Debug, Clone, Default)]
struct ProbePlugin {
    fail_init: bool,
    panic_on_row: bool,
    disposed: Arc<AtomicUsize>,
}

impl StepPlugin for ProbePlugin {
    fn kind(&self) -> &'static str {
        "probe"
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(ProbeWorker {
            plugin: self.clone(),
        })
    }

    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

struct ProbeWorker {
    plugin: ProbePlugin,
}

#[async_trait]
impl StepWorker for ProbeWorker {
    async fn init(&mut self, _ctx: &InitContext<'_>) -> Result<(), StepError> {
        if self.plugin.fail_init {
            return Err(StepError::config("probe refused to start"));
        }
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        match io.get_row().await? {
            Some(row) => {
                if self.plugin.panic_on_row {
                    panic!("probe blew up");
                }
                io.put_row(row).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn dispose(&mut self, _io: &mut StepIo) {
        self.plugin.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

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

fn slow_pipeline(limit: u64, delay_ms: u64) -> (PipelineGraph, RowCollector) {
    let mut g = PipelineGraph::new("slow");
    g.settings.wait_timeout_ms = 10;
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", limit)).unwrap();
    g.add_step(StepMeta::new(
        "delay",
        Arc::new(DelayPlugin::new(Duration::from_millis(delay_ms))),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "delay")).unwrap();
    g.add_hop(Hop::new("delay", "sink")).unwrap();
    (g, rows)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_all_ends_every_worker_stopped() {
    let (g, rows) = slow_pipeline(1_000_000, 1);
    let mut execution = PipelineExecution::new(Arc::new(g));
    execution.prepare().await.unwrap();
    let handle = execution.start().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop_all();

    let result = handle
        .wait_timeout(Duration::from_secs(5))
        .await
        .expect("pipeline did not stop in time");

    assert_eq!(result.status, ExecutionState::Stopped);
    assert!(result.workers.iter().all(|w| w.status == WorkerStatus::Stopped));
    assert!(rows.len() < 1_000_000);
    assert_eq!(handle.state(), ExecutionState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_halts_rows_until_resumed() {
    let (g, rows) = slow_pipeline(40, 5);
    let mut execution = PipelineExecution::new(Arc::new(g));
    execution.prepare().await.unwrap();
    let handle = execution.start().unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(handle.pause());
    assert_eq!(handle.state(), ExecutionState::Paused);
    assert!(!handle.pause());

    // let in-flight rows settle
    tokio::time::sleep(Duration::from_millis(100)).await;
    let paused_at = rows.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rows.len(), paused_at);
    assert!(paused_at < 40);

    assert!(handle.resume());
    let result = handle.wait().await;
    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(rows.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_safe_stop_drains_buffered_rows() {
    let (mut g, rows) = slow_pipeline(1_000_000, 1);
    g.settings.row_set_size = 50;
    let mut execution = PipelineExecution::new(Arc::new(g));
    execution.prepare().await.unwrap();
    let handle = execution.start().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.safe_stop();

    let result = handle
        .wait_timeout(Duration::from_secs(60))
        .await
        .expect("pipeline did not drain in time");

    assert_eq!(result.status, ExecutionState::Finished);
    assert!(result.safe_stopped);
    let written = result.worker("gen", 0).unwrap().lines_written as usize;
    assert!(written < 1_000_000);
    assert_eq!(rows.len(), written);
}

#[tokio::test]
async fn test_init_failure_disposes_initialized_workers() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let probe = |fail_init| ProbePlugin {
        fail_init,
        panic_on_row: false,
        disposed: Arc::clone(&disposed),
    };

    let mut g = PipelineGraph::new("init");
    g.add_step(generate("gen", 10)).unwrap();
    g.add_step(StepMeta::new("a", Arc::new(probe(false)))).unwrap();
    g.add_step(StepMeta::new("b", Arc::new(probe(true)))).unwrap();
    g.add_step(StepMeta::new("c", Arc::new(probe(false)))).unwrap();
    g.add_hop(Hop::new("gen", "a")).unwrap();
    g.add_hop(Hop::new("a", "b")).unwrap();
    g.add_hop(Hop::new("b", "c")).unwrap();

    let mut execution = PipelineExecution::new(Arc::new(g));
    let err = execution.prepare().await.unwrap_err();

    match &err {
        EngineError::Init(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].step, "b");
            assert!(failures[0].message.contains("probe refused"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert_eq!(execution.state(), ExecutionState::Failed);
    assert_eq!(
        execution.status_board().find("b", 0).unwrap().status(),
        WorkerStatus::Failed
    );
    assert!(matches!(
        execution.start(),
        Err(EngineError::InvalidState { action: "start", .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_worker_fails_only_its_copy() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut g = PipelineGraph::new("panic");
    let (sink, rows) = collect("sink");
    g.add_step(generate("gen", 10)).unwrap();
    g.add_step(StepMeta::new(
        "probe",
        Arc::new(ProbePlugin {
            panic_on_row: true,
            disposed: Arc::clone(&disposed),
            ..Default::default()
        }),
    ))
    .unwrap();
    g.add_step(sink).unwrap();
    g.add_hop(Hop::new("gen", "probe")).unwrap();
    g.add_hop(Hop::new("probe", "sink")).unwrap();

    let result = PipelineExecution::new(Arc::new(g))
        .execute()
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionState::Failed);
    assert_eq!(result.worker("probe", 0).unwrap().status, WorkerStatus::Failed);
    assert_eq!(result.worker("sink", 0).unwrap().status, WorkerStatus::Finished);
    assert!(rows.is_empty());

    // the panicking copy is still disposed
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(result.worker("probe", 0).unwrap().errors, 1);
    assert!(result
        .error_messages
        .iter()
        .any(|m| m.contains("worker panicked: probe blew up")));
}

#[tokio::test]
async fn test_prepare_twice_is_rejected() {
    let (g, _) = slow_pipeline(1, 0);
    let mut execution = PipelineExecution::new(Arc::new(g));
    execution.prepare().await.unwrap();
    assert!(matches!(
        execution.prepare().await,
        Err(EngineError::InvalidState { action: "prepare", .. })
    ));
    execution.abort().await.unwrap();
    assert_eq!(execution.state(), ExecutionState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_text_files_through_vfs() {
    let dir = tempfile::tempdir().unwrap();
    let vfs = Arc::new(LocalVfs::with_root(dir.path()));

    let mut writer = PipelineGraph::new("write");
    writer.add_step(generate("gen", 3)).unwrap();
    writer
        .add_step(StepMeta::new(
            "out",
            Arc::new(TextFileOutputPlugin::new("data/rows.txt")),
        ))
        .unwrap();
    writer.add_hop(Hop::new("gen", "out")).unwrap();
    let result = PipelineExecution::new(Arc::new(writer))
        .with_vfs(vfs.clone())
        .execute()
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(result.worker("out", 0).unwrap().lines_output, 3);

    let text = std::fs::read_to_string(dir.path().join("data/rows.txt")).unwrap();
    assert_eq!(text, "id;name\n1;x\n2;x\n3;x\n");

    let mut reader = PipelineGraph::new("read");
    let (sink, rows) = collect("sink");
    reader
        .add_step(StepMeta::new(
            "in",
            Arc::new(
                TextFileInputPlugin::new(
                    "data/rows.txt",
                    vec![
                        TextField::new("id", ValueType::Integer),
                        TextField::new("name", ValueType::String),
                    ],
                )
                .with_header(true),
            ),
        ))
        .unwrap();
    reader.add_step(sink).unwrap();
    reader.add_hop(Hop::new("in", "sink")).unwrap();
    let result = PipelineExecution::new(Arc::new(reader))
        .with_vfs(vfs)
        .execute()
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionState::Finished);
    assert_eq!(result.worker("in", 0).unwrap().lines_input, 3);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.values()[2][0], rowflow_engine::Value::Integer(3));
}
