// Execution Coordinator
// Prepares, wires, launches and monitors the workers of one pipeline run

use super::control::ExecutionControl;
use super::events::{EventSender, ExecutionEvent, ProgressSender};
use super::result::PipelineResult;
use super::rowset::{row_set, RowReceiver, RowSetMeta};
use super::status::{StatusBoard, WorkerStatus};
use super::worker::{InitContext, OutputTarget, PartitionRoute, StepIo, StepWorker};
use crate::config::ExecutionConfig;
use crate::error::{EngineError, EngineResult, InitFailure, StepError};
use crate::graph::{CheckRemark, HopKind, PipelineGraph, StepMeta, ValidationError};
use crate::row::{name_key, RowSchema};
use crate::vfs::{LocalVfs, Vfs};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Lifecycle of one pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    NotPrepared,
    Preparing,
    Ready,
    Running,
    Paused,
    Finished,
    Stopped,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Finished | ExecutionState::Stopped | ExecutionState::Failed
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::NotPrepared => "NOT_PREPARED",
            ExecutionState::Preparing => "PREPARING",
            ExecutionState::Ready => "READY",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Paused => "PAUSED",
            ExecutionState::Finished => "FINISHED",
            ExecutionState::Stopped => "STOPPED",
            ExecutionState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// A worker copy ready to run
struct PreparedWorker {
    step: String,
    copy: usize,
    worker: Box<dyn StepWorker>,
    io: StepIo,
}

/// How a worker copy ended
struct WorkerOutcome {
    step: String,
    copy: usize,
    status: WorkerStatus,
    error: Option<String>,
}

/// Resolved schemas of one step
struct StepSchemas {
    input: RowSchema,
    output: RowSchema,
    info: Vec<(String, RowSchema)>,
}

/// State shared between the execution, its handles and the monitor task
#[derive(Debug)]
struct Shared {
    pipeline: String,
    state: watch::Sender<ExecutionState>,
    result: watch::Sender<Option<PipelineResult>>,
    control: ExecutionControl,
    board: Mutex<Arc<StatusBoard>>,
}

impl Shared {
    fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ExecutionState) {
        self.state.send_replace(state);
    }

    /// Result built from the live status board, for runs that never published one
    fn partial_result(&self) -> PipelineResult {
        let board = self.board();
        PipelineResult {
            pipeline_name: self.pipeline.clone(),
            status: self.state(),
            workers: board.snapshot(),
            total_errors: board.total_errors(),
            error_messages: Vec::new(),
            duration: Duration::ZERO,
            safe_stopped: self.control.is_safe_stopping(),
        }
    }

    fn board(&self) -> Arc<StatusBoard> {
        let guard = self
            .board
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&guard)
    }
}

/// One execution of a pipeline graph
pub struct PipelineExecution {
    graph: Arc<PipelineGraph>,
    config: ExecutionConfig,
    vfs: Arc<dyn Vfs>,
    event_tx: Option<ProgressSender>,
    copy_overrides: HashMap<String, usize>,
    workers: Vec<PreparedWorker>,
    shared: Arc<Shared>,
}

impl PipelineExecution {
    /// Create an execution using the graph's own settings
    pub fn new(graph: Arc<PipelineGraph>) -> Self {
        let (state, _) = watch::channel(ExecutionState::NotPrepared);
        let (result, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            pipeline: graph.name.clone(),
            state,
            result,
            control: ExecutionControl::new(),
            board: Mutex::new(Arc::new(StatusBoard::new())),
        });
        Self {
            config: graph.settings.clone(),
            graph,
            vfs: Arc::new(LocalVfs::new()),
            event_tx: None,
            copy_overrides: HashMap::new(),
            workers: Vec::new(),
            shared,
        }
    }

    /// Set execution configuration
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the file system used by file-based steps
    pub fn with_vfs(mut self, vfs: Arc<dyn Vfs>) -> Self {
        self.vfs = vfs;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run `copies` copies of `step` instead of the number stored on the graph
    pub fn with_copies(mut self, step: &str, copies: usize) -> Self {
        self.copy_overrides.insert(name_key(step), copies.max(1));
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    pub fn graph(&self) -> &Arc<PipelineGraph> {
        &self.graph
    }

    /// Status of every worker; empty until prepared
    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.shared.board()
    }

    fn copies_of(&self, step: &StepMeta) -> usize {
        self.copy_overrides
            .get(&name_key(&step.name))
            .copied()
            .unwrap_or(step.copies)
            .max(1)
    }

    /// Validate the graph, wire every worker copy and initialize them
    ///
    /// Either every worker initializes or none is kept: on any failure the
    /// initialized ones are disposed and the execution ends up `Failed`.
    pub async fn prepare(&mut self) -> EngineResult<()> {
        let state = self.state();
        if state != ExecutionState::NotPrepared {
            return Err(EngineError::InvalidState {
                action: "prepare",
                state,
            });
        }
        self.shared.set_state(ExecutionState::Preparing);

        match self.build_workers().await {
            Ok(workers) => {
                debug!(pipeline = %self.graph.name, workers = workers.len(), "pipeline prepared");
                self.workers = workers;
                self.shared.set_state(ExecutionState::Ready);
                Ok(())
            }
            Err(e) => {
                let next = match e {
                    EngineError::Init(_) => ExecutionState::Failed,
                    _ => ExecutionState::NotPrepared,
                };
                self.shared.set_state(next);
                Err(e)
            }
        }
    }

    async fn build_workers(&mut self) -> EngineResult<Vec<PreparedWorker>> {
        let graph = Arc::clone(&self.graph);

        let warnings = graph.validate()?;
        for remark in &warnings {
            warn!(pipeline = %graph.name, step = ?remark.step, "{}", remark.message);
        }

        let order = graph.natural_order();
        let mut schemas: HashMap<String, StepSchemas> = HashMap::new();
        for name in &order {
            schemas.insert(
                name_key(name),
                StepSchemas {
                    input: graph.input_schema_of(name)?,
                    output: graph.schema_of(name, None)?,
                    info: graph.info_schemas_of(name)?,
                },
            );
        }

        let mut board = StatusBoard::new();
        let mut ios: HashMap<(String, usize), StepIo> = HashMap::new();
        for name in &order {
            let step = graph.require_step(name)?;
            let step_schemas = schemas
                .get(&name_key(name))
                .ok_or_else(|| EngineError::NotFound(name.clone()))?;
            let input_step = graph.predecessors(name, false).is_empty();
            for copy in 0..self.copies_of(step) {
                let status = board.register(&step.name, copy);
                ios.insert(
                    (name_key(name), copy),
                    StepIo {
                        step: step.name.clone(),
                        copy,
                        inputs: Vec::new(),
                        next_input: 0,
                        info_inputs: Vec::new(),
                        outputs: Vec::new(),
                        next_output: 0,
                        error_output: None,
                        distribute: step.distribute,
                        error_handling: step.active_error_handling().cloned(),
                        rejected: 0,
                        input_schema: step_schemas.input.clone(),
                        output_schema: step_schemas.output.clone(),
                        status,
                        board: Arc::new(StatusBoard::new()),
                        control: self.shared.control.clone(),
                        vfs: Arc::clone(&self.vfs),
                        config: self.config.clone(),
                        events: self.event_tx.clone(),
                        input_step,
                    },
                );
            }
        }

        self.wire_row_sets(&graph, &mut ios)?;

        let board = Arc::new(board);
        for io in ios.values_mut() {
            io.board = Arc::clone(&board);
        }
        *self
            .shared
            .board
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::clone(&board);

        let mut workers = Vec::new();
        let mut failures = Vec::new();
        for name in &order {
            let step = graph.require_step(name)?;
            let step_schemas = schemas
                .get(&name_key(name))
                .ok_or_else(|| EngineError::NotFound(name.clone()))?;
            for copy in 0..self.copies_of(step) {
                let Some(io) = ios.remove(&(name_key(name), copy)) else {
                    continue;
                };
                let mut worker = step.plugin.create_worker(copy);
                let ctx = InitContext {
                    step,
                    copy,
                    graph: &graph,
                    input_schema: &step_schemas.input,
                    output_schema: &step_schemas.output,
                    info_schemas: &step_schemas.info,
                    status: &board,
                    vfs: &self.vfs,
                    config: &self.config,
                };
                match worker.init(&ctx).await {
                    Ok(()) => workers.push(PreparedWorker {
                        step: step.name.clone(),
                        copy,
                        worker,
                        io,
                    }),
                    Err(e) => {
                        error!(step = %step.name, copy, "initialization failed: {}", e);
                        io.status.finish(WorkerStatus::Failed);
                        failures.push(InitFailure {
                            step: step.name.clone(),
                            copy,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if !failures.is_empty() {
            for mut prepared in workers {
                prepared.io.set_output_done();
                prepared.worker.dispose(&mut prepared.io).await;
                prepared.io.status.finish(WorkerStatus::Stopped);
            }
            return Err(EngineError::Init(failures));
        }

        Ok(workers)
    }

    /// One row set per (producer copy, consumer copy) of every enabled hop
    fn wire_row_sets(
        &self,
        graph: &PipelineGraph,
        ios: &mut HashMap<(String, usize), StepIo>,
    ) -> EngineResult<()> {
        for hop in graph.natural_hop_order().into_iter().filter(|h| h.enabled) {
            let from = graph.require_step(&hop.from)?;
            let to = graph.require_step(&hop.to)?;
            let from_copies = self.copies_of(from);
            let to_copies = self.copies_of(to);

            if hop.kind == HopKind::Error && !from.is_sending_error_rows_to(&to.name) {
                continue;
            }

            let partition = match (&to.partitioning, to_copies > 1) {
                (Some(p), true) => {
                    let schema = graph.schema_of(&from.name, Some(&to.name))?;
                    let field_index = schema.index_of(&p.field).ok_or_else(|| {
                        ValidationError::single(CheckRemark::error(
                            Some(&to.name),
                            format!("partitioning field '{}' is not in the input rows", p.field),
                        ))
                    })?;
                    Some(PartitionRoute {
                        field_index,
                        method: p.method,
                    })
                }
                _ => None,
            };

            // info targets read every producer copy, so only main and error hops pair 1:1
            let one_to_one = from_copies == to_copies
                && !to.is_partitioned()
                && hop.kind != HopKind::Info;
            let pairs: Vec<(usize, usize)> = if one_to_one {
                (0..from_copies).map(|i| (i, i)).collect()
            } else {
                (0..from_copies)
                    .flat_map(|i| (0..to_copies).map(move |j| (i, j)))
                    .collect()
            };

            let mut receivers: Vec<(usize, RowReceiver)> = Vec::new();
            for from_copy in 0..from_copies {
                let producer = ios
                    .get_mut(&(name_key(&from.name), from_copy))
                    .ok_or_else(|| EngineError::NotFound(format!("{}.{}", from.name, from_copy)))?;
                let mut target = OutputTarget::new(to.name.clone(), hop.kind);
                target.partition = partition;

                for &(_, to_copy) in pairs.iter().filter(|(i, _)| *i == from_copy) {
                    let meta = RowSetMeta {
                        origin_step: from.name.clone(),
                        origin_copy: from_copy,
                        target_step: to.name.clone(),
                        target_copy: to_copy,
                        kind: hop.kind,
                    };
                    debug!(rowset = %meta, kind = %hop.kind, "allocating row set");
                    let (tx, rx) = row_set(meta, self.config.row_set_size);
                    target.senders.push(tx);
                    receivers.push((to_copy, rx));
                }

                if hop.kind == HopKind::Error {
                    producer.error_output = Some(target);
                } else {
                    producer.outputs.push(target);
                }
            }

            for (to_copy, rx) in receivers {
                let consumer = ios
                    .get_mut(&(name_key(&to.name), to_copy))
                    .ok_or_else(|| EngineError::NotFound(format!("{}.{}", to.name, to_copy)))?;
                if hop.kind == HopKind::Info {
                    consumer.info_inputs.push((from.name.clone(), rx));
                } else {
                    consumer.inputs.push(rx);
                }
            }
        }
        Ok(())
    }

    /// Launch every prepared worker and return a handle to the running pipeline
    pub fn start(&mut self) -> EngineResult<ExecutionHandle> {
        let state = self.state();
        if state != ExecutionState::Ready {
            return Err(EngineError::InvalidState {
                action: "start",
                state,
            });
        }

        let workers = std::mem::take(&mut self.workers);
        let started = Instant::now();
        self.shared.set_state(ExecutionState::Running);

        info!(pipeline = %self.graph.name, workers = workers.len(), "pipeline started");
        self.event_tx.send_event(ExecutionEvent::pipeline_started(
            &self.graph.name,
            workers.len(),
        ));

        let mut join_set = JoinSet::new();
        for prepared in workers {
            let control = self.shared.control.clone();
            let events = self.event_tx.clone();
            join_set.spawn(supervise(prepared, control, events));
        }

        tokio::spawn(monitor(
            join_set,
            Arc::clone(&self.shared),
            self.config.clone(),
            self.event_tx.clone(),
            started,
        ));

        Ok(ExecutionHandle {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Cancel a prepared execution without running it; workers are disposed
    pub async fn abort(&mut self) -> EngineResult<()> {
        let state = self.state();
        if state != ExecutionState::Ready {
            return Err(EngineError::InvalidState {
                action: "abort",
                state,
            });
        }
        self.shared.control.stop_all();
        for mut prepared in std::mem::take(&mut self.workers) {
            prepared.io.set_output_done();
            prepared.worker.dispose(&mut prepared.io).await;
            prepared.io.status.finish(WorkerStatus::Stopped);
        }
        self.shared.set_state(ExecutionState::Stopped);
        Ok(())
    }

    /// Prepare, start and wait for the pipeline to end
    pub async fn execute(mut self) -> EngineResult<PipelineResult> {
        self.prepare().await?;
        let handle = self.start()?;
        Ok(handle.wait().await)
    }
}

/// Control surface of a running pipeline; cheap to clone
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    shared: Arc<Shared>,
}

impl ExecutionHandle {
    pub fn pipeline_name(&self) -> &str {
        &self.shared.pipeline
    }

    pub fn state(&self) -> ExecutionState {
        self.shared.state()
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.shared.board()
    }

    /// Pause a running pipeline; workers finish their current row first
    pub fn pause(&self) -> bool {
        let changed = self.shared.state.send_if_modified(|state| {
            if *state == ExecutionState::Running {
                *state = ExecutionState::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            self.shared.control.set_paused(true);
        }
        changed
    }

    pub fn resume(&self) -> bool {
        let changed = self.shared.state.send_if_modified(|state| {
            if *state == ExecutionState::Paused {
                *state = ExecutionState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            self.shared.control.set_paused(false);
        }
        changed
    }

    /// Ask every worker to stop; blocked queue operations notice within one wait interval
    pub fn stop_all(&self) {
        info!(pipeline = %self.shared.pipeline, "stop requested");
        self.shared.control.stop_all();
    }

    /// Ask input steps to stop reading and let buffered rows drain
    pub fn safe_stop(&self) {
        info!(pipeline = %self.shared.pipeline, "safe stop requested");
        self.shared.control.safe_stop();
    }

    /// Wait until every worker reached a terminal status
    pub async fn wait(&self) -> PipelineResult {
        let mut rx = self.shared.result.subscribe();
        if let Ok(result) = rx.wait_for(|result| result.is_some()).await {
            if let Some(result) = &*result {
                return result.clone();
            }
        }
        self.shared.partial_result()
    }

    /// Like `wait`, giving up after `timeout`
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<PipelineResult> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// Run a worker copy in its own task so a panic only fails that copy
async fn supervise(
    prepared: PreparedWorker,
    control: ExecutionControl,
    events: Option<ProgressSender>,
) -> WorkerOutcome {
    let step = prepared.step.clone();
    let copy = prepared.copy;
    let writer = prepared.io.status.clone();

    match tokio::spawn(run_worker(prepared, control, events.clone())).await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            writer.inc_errors();
            writer.finish(WorkerStatus::Failed);
            error!(step = %step, copy, "worker task ended abnormally: {}", join_error);
            let message = format!("{}.{}: worker panicked", step, copy);
            events.send_event(ExecutionEvent::execution_error(
                message.clone(),
                Some(step.clone()),
                Some(copy),
            ));
            WorkerOutcome {
                step,
                copy,
                status: WorkerStatus::Failed,
                error: Some(message),
            }
        }
    }
}

/// Turns a panic while polling the inner future into an error message
struct CatchPanic<F>(F);

impl<F: Future + Unpin> Future for CatchPanic<F> {
    type Output = Result<F::Output, String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.get_mut().0;
        match panic::catch_unwind(AssertUnwindSafe(|| Pin::new(&mut *inner).poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Run one worker copy through its lifecycle
///
/// A panic inside `process_batch` fails the copy like any other error, so
/// `dispose` still runs. Panics elsewhere are caught by `supervise`.
async fn run_worker(
    prepared: PreparedWorker,
    control: ExecutionControl,
    events: Option<ProgressSender>,
) -> WorkerOutcome {
    let PreparedWorker {
        step,
        copy,
        mut worker,
        mut io,
    } = prepared;

    io.status.mark_started();
    debug!(step = %step, copy, "worker started");
    events.send_event(ExecutionEvent::worker_started(&step, copy));

    let mut failure: Option<StepError> = None;
    let mut exhausted = false;

    loop {
        if control.is_stopped() {
            break;
        }
        if control.is_paused() {
            io.status.set_status(WorkerStatus::Paused);
            control.wait_while_paused().await;
            io.status.set_status(WorkerStatus::Running);
            continue;
        }
        if io.is_input_step() && control.is_safe_stopping() {
            debug!(step = %step, copy, "safe stop: no more input");
            break;
        }

        let batch = match CatchPanic(worker.process_batch(&mut io)).await {
            Ok(batch) => batch,
            Err(message) => Err(StepError::Panicked(message)),
        };
        match batch {
            Ok(true) => {}
            Ok(false) => {
                exhausted = true;
                break;
            }
            Err(StepError::Stopped) => break,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let status = if failure.is_some() {
        WorkerStatus::Failed
    } else if exhausted || !control.is_stopped() {
        WorkerStatus::Finished
    } else {
        WorkerStatus::Stopped
    };

    let error = failure.map(|e| {
        let message = format!("{}.{}: {}", step, copy, e);
        io.status.inc_errors();
        error!(step = %step, copy, "worker failed: {}", e);
        events.send_event(ExecutionEvent::execution_error(
            message.clone(),
            Some(step.clone()),
            Some(copy),
        ));
        message
    });

    io.set_output_done();
    io.close_inputs();
    worker.dispose(&mut io).await;
    io.status.finish(status);

    if let Some(view) = io.board.find(&step, copy) {
        events.send_event(ExecutionEvent::worker_completed(view.snapshot()));
    }
    debug!(step = %step, copy, %status, "worker ended");

    WorkerOutcome {
        step,
        copy,
        status,
        error,
    }
}

/// Collect worker outcomes, apply the stop-on-failure policy and publish the result
async fn monitor(
    mut join_set: JoinSet<WorkerOutcome>,
    shared: Arc<Shared>,
    config: ExecutionConfig,
    events: Option<ProgressSender>,
    started: Instant,
) {
    let mut statuses: Vec<WorkerStatus> = Vec::new();
    let mut error_messages: Vec<String> = Vec::new();

    while let Some(joined) = join_set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(pipeline = %shared.pipeline, "supervisor task ended abnormally: {}", join_error);
                continue;
            }
        };

        if outcome.status == WorkerStatus::Failed && config.stop_on_failure {
            warn!(step = %outcome.step, copy = outcome.copy, "stopping pipeline after failure");
            shared.control.stop_all();
        }
        if let Some(message) = outcome.error {
            if error_messages.len() < config.max_error_messages {
                error_messages.push(message);
            }
        }
        statuses.push(outcome.status);
    }

    let board = shared.board();
    let total_errors = board.total_errors();
    let status = if statuses.contains(&WorkerStatus::Failed) {
        ExecutionState::Failed
    } else if statuses.contains(&WorkerStatus::Stopped) {
        ExecutionState::Stopped
    } else {
        ExecutionState::Finished
    };
    let duration = started.elapsed();

    info!(pipeline = %shared.pipeline, %status, errors = total_errors, "pipeline ended");
    events.send_event(ExecutionEvent::pipeline_completed(
        &shared.pipeline,
        status,
        duration,
    ));

    let result = PipelineResult {
        pipeline_name: shared.pipeline.clone(),
        status,
        workers: board.snapshot(),
        total_errors,
        error_messages,
        duration,
        safe_stopped: shared.control.is_safe_stopping(),
    };

    shared.set_state(status);
    shared.result.send_replace(Some(result));
}
