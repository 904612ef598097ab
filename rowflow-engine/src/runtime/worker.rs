// Step Workers
// The worker contract and the row I/O a worker copy runs against

use super::control::ExecutionControl;
use super::events::{EventSender, ExecutionEvent, ProgressSender};
use super::rowset::{GetOutcome, PutOutcome, RowReceiver, RowSender};
use super::status::{StatusBoard, StatusWriter};
use crate::config::ExecutionConfig;
use crate::error::StepError;
use crate::graph::{ErrorHandling, HopKind, PartitionMethod, PipelineGraph, StepMeta};
use crate::row::{same_name, Row, RowSchema, Value};
use crate::vfs::Vfs;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One running instance of a step
///
/// The coordinator calls `init` once during preparation, then
/// `process_batch` until it returns `Ok(false)`, an error (a panic counts as
/// one), or the pipeline stops, and finally `dispose` exactly once on every
/// exit path.
#[async_trait]
pub trait StepWorker: Send {
    async fn init(&mut self, _ctx: &InitContext<'_>) -> Result<(), StepError> {
        Ok(())
    }

    /// Handle at most one unit of work; `Ok(false)` once inputs are exhausted
    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError>;

    async fn dispose(&mut self, _io: &mut StepIo) {}
}

/// What a worker sees while initializing
#[derive(Clone, Copy)]
pub struct InitContext<'a> {
    pub step: &'a StepMeta,
    pub copy: usize,
    pub graph: &'a PipelineGraph,
    pub input_schema: &'a RowSchema,
    pub output_schema: &'a RowSchema,
    pub info_schemas: &'a [(String, RowSchema)],
    pub status: &'a Arc<StatusBoard>,
    pub vfs: &'a Arc<dyn Vfs>,
    pub config: &'a ExecutionConfig,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PartitionRoute {
    pub(crate) field_index: usize,
    pub(crate) method: PartitionMethod,
}

/// Row sets leading from one worker copy to the copies of one target step
#[derive(Debug)]
pub(crate) struct OutputTarget {
    pub(crate) step: String,
    pub(crate) kind: HopKind,
    pub(crate) senders: Vec<RowSender>,
    pub(crate) partition: Option<PartitionRoute>,
    pub(crate) next: usize,
}

impl OutputTarget {
    pub(crate) fn new(step: impl Into<String>, kind: HopKind) -> Self {
        Self {
            step: step.into(),
            kind,
            senders: Vec::new(),
            partition: None,
            next: 0,
        }
    }

    fn pick(&mut self, row: &Row) -> usize {
        let copies = self.senders.len();
        if copies <= 1 {
            return 0;
        }
        match self.partition {
            Some(route) => partition_of(row.get(route.field_index), route.method, copies),
            None => {
                let idx = self.next % copies;
                self.next = (idx + 1) % copies;
                idx
            }
        }
    }
}

fn partition_of(value: Option<&Value>, method: PartitionMethod, copies: usize) -> usize {
    let copies_i = copies as i64;
    match (method, value) {
        (PartitionMethod::Mod, Some(v)) if v.as_integer().is_some() => {
            v.as_integer().map(|i| i.rem_euclid(copies_i) as usize).unwrap_or(0)
        }
        (_, Some(v)) => (v.partition_hash() % copies as u64) as usize,
        (_, None) => 0,
    }
}

/// Everything one worker copy reads from and writes to
pub struct StepIo {
    pub(crate) step: String,
    pub(crate) copy: usize,
    pub(crate) inputs: Vec<RowReceiver>,
    pub(crate) next_input: usize,
    pub(crate) info_inputs: Vec<(String, RowReceiver)>,
    pub(crate) outputs: Vec<OutputTarget>,
    pub(crate) next_output: usize,
    pub(crate) error_output: Option<OutputTarget>,
    pub(crate) distribute: bool,
    pub(crate) error_handling: Option<ErrorHandling>,
    pub(crate) rejected: u64,
    pub(crate) input_schema: RowSchema,
    pub(crate) output_schema: RowSchema,
    pub(crate) status: StatusWriter,
    pub(crate) board: Arc<StatusBoard>,
    pub(crate) control: ExecutionControl,
    pub(crate) vfs: Arc<dyn Vfs>,
    pub(crate) config: ExecutionConfig,
    pub(crate) events: Option<ProgressSender>,
    pub(crate) input_step: bool,
}

impl StepIo {
    pub fn step_name(&self) -> &str {
        &self.step
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn input_schema(&self) -> &RowSchema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &RowSchema {
        &self.output_schema
    }

    /// Status of every worker in this execution
    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn vfs(&self) -> &Arc<dyn Vfs> {
        &self.vfs
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    /// Whether this step has no main inputs
    pub fn is_input_step(&self) -> bool {
        self.input_step
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Sleep for `duration`, returning `StepError::Stopped` if the pipeline stops first
    pub async fn sleep(&self, duration: Duration) -> Result<(), StepError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.control.stopped() => Err(StepError::Stopped),
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Next row from the main inputs, `None` once every producer is done
    ///
    /// Inputs are polled round-robin; with all of them empty the worker
    /// waits a bounded time on one, marked idle, and re-checks stop.
    /// Returns `StepError::Stopped` once the pipeline is stopping.
    pub async fn get_row(&mut self) -> Result<Option<Row>, StepError> {
        let wait = self.config.wait_timeout();
        loop {
            if self.control.is_stopped() {
                return Err(StepError::Stopped);
            }

            let count = self.inputs.len();
            let mut pending = None;
            for offset in 0..count {
                let idx = (self.next_input + offset) % count;
                match self.inputs[idx].try_get() {
                    GetOutcome::Row(row) => {
                        self.next_input = (idx + 1) % count;
                        self.count_read();
                        return Ok(Some(row));
                    }
                    GetOutcome::Empty => {
                        pending.get_or_insert(idx);
                    }
                    GetOutcome::Done => {}
                }
            }

            let Some(idx) = pending else {
                return Ok(None);
            };

            self.status.set_idle(true);
            let outcome = tokio::select! {
                outcome = self.inputs[idx].get_wait(wait) => Some(outcome),
                _ = self.control.stopped() => None,
            };
            self.status.set_idle(false);

            match outcome {
                Some(GetOutcome::Row(row)) => {
                    self.next_input = (idx + 1) % count;
                    self.count_read();
                    return Ok(Some(row));
                }
                Some(_) => continue,
                None => return Err(StepError::Stopped),
            }
        }
    }

    /// Every row of the info stream coming from `source`
    ///
    /// Blocks until all copies of the source are done.
    pub async fn info_rows(&mut self, source: &str) -> Result<Vec<Row>, StepError> {
        let wait = self.config.wait_timeout();
        let mut rows = Vec::new();
        let mut found = false;

        for (name, receiver) in self.info_inputs.iter_mut() {
            if !same_name(name, source) {
                continue;
            }
            found = true;
            loop {
                if self.control.is_stopped() {
                    return Err(StepError::Stopped);
                }
                match receiver.get_wait(wait).await {
                    GetOutcome::Row(row) => {
                        self.status.inc_read();
                        rows.push(row);
                    }
                    GetOutcome::Empty => continue,
                    GetOutcome::Done => break,
                }
            }
        }

        if !found {
            return Err(StepError::config(format!(
                "step '{}' has no info stream from '{}'",
                self.step, source
            )));
        }
        debug!(step = %self.step, copy = self.copy, source, rows = rows.len(), "read info stream");
        Ok(rows)
    }

    fn count_read(&self) {
        let read = self.status.inc_read();
        let every = self.config.feedback_size;
        if every > 0 && read % every == 0 {
            info!(step = %self.step, copy = self.copy, read, "rows read");
            self.events.send_event(ExecutionEvent::info(
                format!("{} rows read", read),
                Some(self.step.clone()),
                Some(self.copy),
            ));
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Send a row downstream
    ///
    /// Info targets always get a copy. Main targets get the row round-robin
    /// when the step distributes, otherwise each gets a copy. Within a
    /// target, partitioning or round-robin picks the copy.
    pub async fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        let wait = self.config.wait_timeout();
        let control = self.control.clone();

        let main: Vec<usize> = (0..self.outputs.len())
            .filter(|&i| self.outputs[i].kind != HopKind::Info)
            .collect();
        let mut recipients: Vec<usize> = (0..self.outputs.len())
            .filter(|&i| self.outputs[i].kind == HopKind::Info)
            .collect();

        if self.distribute && main.len() > 1 {
            let pick = main[self.next_output % main.len()];
            self.next_output = (self.next_output + 1) % main.len();
            recipients.push(pick);
        } else {
            recipients.extend(main);
        }

        if let Some((&last, rest)) = recipients.split_last() {
            for &idx in rest {
                deliver(&mut self.outputs[idx], row.clone(), wait, &control).await?;
            }
            deliver(&mut self.outputs[last], row, wait, &control).await?;
        }

        self.status.inc_written();
        Ok(())
    }

    /// Send a row to one named target step only
    pub async fn put_row_to(&mut self, target: &str, row: Row) -> Result<(), StepError> {
        let wait = self.config.wait_timeout();
        let control = self.control.clone();
        let output = self
            .outputs
            .iter_mut()
            .find(|o| same_name(&o.step, target))
            .ok_or_else(|| {
                StepError::config(format!("step '{}' has no hop to '{}'", self.step, target))
            })?;
        deliver(output, row, wait, &control).await?;
        self.status.inc_written();
        Ok(())
    }

    /// Route a failed row to the error hop, or hand the error back
    ///
    /// The row must be laid out as the step's input. When error handling is
    /// off, or the allowed number of rejected rows is exceeded, the error is
    /// returned and the caller should fail the worker with it.
    pub async fn reject_row(&mut self, row: Row, error: StepError) -> Result<(), StepError> {
        let Some(eh) = self.error_handling.as_ref().filter(|eh| eh.enabled) else {
            return Err(error);
        };
        if self.error_output.is_none() {
            return Err(error);
        }

        self.rejected += 1;
        if let Some(max) = eh.max_errors {
            if self.rejected > max {
                return Err(StepError::row(format!(
                    "maximum number of rejected rows ({}) exceeded: {}",
                    max, error
                )));
            }
        }

        let (message, field, code) = match &error {
            StepError::Row {
                message,
                field,
                code,
            } => (message.clone(), field.clone(), code.clone()),
            other => (other.to_string(), None, None),
        };

        let mut out = row;
        if eh.nr_errors_field.is_some() {
            out.push(Value::Integer(1));
        }
        if eh.descriptions_field.is_some() {
            out.push(Value::String(message));
        }
        if eh.fields_field.is_some() {
            out.push(field.map(Value::String).unwrap_or(Value::Null));
        }
        if eh.codes_field.is_some() {
            out.push(code.map(Value::String).unwrap_or(Value::Null));
        }

        let wait = self.config.wait_timeout();
        let control = self.control.clone();
        if let Some(target) = self.error_output.as_mut() {
            deliver(target, out, wait, &control).await?;
        }
        self.status.inc_rejected();
        Ok(())
    }

    /// Signal end of stream on every output; safe to call more than once
    pub fn set_output_done(&mut self) {
        for output in self.outputs.iter_mut().chain(self.error_output.iter_mut()) {
            for sender in output.senders.iter_mut() {
                sender.set_done();
            }
        }
    }

    /// Stop accepting rows from producers
    pub(crate) fn close_inputs(&mut self) {
        for receiver in self.inputs.iter_mut() {
            receiver.close();
        }
        for (_, receiver) in self.info_inputs.iter_mut() {
            receiver.close();
        }
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Count a row read from outside the pipeline (file, table, ...)
    pub fn inc_input(&self) {
        self.status.inc_input();
    }

    /// Count a row written outside the pipeline
    pub fn inc_output(&self) {
        self.status.inc_output();
    }

    pub fn inc_updated(&self) {
        self.status.inc_updated();
    }
}

/// Put a row on the chosen copy of a target, waiting while it is full
///
/// Info targets get the row on every copy.
async fn deliver(
    target: &mut OutputTarget,
    row: Row,
    wait: Duration,
    control: &ExecutionControl,
) -> Result<(), StepError> {
    if target.kind == HopKind::Info && target.senders.len() > 1 {
        let last = target.senders.len() - 1;
        for idx in 0..last {
            put_blocking(&mut target.senders[idx], row.clone(), wait, control).await?;
        }
        return put_blocking(&mut target.senders[last], row, wait, control).await;
    }

    let idx = target.pick(&row);
    match target.senders.get_mut(idx) {
        Some(sender) => put_blocking(sender, row, wait, control).await,
        None => Ok(()),
    }
}

async fn put_blocking(
    sender: &mut RowSender,
    row: Row,
    wait: Duration,
    control: &ExecutionControl,
) -> Result<(), StepError> {
    let mut row = row;
    loop {
        if control.is_stopped() {
            return Err(StepError::Stopped);
        }
        match sender.put_wait(row, wait).await {
            PutOutcome::Sent => return Ok(()),
            PutOutcome::Full(back) => row = back,
            PutOutcome::Closed(_) => {
                if !sender.is_done() {
                    warn!(rowset = %sender.meta(), "consumer is gone, discarding rows");
                    sender.set_done();
                }
                return Ok(());
            }
        }
    }
}
