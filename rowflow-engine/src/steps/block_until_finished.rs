// Block Until Finished Step
// Holds back its input rows until a set of other step copies have finished

use super::{to_config, StepPlugin};
use crate::error::StepError;
use crate::graph::{CheckContext, CheckRemark, PipelineGraph, StepMeta};
use crate::row::{name_key, same_name};
use crate::runtime::{InitContext, StepIo, StepWorker, WorkerStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One step copy whose completion is awaited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedStep {
    pub step: String,
    #[serde(default)]
    pub copy: usize,
}

impl WatchedStep {
    pub fn new(step: impl Into<String>, copy: usize) -> Self {
        Self {
            step: step.into(),
            copy,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUntilFinishedPlugin {
    #[serde(default)]
    pub steps: Vec<WatchedStep>,
}

impl BlockUntilFinishedPlugin {
    pub fn new(steps: Vec<WatchedStep>) -> Self {
        Self { steps }
    }

    /// Problems with the watch list, each fatal to the step
    ///
    /// `has_copy` says whether a copy of a watched step will run; the graph's
    /// copy count during checks, the execution's status board during init.
    fn problems(
        &self,
        graph: &PipelineGraph,
        step: &str,
        has_copy: impl Fn(&StepMeta, usize) -> bool,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if self.steps.is_empty() {
            problems.push("no steps to wait for".to_string());
            return problems;
        }

        let downstream = graph.downstream(step);
        for watched in &self.steps {
            if same_name(&watched.step, step) {
                problems.push("the step cannot wait for itself".to_string());
                continue;
            }
            let Some(meta) = graph.find_step(&watched.step) else {
                problems.push(format!("watched step '{}' does not exist", watched.step));
                continue;
            };
            if !has_copy(meta, watched.copy) {
                problems.push(format!(
                    "watched step '{}' has no copy {}",
                    watched.step, watched.copy
                ));
            }
            if downstream.contains(&name_key(&watched.step)) {
                problems.push(format!(
                    "watched step '{}' depends on this step and would never finish",
                    watched.step
                ));
            }
        }
        problems
    }
}

impl StepPlugin for BlockUntilFinishedPlugin {
    fn kind(&self) -> &'static str {
        "block_until_finished"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<CheckRemark> {
        let step = ctx.step.name.as_str();
        self.problems(ctx.graph, step, |meta, copy| copy < meta.copies)
            .into_iter()
            .map(|p| CheckRemark::error(Some(step), p))
            .collect()
    }

    fn create_worker(&self, _copy: usize) -> Box<dyn StepWorker> {
        Box::new(BlockWorker {
            plugin: self.clone(),
            pending: Vec::new(),
            released: false,
        })
    }

    fn config(&self) -> serde_json::Value {
        to_config(self)
    }
}

struct BlockWorker {
    plugin: BlockUntilFinishedPlugin,
    pending: Vec<WatchedStep>,
    released: bool,
}

impl BlockWorker {
    /// Poll the status board until every watched copy is terminal
    async fn wait_for_watched(&mut self, io: &StepIo) -> Result<(), StepError> {
        let board = Arc::clone(io.status_board());
        let interval = io.config().sync_poll_interval();

        loop {
            let mut still_pending = Vec::with_capacity(self.pending.len());
            for watched in self.pending.drain(..) {
                let Some(view) = board.find(&watched.step, watched.copy) else {
                    return Err(StepError::config(format!(
                        "watched step '{}' copy {} is not running",
                        watched.step, watched.copy
                    )));
                };
                match view.status() {
                    WorkerStatus::Finished => {}
                    status @ (WorkerStatus::Failed | WorkerStatus::Stopped) => {
                        return Err(StepError::Dependency(format!(
                            "watched step '{}' copy {} ended {}",
                            watched.step, watched.copy, status
                        )));
                    }
                    _ => still_pending.push(watched),
                }
            }
            self.pending = still_pending;

            if self.pending.is_empty() {
                return Ok(());
            }
            io.sleep(interval).await?;
        }
    }
}

#[async_trait]
impl StepWorker for BlockWorker {
    async fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), StepError> {
        let problems = self.plugin.problems(ctx.graph, &ctx.step.name, |meta, copy| {
            ctx.status.find(&meta.name, copy).is_some()
        });
        if !problems.is_empty() {
            return Err(StepError::config(problems.join("; ")));
        }
        self.pending = self.plugin.steps.clone();
        Ok(())
    }

    async fn process_batch(&mut self, io: &mut StepIo) -> Result<bool, StepError> {
        if !self.released {
            self.wait_for_watched(io).await?;
            self.released = true;
            debug!(step = %io.step_name(), copy = io.copy(), "watched steps finished, releasing rows");
        }

        match io.get_row().await? {
            Some(row) => {
                io.put_row(row).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
