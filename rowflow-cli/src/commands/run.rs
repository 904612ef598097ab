use crate::output;
use crate::settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;
use tracing::debug;

use rowflow_engine::{
    progress_channel, EngineError, ExecutionEvent, ExecutionState, LocalVfs, LogLevel,
    PipelineExecution, PipelineResult, WorkerStatus,
};

/// Execute a pipeline document
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML or JSON file
    pub pipeline: PathBuf,

    /// Capacity of every row set
    #[arg(long, value_name = "ROWS")]
    pub row_set_size: Option<usize>,

    /// Wait on a full or empty row set before re-checking stop and pause
    #[arg(long, value_name = "MS")]
    pub wait_timeout: Option<u64>,

    /// Stop every step as soon as one of them fails
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Run a step with N copies (can be repeated, format: STEP=N)
    #[arg(long = "copies", short = 'c', value_name = "STEP=N")]
    pub copies: Vec<String>,

    /// Directory relative file locations resolve against (default: the pipeline's directory)
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Defaults file (default: <config dir>/rowflow/config.yaml)
    #[arg(long, value_name = "FILE")]
    pub defaults: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<ExitCode> {
    let (document, graph) = super::load_pipeline(&args.pipeline)?;

    let copies = args
        .copies
        .iter()
        .map(|spec| settings::parse_copies(spec))
        .collect::<Result<Vec<_>>>()?;

    let defaults_path = args.defaults.clone().or_else(settings::defaults_path);
    let defaults = settings::load_defaults(defaults_path.as_deref())?;
    let mut config = settings::layer(&defaults, &document.settings)?;
    if let Some(size) = args.row_set_size {
        config.row_set_size = size.max(1);
    }
    if let Some(ms) = args.wait_timeout {
        config.wait_timeout_ms = ms;
    }
    if args.stop_on_failure {
        config.stop_on_failure = true;
    }
    debug!(?config, "effective execution settings");

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => match args.pipeline.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        },
    };

    output::info(&format!("Pipeline: {}", document.name));
    if let Some(desc) = &document.description {
        output::info(&format!("Description: {}", desc));
    }
    output::info(&format!(
        "{} steps, {} hops",
        document.steps.len(),
        document.hops.len()
    ));
    eprintln!();

    let (tx, mut rx) = progress_channel();
    let mut execution = PipelineExecution::new(Arc::new(graph))
        .with_config(config)
        .with_vfs(Arc::new(LocalVfs::with_root(working_dir)))
        .with_progress(tx);
    for (step, n) in &copies {
        execution = execution.with_copies(step, *n);
    }

    output::status("Preparing", &document.name);
    if let Err(e) = execution.prepare().await {
        report_prepare_error(&e);
        return Ok(ExitCode::from(1));
    }

    let handle = execution.start()?;

    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, stopping all steps...");
            interrupt.stop_all();
        }
    });

    let wait = handle.wait();
    tokio::pin!(wait);
    let result = loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(&event),
            result = &mut wait => break result,
        }
    };
    while let Ok(event) = rx.try_recv() {
        print_event(&event);
    }

    print_summary(&result);
    Ok(exit_code(result.status))
}

fn report_prepare_error(err: &EngineError) {
    match err {
        EngineError::Validation(validation) => {
            output::error(&format!(
                "{} validation error(s):",
                validation.remarks.iter().filter(|r| r.is_error()).count()
            ));
            for remark in &validation.remarks {
                output::error(&format!("  - {}", remark));
            }
        }
        EngineError::Init(failures) => {
            output::error(&format!("{} step(s) failed to initialize:", failures.len()));
            for failure in failures {
                output::error(&format!("  - {}", failure));
            }
        }
        other => output::error(&other.to_string()),
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted {
            pipeline_name,
            total_workers,
        } => {
            output::header(&format!(
                "Pipeline '{}' started ({} workers)",
                pipeline_name, total_workers
            ));
        }

        ExecutionEvent::PipelineCompleted {
            pipeline_name,
            status,
            duration,
        } => {
            let message = format!(
                "Pipeline '{}' {} ({:.2}s)",
                pipeline_name,
                status,
                duration.as_secs_f64()
            );
            if *status == ExecutionState::Finished {
                output::success(&message);
            } else {
                output::failure(&message);
            }
        }

        ExecutionEvent::WorkerStarted { step, copy } => {
            output::dim(&format!("    {}.{} running", step, copy));
        }

        ExecutionEvent::WorkerCompleted { snapshot } => {
            let line = format!(
                "{}.{} {} (R={} W={} I={} O={} E={})",
                snapshot.step,
                snapshot.copy,
                snapshot.status,
                snapshot.lines_read,
                snapshot.lines_written,
                snapshot.lines_input,
                snapshot.lines_output,
                snapshot.errors
            );
            if snapshot.status == WorkerStatus::Finished {
                output::check(&line);
            } else {
                output::failure(&line);
            }
        }

        ExecutionEvent::Log {
            level,
            message,
            step,
            copy,
        } => {
            let message = match (step, copy) {
                (Some(step), Some(copy)) => format!("{}.{}: {}", step, copy, message),
                (Some(step), None) => format!("{}: {}", step, message),
                _ => message.clone(),
            };
            match level {
                LogLevel::Debug => output::dim(&format!("    {}", message)),
                LogLevel::Info => output::info(&message),
                LogLevel::Warning => output::warning(&message),
                LogLevel::Error => output::step_error(&message),
            }
        }

        ExecutionEvent::Error {
            message,
            step,
            copy,
        } => {
            let location = match (step, copy) {
                (Some(step), Some(copy)) => format!("{}.{}", step, copy),
                (Some(step), None) => step.clone(),
                _ => "pipeline".to_string(),
            };
            output::step_error(&format!("{}: {}", location, message));
        }
    }
}

fn print_summary(result: &PipelineResult) {
    eprintln!();
    output::header("Summary");
    for worker in &result.workers {
        let duration = worker
            .duration
            .map(|d| format!("{:.2}s", d.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());
        output::worker_line(&format!(
            "{:<24} {:>3} {:<9} read={:<8} written={:<8} input={:<8} output={:<8} rejected={:<6} errors={:<4} {}",
            worker.step,
            worker.copy,
            worker.status.to_string(),
            worker.lines_read,
            worker.lines_written,
            worker.lines_input,
            worker.lines_output,
            worker.lines_rejected,
            worker.errors,
            duration
        ));
    }
    eprintln!();

    for message in &result.error_messages {
        output::error(message);
    }
    if result.safe_stopped {
        output::info("Input steps were stopped early; buffered rows were processed");
    }

    let message = format!(
        "{} in {:.2}s with {} error(s)",
        result.status,
        result.duration.as_secs_f64(),
        result.total_errors
    );
    if result.is_success() {
        output::success(&message);
    } else {
        output::failure(&message);
    }
}

/// Process exit code for a terminal pipeline state
pub fn exit_code(status: ExecutionState) -> ExitCode {
    match status {
        ExecutionState::Finished => ExitCode::SUCCESS,
        ExecutionState::Stopped => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}
