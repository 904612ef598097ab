use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use color_eyre::Result;

use rowflow_engine::RemarkSeverity;

/// Validate a pipeline document
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML or JSON file
    pub pipeline: PathBuf,

    /// Also list the steps that passed their checks
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

pub fn execute(args: ValidateArgs) -> Result<ExitCode> {
    let (document, graph) = match super::load_pipeline(&args.pipeline) {
        Ok(loaded) => loaded,
        Err(e) => {
            output::error(&format!("{:#}", e));
            return Ok(ExitCode::from(1));
        }
    };

    output::check(&format!(
        "Structure: {} steps, {} hops",
        document.steps.len(),
        document.hops.len()
    ));

    output::status("Validating", &document.name);
    let remarks = graph.validate_graph();

    let mut errors = 0;
    let mut warnings = 0;
    for remark in &remarks {
        let message = match &remark.step {
            Some(step) => format!("{}: {}", step, remark.message),
            None => remark.message.clone(),
        };
        match remark.severity {
            RemarkSeverity::Error => {
                errors += 1;
                output::error(&message);
            }
            RemarkSeverity::Warning => {
                warnings += 1;
                output::warning(&message);
            }
            RemarkSeverity::Ok => {
                if args.verbose {
                    output::check(&message);
                }
            }
        }
    }

    eprintln!();
    if errors > 0 {
        output::failure(&format!(
            "Pipeline is invalid: {} error(s), {} warning(s)",
            errors, warnings
        ));
        return Ok(ExitCode::from(1));
    }

    if warnings > 0 {
        output::success(&format!("Pipeline is valid with {} warning(s)", warnings));
    } else {
        output::success("Pipeline is valid");
    }
    Ok(ExitCode::SUCCESS)
}
