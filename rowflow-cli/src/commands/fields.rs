use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Show the fields leaving a step
#[derive(Args, Debug)]
pub struct FieldsArgs {
    /// Path to the pipeline YAML or JSON file
    pub pipeline: PathBuf,

    /// Step to inspect
    pub step: String,

    /// Show the rows sent to this target instead (error rows carry extra fields)
    #[arg(long, value_name = "STEP")]
    pub target: Option<String>,

    /// Show the fields entering the step instead of leaving it
    #[arg(long, conflicts_with = "target")]
    pub input: bool,
}

pub fn execute(args: FieldsArgs) -> Result<ExitCode> {
    let (_, graph) = super::load_pipeline(&args.pipeline)?;

    let schema = if args.input {
        graph.input_schema_of(&args.step)
    } else {
        graph.schema_of(&args.step, args.target.as_deref())
    }
    .wrap_err_with(|| format!("Cannot resolve the fields of '{}'", args.step))?;

    let label = match (&args.target, args.input) {
        (_, true) => format!("entering '{}'", args.step),
        (Some(target), false) => format!("from '{}' to '{}'", args.step, target),
        (None, false) => format!("leaving '{}'", args.step),
    };
    output::status("Fields", &label);

    if schema.is_empty() {
        output::dim("  No fields");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "  {:<4} {:<24} {:<10} {:>6} {:>9}  {}",
        "#", "NAME", "TYPE", "LENGTH", "PRECISION", "ORIGIN"
    );
    for (i, field) in schema.iter().enumerate() {
        println!(
            "  {:<4} {:<24} {:<10} {:>6} {:>9}  {}",
            i + 1,
            field.name,
            field.value_type.to_string(),
            field.length.map(|l| l.to_string()).unwrap_or_default(),
            field.precision.map(|p| p.to_string()).unwrap_or_default(),
            field.origin.as_deref().unwrap_or("")
        );
    }
    println!();
    output::dim(&format!("  {} field(s)", schema.len()));

    Ok(ExitCode::SUCCESS)
}
