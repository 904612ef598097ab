use crate::output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use color_eyre::Result;

use rowflow_engine::HopKind;

/// Show the order steps and hops are considered in
#[derive(Args, Debug)]
pub struct OrderArgs {
    /// Path to the pipeline YAML or JSON file
    pub pipeline: PathBuf,

    /// Also list the hops in dependency order
    #[arg(long)]
    pub hops: bool,
}

pub fn execute(args: OrderArgs) -> Result<ExitCode> {
    let (document, graph) = super::load_pipeline(&args.pipeline)?;

    if let Some(cycle) = graph.cycle_path() {
        output::error(&format!("Pipeline contains a cycle: {}", cycle.join(" -> ")));
        return Ok(ExitCode::from(1));
    }

    output::status("Ordering", &document.name);
    for (i, step) in graph.natural_order().iter().enumerate() {
        println!("  {:>3}. {}", i + 1, step);
    }

    if args.hops {
        println!();
        for hop in graph.natural_hop_order() {
            let mut line = format!("  {} -> {}", hop.from, hop.to);
            if hop.kind != HopKind::Main {
                line.push_str(&format!(" ({})", hop.kind));
            }
            if hop.enabled {
                println!("{}", line);
            } else {
                output::dim(&format!("{} [disabled]", line));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
