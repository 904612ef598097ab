// Rowflow CLI
// Runs, validates and inspects pipeline documents

mod commands;
mod output;
mod settings;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Run ETL pipelines described in YAML or JSON documents
#[derive(Parser, Debug)]
#[command(name = "rowflow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a pipeline
    Run(commands::run::RunArgs),

    /// Check a pipeline without running it
    Validate(commands::validate::ValidateArgs),

    /// Show the fields leaving a step
    Fields(commands::fields::FieldsArgs),

    /// Show the natural step and hop order
    Order(commands::order::OrderArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Fields(args) => commands::fields::execute(args),
        Command::Order(args) => commands::order::execute(args),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| eyre!("invalid log level: {}", e))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}
