mod commands;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use commands::{expand, run, validate};

/// Validate, expand and run CI build matrices
#[derive(Parser, Debug)]
#[command(name = "cimatrix", version, about)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a matrix document and report every job it produces
    Validate(validate::ValidateArgs),

    /// Print the expanded, materialized job list
    Expand(expand::ExpandArgs),

    /// Run the job list locally
    Run(run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Validate(args) => validate::execute(args),
        Command::Expand(args) => expand::execute(args),
        Command::Run(args) => run::execute(args).await,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
