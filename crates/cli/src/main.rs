mod commands;
mod fixture;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Throttled parallel-loop scheduler toolbox.
#[derive(Parser)]
#[command(name = "lanes", version, about = "Throttled parallel-loop scheduler toolbox")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a parallel loop described by a JSON fixture to completion
    Simulate {
        /// Path to the fixture JSON file
        fixture: PathBuf,
        /// Path to a scheduler TOML config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Include the lifecycle events in the output
        #[arg(long)]
        events: bool,
    },

    /// Print the batch sizes a loop releases for a given item count
    Rounds {
        /// Number of work items
        #[arg(long)]
        items: usize,
        /// Throttle limit (omit for unbounded)
        #[arg(long)]
        throttle: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Simulate {
            fixture,
            config,
            events,
        } => {
            commands::simulate::cmd_simulate(
                &fixture,
                config.as_deref(),
                events,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Rounds { items, throttle } => {
            commands::rounds::cmd_rounds(items, throttle, cli.output, cli.quiet);
        }
    }
}

/// Log to stderr, honouring `RUST_LOG`.
fn init_tracing(quiet: bool) {
    let default = if quiet { "off" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
