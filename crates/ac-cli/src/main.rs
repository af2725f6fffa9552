//! Command-line front end for the roll-rule engine.

mod commands;
mod scenario;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ac",
    about = "Resolve, lint and evaluate conditional roll rules",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log debug output to stderr (overridden by AC_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the scenario's pending roll and print the result
    Resolve {
        /// Scenario JSON file
        scenario: PathBuf,

        /// Print machine-readable JSON instead of tables
        #[arg(long)]
        json: bool,

        /// Commit staged uses against the in-memory store
        #[arg(long)]
        commit: bool,

        /// Opt-in rule ids to select
        #[arg(short, long = "select")]
        select: Vec<String>,
    },

    /// Validate every rule string in the scenario
    Lint {
        /// Scenario JSON file
        scenario: PathBuf,
    },

    /// Evaluate an expression
    Eval {
        /// The expression
        expression: String,

        /// Evaluate as a formula instead of a condition
        #[arg(short, long)]
        formula: bool,

        /// Roll the formula's dice
        #[arg(short, long, requires = "formula")]
        roll: bool,

        /// Scenario whose pending roll provides the context
        #[arg(short, long)]
        scenario: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("AC_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Resolve {
            scenario,
            json,
            commit,
            select,
        } => commands::resolve::run(&scenario, json, commit, &select),
        Commands::Lint { scenario } => commands::lint::run(&scenario),
        Commands::Eval {
            expression,
            formula,
            roll,
            scenario,
        } => commands::eval::run(&expression, formula, roll, scenario.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
