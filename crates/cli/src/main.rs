mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::Outcome;
use mariner::{Direction, MigrateError};

#[derive(Parser)]
#[command(name = "mariner")]
#[command(about = "Ordered, reversible schema migrations")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and migrations directory
    Init {
        /// Migrations directory to configure
        #[arg(long)]
        directory: Option<PathBuf>,
    },

    /// Create a new migration
    Create {
        /// Migration name; several words are joined with '-'
        #[arg(required = true)]
        name: Vec<String>,

        /// Dialect extension of the new file
        #[arg(long, short, default_value = "sql")]
        extension: String,
    },

    /// Apply or revert migrations
    Migrate {
        /// up or down
        direction: Direction,

        /// up: migrations to apply; down: batches to revert
        #[arg(long, short)]
        number: Option<u32>,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run(cli: Cli) -> anyhow::Result<Outcome> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { directory } => commands::init::run(config, directory.as_deref()),
        Commands::Create { name, extension } => {
            commands::create::run(config, &name.join("-"), &extension)
        }
        Commands::Migrate { direction, number } => {
            commands::migrate::run(config, direction, number).await
        }
        Commands::Status { json } => commands::status::run(config, json).await,
    }
}

/// One-line operator diagnostic
fn diagnostic(err: &anyhow::Error) -> String {
    match err.downcast_ref::<MigrateError>() {
        Some(e) => format!("⛵ ERROR [{}]: {}", e.kind(), e),
        None => format!("⛵ ERROR [Error]: {:#}", err),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(Outcome::Complete) => ExitCode::SUCCESS,
        Ok(Outcome::Partial) => ExitCode::from(2),
        Err(err) => {
            eprintln!("{}", diagnostic(&err));
            ExitCode::from(1)
        }
    }
}
