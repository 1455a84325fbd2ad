//! realmstore CLI
//!
//! Command-line tools for realmstore data directories.
//!
//! # Commands
//!
//! - `import` - Load elements from a JSON file into a realm
//! - `inspect` - Display element counts per kind and type
//! - `demo` - Run a small workload against an agent and print what happened

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// realmstore command-line tools.
#[derive(Parser)]
#[command(name = "realmstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the realm's data directory
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load elements from a JSON file into a cached realm
    Import {
        /// Realm to import into
        #[arg(short, long, default_value = "defaultRealm")]
        realm: String,

        /// JSON file with `resources`, `orders` and `activities` arrays
        #[arg(short, long)]
        file: PathBuf,

        /// Username recorded in audits
        #[arg(short, long, default_value = "import")]
        user: String,
    },

    /// Display element counts per kind and type
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a small workload and print stats and operations-log messages
    Demo {
        /// Agent configuration as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of resources to create
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Import { realm, file, user } => {
            let path = cli.data_dir.ok_or("Data directory required for import")?;
            commands::import::run(&path, &realm, &file, &user)?;
        }
        Commands::Inspect { format } => {
            let path = cli.data_dir.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Demo { config, count } => {
            commands::demo::run(config.as_deref(), count)?;
        }
        Commands::Version => {
            println!("realmstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("realmstore core v{}", realmstore_core::VERSION);
        }
    }

    Ok(())
}
