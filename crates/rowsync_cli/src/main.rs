//! rowsync CLI
//!
//! Command-line tools for change batches on disk.
//!
//! # Commands
//!
//! - `inspect` - Display the parts of a batch and their row states
//! - `verify` - Check every frame of a batch
//! - `dump` - Print the rows of a batch
//! - `order` - Print the apply order of a schema

mod commands;

use clap::{Parser, Subcommand};
use rowsync_storage::FileBatchStorage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// rowsync command-line batch tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage root that batch directories are relative to
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the parts of a batch and their row states
    Inspect {
        /// Batch directory
        directory: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every frame of a batch
    Verify {
        /// Batch directory
        directory: PathBuf,
    },

    /// Print the rows of a batch
    Dump {
        /// Batch directory
        directory: PathBuf,

        /// Only rows of this table
        #[arg(short, long)]
        table: Option<String>,

        /// Maximum number of rows to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the upsert and delete order of a schema
    Order {
        /// Schema file (JSON)
        schema: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { directory, format } => {
            let storage = FileBatchStorage::open(&cli.path)?;
            commands::inspect::run(&storage, &directory, &format)?;
        }
        Commands::Verify { directory } => {
            let storage = FileBatchStorage::open(&cli.path)?;
            commands::verify::run(&storage, &directory)?;
        }
        Commands::Dump {
            directory,
            table,
            limit,
            format,
        } => {
            let storage = FileBatchStorage::open(&cli.path)?;
            commands::dump::run(&storage, &directory, table.as_deref(), limit, &format)?;
        }
        Commands::Order { schema } => {
            commands::order::run(&schema)?;
        }
        Commands::Version => {
            println!("rowsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "part format v{}",
                rowsync_storage::format::PART_VERSION
            );
        }
    }

    Ok(())
}
