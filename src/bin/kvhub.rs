//! KvHub CLI
//!
//! Opens the storage root, runs the startup scan and executes one command
//! against it.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kvhub::{Config, Hub, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// KvHub CLI
#[derive(Parser, Debug)]
#[command(name = "kvhub")]
#[command(about = "Multi-engine key-value database registry")]
#[command(version)]
struct Args {
    /// Storage root (one subdirectory per database)
    #[arg(short, long, default_value = "./kvhub_data")]
    storage_dir: String,

    /// Storage engine: memdb, logdb or lsmdb (case-insensitive)
    #[arg(short, long, default_value = "logdb")]
    engine: String,

    /// Node id for generated unique ids (0-1023)
    #[arg(short, long, default_value = "0")]
    node_id: u16,

    /// Worker threads for the startup scan
    #[arg(long, default_value = "4")]
    scan_workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List databases found under the storage root
    List,

    /// Get a value by key
    Get {
        /// Database name
        db: String,

        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// Database name
        db: String,

        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// Database name
        db: String,

        /// The key to delete
        key: String,
    },

    /// Generate unique ids
    Id {
        /// How many ids to print
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Print the integer form (the default is the string form)
        #[arg(long)]
        numeric: bool,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvhub=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("KvHub v{}", kvhub::VERSION);

    let config = Config::builder()
        .storage_dir(&args.storage_dir)
        .engine(&args.engine)
        .node_id(args.node_id)
        .scan_workers(args.scan_workers)
        .build();

    match run(&config, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, command: Commands) -> Result<()> {
    let (hub, report) = Hub::start(config)?;

    match command {
        Commands::List => {
            for name in &report.opened {
                println!("{}", name);
            }
            for failure in &report.failed {
                eprintln!("{}", failure);
            }
        }
        Commands::Get { db, key } => {
            let handle = hub.registry().get_or_open(&db)?;
            match handle.get(key.as_bytes())? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(nil)"),
            }
        }
        Commands::Set { db, key, value } => {
            let handle = hub.registry().get_or_open(&db)?;
            handle.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { db, key } => {
            let handle = hub.registry().get_or_open(&db)?;
            handle.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Id { count, numeric } => {
            for _ in 0..count {
                if numeric {
                    println!("{}", hub.ids().next_int());
                } else {
                    println!("{}", hub.ids().next_string());
                }
            }
        }
    }

    hub.shutdown()
}
