//! Consent revision engine CLI
//!
//! Usage:
//!   consent create   - Create a business object from a JSON file
//!   consent update   - Update a business object from a JSON file
//!   consent delete   - Soft-delete a business object
//!   consent history  - List an object's revisions
//!   consent show     - Show one revision
//!   consent recreate - Rebuild an object as of a revision
//!   consent verify   - Verify an object's revision chain
//!   consent repair   - Rewrite a live object from its chain head
//!   consent reconcile - Rewrite every live object that disagrees with its chain head
//!   consent stats    - Show store statistics
//!
//! Configuration comes from `CONSENT_*` environment variables; flags
//! override them.

use clap::{Parser, Subcommand};
use consent_core::logging::LogLevel;
use consent_core::{HashAlgorithm, SchemaName};
use consent_db::EngineConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "consent")]
#[command(about = "Consent revision chain CLI")]
#[command(version)]
struct Cli {
    /// sled data directory (empty for in-memory)
    #[arg(long)]
    data_dir: Option<String>,

    /// Revision hash algorithm (sha1, sha256)
    #[arg(long, value_parser = HashAlgorithm::parse)]
    hash_algorithm: Option<HashAlgorithm>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_parser = LogLevel::parse)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a business object and its root revision
    Create {
        #[arg(short, long, value_parser = SchemaName::parse)]
        schema: SchemaName,
        /// JSON file holding the object
        #[arg(short, long)]
        file: PathBuf,
        /// Owning organisation
        #[arg(short, long, default_value = "")]
        organisation: String,
        #[command(flatten)]
        actor: ActorArgs,
    },

    /// Update a business object, appending a revision
    Update {
        #[arg(short, long, value_parser = SchemaName::parse)]
        schema: SchemaName,
        /// JSON file holding the updated object
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        actor: ActorArgs,
    },

    /// Soft-delete a business object
    Delete {
        #[arg(short, long, value_parser = SchemaName::parse)]
        schema: SchemaName,
        /// Object ID
        id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },

    /// List an object's revisions, root first
    History {
        /// Object ID
        object_id: String,
    },

    /// Show one revision
    Show {
        /// Revision ID
        revision_id: String,
    },

    /// Rebuild an object as it was at a revision
    Recreate {
        #[arg(short, long, value_parser = SchemaName::parse)]
        schema: SchemaName,
        /// Revision ID
        revision_id: String,
    },

    /// Verify an object's revision chain
    Verify {
        /// Object ID
        object_id: String,
    },

    /// Rewrite a live object from its chain head
    Repair {
        #[arg(short, long, value_parser = SchemaName::parse)]
        schema: SchemaName,
        /// Object ID
        id: String,
        /// Organisation used if the live object is missing
        #[arg(short, long, default_value = "")]
        organisation: String,
    },

    /// Rewrite every live object that disagrees with its chain head
    Reconcile {
        /// Organisation used for live objects that are missing
        #[arg(short, long, default_value = "")]
        organisation: String,
    },

    /// Show store statistics
    Stats,
}

#[derive(clap::Args)]
struct ActorArgs {
    /// Acting user or service
    #[arg(short, long)]
    actor: String,
    /// The actor is the individual the data belongs to
    #[arg(long)]
    individual: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    init_logging(config.log_level, cli.log_json);
    tracing::debug!(
        data_dir = %config.storage.data_dir,
        hash_algorithm = %config.hash_algorithm,
        "Configuration loaded"
    );

    if let Err(e) = commands::run(cli.command, &config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> consent_core::RevisionResult<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(algorithm) = cli.hash_algorithm {
        config.hash_algorithm = algorithm;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    Ok(config)
}

/// Initialize logging with tracing; `RUST_LOG` takes precedence
fn init_logging(level: LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "consent_cli={level},consent_db={level},consent_core={level}",
            level = level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
