//! cadangkan - MySQL backup lifecycle manager.

mod commands;
mod scheduler;

use anyhow::Result;
use cadangkan_core::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "MySQL backup lifecycle manager", long_about = None)]
struct Cli {
    /// Path to configuration file (default: ~/.cadangkan/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a backup of a configured database
    Backup {
        /// Database profile name from the config file
        profile: String,

        /// Dump table definitions only, no rows
        #[arg(long)]
        schema_only: bool,

        /// Back up only these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Skip these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        exclude_tables: Vec<String>,

        /// Compression codec: gzip or none
        #[arg(long)]
        compression: Option<String>,
    },

    /// Restore a backup into a database
    Restore {
        profile: String,

        /// Specific backup id; defaults to the newest completed backup
        #[arg(long)]
        backup_id: Option<String>,

        /// Restore into this database instead of the original source
        #[arg(long)]
        target: Option<String>,

        /// Create the target database if it does not exist
        #[arg(long)]
        create_database: bool,

        /// Validate only; do not touch the target
        #[arg(long)]
        dry_run: bool,

        /// Back up the target database before overwriting it
        #[arg(long)]
        backup_first: bool,
    },

    /// List backups of a profile, newest first
    List { profile: String },

    /// Show the backup health score of a profile
    Health { profile: String },

    /// Apply the retention policy to a profile's backups
    Prune {
        profile: String,

        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify a backup artifact (checksum + decompression walk)
    Verify {
        profile: String,

        #[arg(long)]
        backup_id: Option<String>,
    },

    /// Run cron-scheduled backups in the foreground
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else if cli.config.is_some() {
        anyhow::bail!("Config file not found: {}", config_path.display());
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "No config file found, using built-in defaults"
        );
        Config::default()
    };

    match cli.command {
        Commands::Backup {
            profile,
            schema_only,
            tables,
            exclude_tables,
            compression,
        } => {
            commands::backup(
                &config,
                &profile,
                schema_only,
                tables,
                exclude_tables,
                compression.as_deref(),
            )
            .await
        }
        Commands::Restore {
            profile,
            backup_id,
            target,
            create_database,
            dry_run,
            backup_first,
        } => {
            commands::restore(
                &config,
                &profile,
                backup_id,
                target,
                create_database,
                dry_run,
                backup_first,
            )
            .await
        }
        Commands::List { profile } => commands::list(&config, &profile),
        Commands::Health { profile } => commands::health(&config, &profile),
        Commands::Prune { profile, dry_run } => commands::prune(&config, &profile, dry_run),
        Commands::Verify { profile, backup_id } => {
            commands::verify(&config, &profile, backup_id.as_deref()).await
        }
        Commands::Schedule => scheduler::run(config).await,
    }
}
