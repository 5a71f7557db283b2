//! Shuigong backup - command line entry point
//!
//! Creates, restores, lists and prunes backup archives of the local data
//! directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shuigong_backup::utils::{self, format::format_bytes};
use shuigong_backup::{config::Config, BackupRecord, BackupService};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory used when no configuration file is given
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a full backup
    Backup,
    /// Restore from an archive
    Restore {
        /// Archive to restore
        archive: PathBuf,
    },
    /// List backups, newest first
    List,
    /// Delete archives beyond the retention limit
    Prune,
    /// Delete one archive by file name
    Delete {
        /// Archive file name, as shown by `list`
        file: String,
    },
    /// Back up only if the auto-backup interval has elapsed
    Auto,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match (&args.config, &args.data_dir) {
        (Some(config_path), _) => Config::from_file(config_path)?,
        (None, Some(data_dir)) => Config::with_data_dir(data_dir),
        (None, None) => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting shuigong-backup v{} (backups: {})",
        env!("CARGO_PKG_VERSION"),
        config.backup.directory.display()
    );

    let service = BackupService::from_config(&config);
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match args.command {
        Command::Backup => {
            let record = service.create_full_backup_with_cancel(cancel).await?;
            print_record(&record);
        }
        Command::Restore { archive } => {
            let restored = service.restore_backup_with_cancel(&archive, cancel).await?;
            let components: Vec<&str> = restored.restored_components.iter().map(|c| c.as_str()).collect();
            println!("Restored {} [{}]", restored.backup_file_name, components.join(", "));
        }
        Command::List => {
            for record in service.list_backups().await? {
                print_record(&record);
            }
        }
        Command::Prune => {
            let removed = service.prune().await?;
            println!("Removed {} backup(s)", removed);
        }
        Command::Delete { file } => {
            let backups = service.list_backups().await?;
            let record = backups
                .iter()
                .find(|r| r.file_name == file)
                .ok_or_else(|| anyhow::anyhow!("No backup named {}", file))?;
            service.delete_backup(record).await?;
            println!("Deleted {}", record.file_name);
        }
        Command::Auto => {
            if service.should_auto_backup() {
                let record = service.create_full_backup_with_cancel(cancel).await?;
                print_record(&record);
            } else {
                tracing::info!("Auto backup not due");
            }
        }
    }

    Ok(())
}

fn print_record(record: &BackupRecord) {
    println!(
        "{}  {:>10}  {}",
        record.file_name,
        format_bytes(record.size_bytes),
        record.metadata.version
    );
}

/// Cancel `token` on SIGINT or SIGTERM. The running operation stops at the
/// next entry boundary.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), cancelling"),
        _ = terminate => tracing::info!("Received SIGTERM, cancelling"),
    }
    token.cancel();
}
