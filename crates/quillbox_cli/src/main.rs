//! Command-line front end for the quillbox backup engine.
//!
//! # Responsibility
//! - Wire a canonical store file, a config file and a Drive credential into
//!   one `BackupOrchestrator`.
//! - Expose the engine operations for scripting and manual recovery.

use clap::{Parser, Subcommand};
use quillbox_core::{
    default_log_level, init_logging, open_db, BackupConfig, BackupOrchestrator, BackupOutcome,
    BackupTrigger, DriveTransport, HttpDriveApi, RemoteTransport, SharedConnection,
    StartupDecision, StaticToken,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

const TOKEN_ENV: &str = "QUILLBOX_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "quillbox", version, about = "Back up and restore a writing workspace")]
struct Cli {
    /// Canonical workspace database.
    #[arg(long, value_name = "PATH")]
    db: PathBuf,
    /// JSON config file; `QUILLBOX_*` variables are used when absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Absolute directory for rolling log files.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Local and remote backup state.
    Status,
    /// Back up now.
    Backup,
    /// Replace the local workspace with the latest remote backup.
    Restore,
    /// Run the session-start decision (backup, migrate or offer restore).
    Init {
        /// Perform the restore when one is offered.
        #[arg(long)]
        accept_restore: bool,
    },
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        println!("quillbox {}", quillbox_core::core_version());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    if let Some(log_dir) = cli.log_dir.as_ref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).map_err(|err| err.to_string())?;
    }

    let config = match cli.config.as_ref() {
        Some(path) => BackupConfig::load(path),
        None => BackupConfig::from_env(),
    }
    .map_err(|err| err.to_string())?;

    let conn = open_db(&cli.db).map_err(|err| err.to_string())?;
    let store: SharedConnection = Arc::new(Mutex::new(conn));
    let token = std::env::var(TOKEN_ENV).unwrap_or_default();
    let api = HttpDriveApi::new(
        config.api_base_url.clone(),
        config.upload_base_url.clone(),
        Arc::new(StaticToken::new(token)),
    )
    .map_err(|err| err.to_string())?;
    let transport: Arc<dyn RemoteTransport> =
        Arc::new(DriveTransport::new(api, config.folder_name.clone()));
    let orchestrator = BackupOrchestrator::new(config, transport, store);

    match cli.command {
        Command::Status => print_status(&orchestrator).await,
        Command::Backup => match orchestrator.manual_backup().await {
            Ok(BackupOutcome::Completed(metadata)) => {
                println!(
                    "backed up {} books ({} records) at {}",
                    metadata.book_count,
                    metadata.total_records,
                    metadata.timestamp.to_rfc3339()
                );
                Ok(())
            }
            Ok(BackupOutcome::Skipped(reason)) => {
                println!("backup skipped: {}", reason.as_str());
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        },
        Command::Restore => restore(&orchestrator).await,
        Command::Init { accept_restore } => {
            let decision = orchestrator.init().await;
            orchestrator.dispose();
            describe(&decision);
            match decision {
                StartupDecision::RestoreAvailable(_) if accept_restore => {
                    restore(&orchestrator).await
                }
                // The debounced follow-up backup dies with this process.
                StartupDecision::Migrated(_) => orchestrator
                    .attempt_backup(BackupTrigger::Migration)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
                _ => Ok(()),
            }
        }
        Command::Version => Ok(()),
    }
}

async fn restore(orchestrator: &BackupOrchestrator) -> Result<(), String> {
    let report = orchestrator.restore().await.map_err(|err| err.to_string())?;
    println!("restored {} records", report.total());
    for (collection, count) in report.inserted {
        println!("  {collection}: {count}");
    }
    Ok(())
}

async fn print_status(orchestrator: &BackupOrchestrator) -> Result<(), String> {
    let has_local = orchestrator
        .has_local_data()
        .await
        .map_err(|err| err.to_string())?;
    println!("local data: {}", if has_local { "yes" } else { "no" });

    match orchestrator.remote_metadata().await {
        Ok(Some(metadata)) => println!(
            "remote backup: {} books, {} records, {} (format v{})",
            metadata.book_count,
            metadata.total_records,
            metadata.timestamp.to_rfc3339(),
            metadata.version
        ),
        Ok(None) => println!("remote backup: none"),
        Err(err) => println!("remote backup: unavailable ({err})"),
    }
    Ok(())
}

fn describe(decision: &StartupDecision) {
    match decision {
        StartupDecision::Offline(reason) => println!("offline: {reason}"),
        StartupDecision::LocalData { refreshed } => {
            println!("local data present; backup refreshed: {refreshed}")
        }
        StartupDecision::Migrated(report) => {
            println!(
                "migrated {} books ({} records) from the legacy database",
                report.books,
                report.restored.total()
            );
            if report.orphans_dropped > 0 {
                println!("skipped {} legacy records without a parent", report.orphans_dropped);
            }
            if !report.legacy_removed {
                println!("the legacy database could not be deleted; see the log");
            }
        }
        StartupDecision::RestoreAvailable(metadata) => println!(
            "remote backup with {} books from {} is available",
            metadata.book_count,
            metadata.timestamp.to_rfc3339()
        ),
        StartupDecision::FreshStart => println!("no data anywhere; starting fresh"),
        StartupDecision::Deferred(reason) => println!("startup deferred: {reason}"),
        StartupDecision::AlreadyRunning => println!("startup already running"),
    }
}
