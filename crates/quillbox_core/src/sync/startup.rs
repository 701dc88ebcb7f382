//! Session-start decision.
//!
//! Runs as an explicit step machine so each branch is logged and the
//! precedence stays visible: connectivity, then local data, then the legacy
//! database, then the remote backup.

use super::orchestrator::Engine;
use super::state::{BackupOutcome, BackupTrigger, SessionPhase};
use crate::legacy::{self, MigrationReport};
use crate::snapshot::metadata::BackupMetadata;
use log::{info, warn};
use std::sync::Arc;

/// Where startup ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupDecision {
    /// Remote unreachable; retried on the next periodic tick.
    Offline(String),
    /// Local data exists and was (re)backed up silently.
    LocalData { refreshed: bool },
    /// Legacy data moved into the canonical store; a backup is scheduled.
    Migrated(MigrationReport),
    /// The remote holds a snapshot with books; the caller decides.
    RestoreAvailable(BackupMetadata),
    /// Nothing anywhere; normal operation.
    FreshStart,
    /// Startup could not decide (store or remote failure).
    Deferred(String),
    /// Another startup run is in progress.
    AlreadyRunning,
}

impl StartupDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline(_) => "offline",
            Self::LocalData { .. } => "local_data",
            Self::Migrated(_) => "migrated",
            Self::RestoreAvailable(_) => "restore_available",
            Self::FreshStart => "fresh_start",
            Self::Deferred(_) => "deferred",
            Self::AlreadyRunning => "already_running",
        }
    }
}

enum Step {
    CheckConnectivity,
    InspectLocalStore,
    CheckLegacy,
    InspectRemote,
    Finished(StartupDecision),
}

impl Engine {
    pub(super) async fn run_startup(self: &Arc<Self>) -> StartupDecision {
        let Some(_running) = self.try_enter_startup() else {
            return StartupDecision::AlreadyRunning;
        };

        let mut step = Step::CheckConnectivity;
        loop {
            step = match step {
                Step::CheckConnectivity => self.check_connectivity().await,
                Step::InspectLocalStore => self.inspect_local_store().await,
                Step::CheckLegacy => self.check_legacy().await,
                Step::InspectRemote => self.inspect_remote().await,
                Step::Finished(decision) => {
                    info!(
                        "event=backup_startup module=sync status=ok decision={}",
                        decision.as_str()
                    );
                    return decision;
                }
            };
        }
    }

    async fn check_connectivity(&self) -> Step {
        match self.transport.check_connectivity().await {
            Ok(()) => {
                self.set_connected(true);
                Step::InspectLocalStore
            }
            Err(err) => {
                self.set_connected(false);
                warn!(
                    "event=backup_startup module=sync status=offline error_code={} error={err}",
                    err.code()
                );
                Step::Finished(StartupDecision::Offline(err.to_string()))
            }
        }
    }

    async fn inspect_local_store(self: &Arc<Self>) -> Step {
        match self.has_local_data().await {
            Ok(true) => {
                self.set_phase(SessionPhase::Ready);
                let refreshed = matches!(
                    self.attempt_backup(BackupTrigger::Startup).await,
                    Ok(BackupOutcome::Completed(_))
                );
                Step::Finished(StartupDecision::LocalData { refreshed })
            }
            Ok(false) => Step::CheckLegacy,
            Err(err) => Step::Finished(StartupDecision::Deferred(err.to_string())),
        }
    }

    async fn check_legacy(self: &Arc<Self>) -> Step {
        let Some(source) = self.legacy.clone() else {
            return Step::InspectRemote;
        };

        let detector = source.clone();
        let present = tokio::task::spawn_blocking(move || detector.has_legacy_data())
            .await
            .unwrap_or(false);
        if !present {
            return Step::InspectRemote;
        }

        match self
            .with_store(move |conn| legacy::migrate(&source, conn))
            .await
        {
            Ok(Ok(Some(report))) => {
                self.set_phase(SessionPhase::Ready);
                self.arm_backup(BackupTrigger::Migration);
                Step::Finished(StartupDecision::Migrated(report))
            }
            Ok(Ok(None)) => Step::InspectRemote,
            Ok(Err(err)) => {
                warn!("event=legacy_migrate module=sync status=error error={err}");
                Step::InspectRemote
            }
            Err(err) => {
                warn!(
                    "event=legacy_migrate module=sync status=error error_code={} error={err}",
                    err.code()
                );
                Step::InspectRemote
            }
        }
    }

    async fn inspect_remote(&self) -> Step {
        match self.remote_metadata().await {
            Ok(Some(metadata)) if metadata.has_books() => {
                info!(
                    "event=backup_startup module=sync status=restore_available books={} timestamp={}",
                    metadata.book_count,
                    metadata.timestamp.to_rfc3339()
                );
                self.set_phase(SessionPhase::AwaitingRestore(metadata.clone()));
                Step::Finished(StartupDecision::RestoreAvailable(metadata))
            }
            Ok(_) => {
                self.set_phase(SessionPhase::Ready);
                Step::Finished(StartupDecision::FreshStart)
            }
            Err(err) => {
                warn!(
                    "event=backup_startup module=sync status=error stage=remote_metadata error_code={} error={err}",
                    err.code()
                );
                Step::Finished(StartupDecision::Deferred(err.to_string()))
            }
        }
    }
}
