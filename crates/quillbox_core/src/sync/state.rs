//! Backup status owned by the orchestrator.
//!
//! # Invariants
//! - At most one of `BackingUp` / `Restoring` holds at any time.
//! - Automatic triggers only start a backup when the session is `Ready`.
//! - `Success` is transient and reverts to `Idle` after a fixed delay.

use crate::snapshot::metadata::BackupMetadata;
use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Idle,
    BackingUp,
    Restoring,
    Error,
    Success,
}

impl BackupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BackingUp => "backing-up",
            Self::Restoring => "restoring",
            Self::Error => "error",
            Self::Success => "success",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::BackingUp | Self::Restoring)
    }
}

impl Display for BackupState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the session stands with respect to the startup decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Startup has not reached a decision yet (offline, remote check failed).
    Starting,
    /// A remote snapshot was offered for restore and the caller has not
    /// answered; automatic backups would overwrite it with an empty store.
    AwaitingRestore(BackupMetadata),
    /// Normal operation.
    Ready,
}

/// What asked for a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupTrigger {
    Mutation,
    Periodic,
    Manual,
    Startup,
    Migration,
}

impl BackupTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
            Self::Startup => "startup",
            Self::Migration => "migration",
        }
    }

    /// Manual backups are an explicit user decision and bypass the session
    /// gate.
    pub fn is_automatic(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another backup is running; the trigger is dropped, not queued.
    InFlight,
    Restoring,
    SessionNotReady,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Restoring => "restoring",
            Self::SessionNotReady => "session_not_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Completed(BackupMetadata),
    Skipped(SkipReason),
}

impl BackupOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Snapshot of the orchestrator's status for collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStatus {
    pub state: BackupState,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub last_backup_error: Option<String>,
    pub is_remote_connected: bool,
    pub phase: SessionPhase,
}

impl Default for BackupStatus {
    fn default() -> Self {
        Self {
            state: BackupState::Idle,
            last_backup_time: None,
            last_backup_error: None,
            is_remote_connected: false,
            phase: SessionPhase::Starting,
        }
    }
}

impl BackupStatus {
    /// Metadata of the snapshot currently offered for restore.
    pub fn pending_restore(&self) -> Option<&BackupMetadata> {
        match &self.phase {
            SessionPhase::AwaitingRestore(metadata) => Some(metadata),
            _ => None,
        }
    }

    /// Claims the status for a backup, or says why the trigger is dropped.
    pub(crate) fn begin_backup(&mut self, trigger: BackupTrigger) -> Result<(), SkipReason> {
        match self.state {
            BackupState::BackingUp => return Err(SkipReason::InFlight),
            BackupState::Restoring => return Err(SkipReason::Restoring),
            _ => {}
        }
        if trigger.is_automatic() && self.phase != SessionPhase::Ready {
            return Err(SkipReason::SessionNotReady);
        }
        self.state = BackupState::BackingUp;
        Ok(())
    }

    pub(crate) fn finish_backup(&mut self, completed_at: DateTime<Utc>) {
        self.state = BackupState::Success;
        self.last_backup_time = Some(completed_at);
        self.last_backup_error = None;
        self.is_remote_connected = true;
    }

    /// Claims the status for a restore; returns the blocking state otherwise.
    pub(crate) fn begin_restore(&mut self) -> Result<(), BackupState> {
        if self.state.is_busy() {
            return Err(self.state);
        }
        self.state = BackupState::Restoring;
        Ok(())
    }

    pub(crate) fn finish_restore(&mut self) {
        self.state = BackupState::Idle;
        self.last_backup_error = None;
        self.phase = SessionPhase::Ready;
    }

    pub(crate) fn fail(&mut self, message: String, connectivity_lost: bool) {
        self.state = BackupState::Error;
        self.last_backup_error = Some(message);
        if connectivity_lost {
            self.is_remote_connected = false;
        }
    }

    pub(crate) fn revert_success(&mut self) {
        if self.state == BackupState::Success {
            self.state = BackupState::Idle;
        }
    }
}
