//! Session-scoped backup engine.
//!
//! # Responsibility
//! - Own the backup status and every timer of one session.
//! - Run the backup pipeline: export, encode, upload canonical and
//!   historical copies, write metadata, rotate.
//! - Run caller-initiated restores through the replace-all importer.
//!
//! # Invariants
//! - State transitions happen under one lock; the in-flight check and the
//!   switch to `BackingUp` are atomic.
//! - Metadata is only written after both snapshot uploads succeeded.
//! - Rotation failures never fail a backup.
//! - Store work runs on the blocking pool, never on async worker threads.

use super::scheduler::CoalescingScheduler;
use super::startup::StartupDecision;
use super::state::{BackupOutcome, BackupStatus, BackupTrigger, SessionPhase};
use super::{BackupError, BackupResult, SharedConnection};
use crate::config::BackupConfig;
use crate::legacy::LegacyStore;
use crate::remote::{
    historical_name, RemoteError, RemoteTransport, RotationPolicy, LATEST_BACKUP_NAME,
    METADATA_NAME,
};
use crate::snapshot::codec;
use crate::snapshot::metadata::BackupMetadata;
use crate::store::{restore_snapshot, RestoreReport, SqliteSnapshotStore};
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Backup engine for one signed-in session.
///
/// Dropping the orchestrator stops its timers; a backup that already
/// started runs to completion.
pub struct BackupOrchestrator {
    engine: Arc<Engine>,
}

pub(super) struct Engine {
    pub(super) config: BackupConfig,
    pub(super) transport: Arc<dyn RemoteTransport>,
    store: SharedConnection,
    pub(super) legacy: Option<LegacyStore>,
    rotation: RotationPolicy,
    status: Mutex<BackupStatus>,
    debounce: CoalescingScheduler,
    success_reset: CoalescingScheduler,
    periodic: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    startup_gate: tokio::sync::Mutex<()>,
}

impl BackupOrchestrator {
    /// Builds an idle engine. The legacy store comes from
    /// `config.legacy_db_path` when set.
    ///
    /// Must be called inside a tokio runtime. Every timer runs on that
    /// runtime, so the sync entry points work from any thread afterwards.
    pub fn new(
        config: BackupConfig,
        transport: Arc<dyn RemoteTransport>,
        store: SharedConnection,
    ) -> Self {
        Self::with_runtime(config, transport, store, Handle::current())
    }

    /// Like [`BackupOrchestrator::new`], bound to an explicit runtime.
    pub fn with_runtime(
        config: BackupConfig,
        transport: Arc<dyn RemoteTransport>,
        store: SharedConnection,
        runtime: Handle,
    ) -> Self {
        let legacy = config.legacy_db_path.clone().map(LegacyStore::new);
        Self {
            engine: Arc::new(Engine {
                rotation: RotationPolicy::new(config.max_backups),
                debounce: CoalescingScheduler::with_handle(config.debounce(), runtime.clone()),
                success_reset: CoalescingScheduler::with_handle(
                    config.success_reset(),
                    runtime.clone(),
                ),
                runtime,
                config,
                transport,
                store,
                legacy,
                status: Mutex::new(BackupStatus::default()),
                periodic: Mutex::new(None),
                startup_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Runs the startup decision and starts the periodic timer.
    ///
    /// While the decision stays undecided (offline, remote check failed)
    /// every periodic tick retries it.
    pub async fn init(&self) -> StartupDecision {
        let decision = self.engine.run_startup().await;
        self.engine.start_periodic();
        decision
    }

    /// Stops the debounce, success-reset and periodic timers.
    pub fn dispose(&self) {
        self.engine.stop_timers();
        info!("event=backup_dispose module=sync status=ok");
    }

    pub fn status(&self) -> BackupStatus {
        self.engine.status().clone()
    }

    pub fn config(&self) -> &BackupConfig {
        &self.engine.config
    }

    /// Whether any collection of the canonical store holds a row.
    pub async fn has_local_data(&self) -> BackupResult<bool> {
        self.engine.has_local_data().await
    }

    /// Metadata of the current remote backup, `None` when there is none.
    pub async fn remote_metadata(&self) -> BackupResult<Option<BackupMetadata>> {
        self.engine.remote_metadata().await
    }

    /// Immediate backup on user request; ignores the session gate.
    pub async fn manual_backup(&self) -> BackupResult<BackupOutcome> {
        self.engine.attempt_backup(BackupTrigger::Manual).await
    }

    /// Records a local mutation; a backup follows once mutations pause for
    /// the debounce window. Safe to call from threads outside the runtime.
    pub fn notify_mutation(&self) {
        self.engine.arm_backup(BackupTrigger::Mutation);
    }

    pub async fn attempt_backup(&self, trigger: BackupTrigger) -> BackupResult<BackupOutcome> {
        self.engine.attempt_backup(trigger).await
    }

    /// Replaces the local store with the latest remote snapshot.
    pub async fn restore(&self) -> BackupResult<RestoreReport> {
        self.engine.restore().await
    }

    /// Declines the pending restore offer; automatic backups resume.
    pub fn dismiss_restore(&self) {
        let mut status = self.engine.status();
        if let SessionPhase::AwaitingRestore(_) = status.phase {
            status.phase = SessionPhase::Ready;
            info!("event=restore_dismiss module=sync status=ok");
        }
    }
}

impl Drop for BackupOrchestrator {
    fn drop(&mut self) {
        self.engine.stop_timers();
    }
}

impl Engine {
    pub(super) fn status(&self) -> MutexGuard<'_, BackupStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn set_phase(&self, phase: SessionPhase) {
        self.status().phase = phase;
    }

    pub(super) fn set_connected(&self, connected: bool) {
        self.status().is_remote_connected = connected;
    }

    /// Serializes startup runs; `None` while another run holds the gate.
    pub(super) fn try_enter_startup(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.startup_gate.try_lock().ok()
    }

    /// Runs `task` against the canonical store on the blocking pool.
    pub(super) async fn with_store<T, F>(&self, task: F) -> BackupResult<T>
    where
        F: FnOnce(&Connection) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let conn = store.lock().unwrap_or_else(PoisonError::into_inner);
            task(&conn)
        })
        .await
        .map_err(|err| BackupError::Worker(err.to_string()))
    }

    pub(super) async fn has_local_data(&self) -> BackupResult<bool> {
        let has_data = self
            .with_store(|conn| SqliteSnapshotStore::try_new(conn)?.has_data())
            .await??;
        Ok(has_data)
    }

    pub(super) async fn remote_metadata(&self) -> BackupResult<Option<BackupMetadata>> {
        match self.transport.download(METADATA_NAME).await {
            Ok(bytes) => Ok(Some(BackupMetadata::from_bytes(&bytes)?)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub(super) fn arm_backup(self: &Arc<Self>, trigger: BackupTrigger) {
        let engine = Arc::clone(self);
        self.debounce.arm(move || async move {
            // Failures are already recorded in the status and the log.
            let _ = engine.attempt_backup(trigger).await;
        });
    }

    pub(super) async fn attempt_backup(
        self: &Arc<Self>,
        trigger: BackupTrigger,
    ) -> BackupResult<BackupOutcome> {
        let claimed = self.status().begin_backup(trigger);
        if let Err(reason) = claimed {
            info!(
                "event=backup_run module=sync status=skip trigger={} reason={}",
                trigger.as_str(),
                reason.as_str()
            );
            return Ok(BackupOutcome::Skipped(reason));
        }

        let started_at = Instant::now();
        info!(
            "event=backup_run module=sync status=start trigger={}",
            trigger.as_str()
        );
        match self.run_backup().await {
            Ok(metadata) => {
                self.status().finish_backup(metadata.timestamp);
                self.schedule_success_reset();
                info!(
                    "event=backup_run module=sync status=ok trigger={} books={} total_records={} duration_ms={}",
                    trigger.as_str(),
                    metadata.book_count,
                    metadata.total_records,
                    started_at.elapsed().as_millis()
                );
                Ok(BackupOutcome::Completed(metadata))
            }
            Err(err) => {
                self.status().fail(err.to_string(), err.is_connectivity());
                error!(
                    "event=backup_run module=sync status=error trigger={} error_code={} duration_ms={} error={err}",
                    trigger.as_str(),
                    err.code(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    async fn run_backup(&self) -> BackupResult<BackupMetadata> {
        self.transport.ensure_folder().await?;

        let snapshot = self
            .with_store(|conn| SqliteSnapshotStore::try_new(conn)?.export())
            .await??;
        let taken_at = Utc::now();
        let payload = codec::to_bytes(&snapshot, taken_at)
            .map_err(|err| BackupError::Encode(err.to_string()))?;
        let historical = historical_name(taken_at);

        tokio::try_join!(
            self.transport.upload(LATEST_BACKUP_NAME, &payload),
            self.transport.upload(&historical, &payload),
        )?;

        let metadata =
            BackupMetadata::describe(&snapshot, taken_at, self.config.owner_identity.as_str());
        let metadata_bytes = metadata
            .to_bytes()
            .map_err(|err| BackupError::Encode(err.to_string()))?;
        self.transport.upload(METADATA_NAME, &metadata_bytes).await?;

        self.rotate().await;
        Ok(metadata)
    }

    /// Best-effort: a failed listing or delete is logged and skipped.
    async fn rotate(&self) {
        let backups = match self.transport.list_backups().await {
            Ok(backups) => backups,
            Err(err) => {
                warn!(
                    "event=backup_rotate module=sync status=error stage=list error_code={} error={err}",
                    err.code()
                );
                return;
            }
        };

        let plan = self.rotation.plan(&backups);
        let mut deleted = 0usize;
        for handle in plan.delete {
            match self.transport.delete(handle).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!(
                    "event=backup_rotate module=sync status=error stage=delete name={} error_code={} error={err}",
                    handle.name,
                    err.code()
                ),
            }
        }
        info!(
            "event=backup_rotate module=sync status=ok kept={} deleted={deleted}",
            plan.keep.len()
        );
    }

    fn schedule_success_reset(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        self.success_reset.arm(move || async move {
            if let Some(engine) = engine.upgrade() {
                engine.status().revert_success();
            }
        });
    }

    pub(super) async fn restore(&self) -> BackupResult<RestoreReport> {
        let claimed = self.status().begin_restore();
        if let Err(state) = claimed {
            warn!(
                "event=restore_run module=sync status=skip reason=busy state={}",
                state.as_str()
            );
            return Err(BackupError::Busy(state));
        }

        let started_at = Instant::now();
        info!("event=restore_run module=sync status=start");
        match self.run_restore().await {
            Ok(report) => {
                self.status().finish_restore();
                info!(
                    "event=restore_run module=sync status=ok total_records={} duration_ms={}",
                    report.total(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                self.status().fail(err.to_string(), err.is_connectivity());
                error!(
                    "event=restore_run module=sync status=error error_code={} duration_ms={} error={err}",
                    err.code(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    async fn run_restore(&self) -> BackupResult<RestoreReport> {
        let bytes = match self.transport.download(LATEST_BACKUP_NAME).await {
            Ok(bytes) => bytes,
            Err(RemoteError::NotFound(_)) => return Err(BackupError::NoBackup),
            Err(err) => return Err(err.into()),
        };
        let snapshot = codec::decode_bytes(&bytes)?;
        let report = self
            .with_store(move |conn| restore_snapshot(conn, &snapshot))
            .await??;
        Ok(report)
    }

    fn start_periodic(self: &Arc<Self>) {
        let period = self.config.periodic_interval();
        let engine = Arc::downgrade(self);
        let ticker = self.runtime.spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                tokio::spawn(async move { engine.on_periodic_tick().await });
            }
        });

        let mut periodic = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = periodic.replace(ticker) {
            previous.abort();
        }
    }

    async fn on_periodic_tick(self: Arc<Self>) {
        let undecided = self.status().phase == SessionPhase::Starting;
        if undecided {
            let decision = self.run_startup().await;
            info!(
                "event=backup_periodic module=sync status=ok action=startup_retry decision={}",
                decision.as_str()
            );
            return;
        }
        let _ = self.attempt_backup(BackupTrigger::Periodic).await;
    }

    fn stop_timers(&self) {
        self.debounce.cancel();
        self.success_reset.cancel();
        if let Some(ticker) = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.abort();
        }
    }
}
