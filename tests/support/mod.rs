#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use replistate::{
    BackupCallback, BackupError, BackupInfo, BackupKind, BackupRestoreManager, BackupVersion,
    CancelToken, InMemoryLog, InitializationParameters, LogError, LogVersion, Lsn, OpenMode,
    PartitionHandle, ProviderId, RecoveryOutcome, ReplicaLifecycleController, ReplicaRole,
    ReplicatedLog, RestorePolicy, SharedMetrics, StateManager, StaticSettingsSource, TxId,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn init_params() -> InitializationParameters {
    InitializationParameters {
        partition_id: Uuid::new_v4(),
        replica_id: 1,
        service_name: "fabric-test-service".to_string(),
        work_directory: std::env::temp_dir(),
    }
}

pub fn partition() -> PartitionHandle {
    PartitionHandle {
        partition_id: Uuid::new_v4(),
    }
}

/// Opens a primary replica over an in-memory log with default settings.
pub fn open_primary() -> (Arc<StateManager>, Arc<InMemoryLog>) {
    let log = Arc::new(InMemoryLog::new());
    let source = Arc::new(StaticSettingsSource::new(HashMap::new()));
    let lifecycle = Arc::new(ReplicaLifecycleController::new(
        log.clone(),
        None,
        source,
        SharedMetrics::default(),
    ));
    lifecycle.initialize(init_params()).unwrap();
    lifecycle.open(OpenMode::New, partition()).unwrap();
    lifecycle.change_role(ReplicaRole::Primary).unwrap();
    (
        Arc::new(StateManager::new(lifecycle, SharedMetrics::default())),
        log,
    )
}

/// Log double that appends lifecycle calls to a shared journal before
/// delegating to an in-memory log.
pub struct RecordingLog {
    inner: InMemoryLog,
    journal: Journal,
}

impl RecordingLog {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemoryLog::new(),
            journal,
        }
    }

    fn record(&self, event: impl Into<String>) {
        self.journal.lock().push(event.into());
    }
}

impl ReplicatedLog for RecordingLog {
    fn open(&self, mode: OpenMode) -> Result<(), LogError> {
        self.record("log.open");
        self.inner.open(mode)
    }

    fn change_role(&self, role: ReplicaRole) -> Result<(), LogError> {
        self.record(format!("log.change_role:{role}"));
        self.inner.change_role(role)
    }

    fn close(&self) -> Result<(), LogError> {
        self.record("log.close");
        self.inner.close()
    }

    fn abort(&self) {
        self.record("log.abort");
        self.inner.abort()
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    fn is_readable(&self) -> bool {
        self.inner.is_readable()
    }

    fn begin_transaction(&self, tx: TxId) -> Result<(), LogError> {
        self.inner.begin_transaction(tx)
    }

    fn append(
        &self,
        tx: TxId,
        op_seq: u64,
        provider_id: ProviderId,
        metadata: &[u8],
        redo: &[u8],
        undo: Option<&[u8]>,
    ) -> Result<Lsn, LogError> {
        self.inner.append(tx, op_seq, provider_id, metadata, redo, undo)
    }

    fn commit_transaction(&self, tx: TxId) -> Result<Lsn, LogError> {
        self.inner.commit_transaction(tx)
    }

    fn abort_transaction(&self, tx: TxId) -> Result<(), LogError> {
        self.inner.abort_transaction(tx)
    }

    fn current_version(&self) -> LogVersion {
        self.inner.current_version()
    }

    fn complete_restore(&self, version: LogVersion) -> Result<(), LogError> {
        self.record("log.complete_restore");
        self.inner.complete_restore(version)
    }
}

/// Backup double recording lifecycle calls and returning a scripted recovery
/// outcome.
pub struct RecordingBackupManager {
    journal: Journal,
    recover_outcome: Mutex<RecoveryOutcome>,
}

impl RecordingBackupManager {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            recover_outcome: Mutex::new(RecoveryOutcome::StateUnchanged),
        }
    }

    pub fn script_recovery(&self, outcome: RecoveryOutcome) {
        *self.recover_outcome.lock() = outcome;
    }

    fn record(&self, event: impl Into<String>) {
        self.journal.lock().push(event.into());
    }
}

impl BackupRestoreManager for RecordingBackupManager {
    fn open(&self) -> Result<(), BackupError> {
        self.record("backup.open");
        Ok(())
    }

    fn change_role(&self, role: ReplicaRole) -> Result<(), BackupError> {
        self.record(format!("backup.change_role:{role}"));
        Ok(())
    }

    fn close(&self) -> Result<(), BackupError> {
        self.record("backup.close");
        Ok(())
    }

    fn abort(&self) {
        self.record("backup.abort");
    }

    fn backup(
        &self,
        _kind: BackupKind,
        log: &dyn ReplicatedLog,
        _timeout: Duration,
        _cancel: &CancelToken,
        _on_ready: &BackupCallback,
    ) -> Result<BackupInfo, BackupError> {
        self.record("backup.backup");
        let version = log.current_version();
        Ok(BackupInfo {
            backup_id: Uuid::new_v4(),
            parent_backup_id: None,
            kind: BackupKind::Full,
            directory: std::env::temp_dir(),
            version,
            start_version: version,
        })
    }

    fn restore(
        &self,
        _backup_dir: &Path,
        _policy: RestorePolicy,
        _log: &dyn ReplicatedLog,
        _cancel: &CancelToken,
    ) -> Result<BackupVersion, BackupError> {
        self.record("backup.restore");
        Ok(BackupVersion::default())
    }

    fn try_recover(
        &self,
        _log: &dyn ReplicatedLog,
        _cancel: &CancelToken,
    ) -> Result<RecoveryOutcome, BackupError> {
        self.record("backup.try_recover");
        Ok(*self.recover_outcome.lock())
    }
}
