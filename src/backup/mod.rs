//! Backup and restore of replicated state. A backup marks a durable point
//! (epoch + LSN), materializes a folder with a digest-protected manifest, and
//! hands the folder to a caller-supplied callback for externalization. A safe
//! restore only succeeds when the backup is strictly ahead of current state.

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ValidatedConfig;
use crate::replication::{LogError, LogVersion, ReplicaRole, ReplicatedLog};
use crate::util::CancelToken;

/// A durable point in replicated history. Alias of the log's version
/// coordinates; ordered by data-loss number, configuration number, then LSN.
pub type BackupVersion = LogVersion;

pub const MANIFEST_FILE: &str = "backup.manifest.json";
pub const DIGEST_FILE: &str = "backup.manifest.sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Restore only if the backup is strictly ahead of current state.
    Safe,
    /// Bypass the version check.
    Force,
}

/// Description of one completed (or in-flight) backup, passed to the
/// externalization callback and consumed by restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub backup_id: Uuid,
    pub parent_backup_id: Option<Uuid>,
    pub kind: BackupKind,
    pub directory: PathBuf,
    /// Highest record covered by this backup.
    pub version: BackupVersion,
    /// First record covered: the parent's version for incrementals, the
    /// backup's own version for fulls.
    pub start_version: BackupVersion,
}

/// Callback invoked once the backup folder is ready to be moved off the
/// node. Returning `false` means the caller could not externalize it; the
/// backup fails and is recorded unsuccessful.
pub type BackupCallback = dyn Fn(&BackupInfo, &CancelToken) -> bool + Send + Sync;

/// Result of a data-loss recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Restored,
    StateUnchanged,
}

/// Backup/restore subsystem as the lifecycle controller sees it: an injected
/// collaborator whose lifecycle calls are strictly sequenced after the log's.
pub trait BackupRestoreManager: Send + Sync {
    fn open(&self) -> Result<(), BackupError>;
    fn change_role(&self, role: ReplicaRole) -> Result<(), BackupError>;
    fn close(&self) -> Result<(), BackupError>;
    /// Unconditional teardown; must not fail.
    fn abort(&self);

    fn backup(
        &self,
        kind: BackupKind,
        log: &dyn ReplicatedLog,
        timeout: Duration,
        cancel: &CancelToken,
        on_ready: &BackupCallback,
    ) -> Result<BackupInfo, BackupError>;

    fn restore(
        &self,
        backup_dir: &Path,
        policy: RestorePolicy,
        log: &dyn ReplicatedLog,
        cancel: &CancelToken,
    ) -> Result<BackupVersion, BackupError>;

    /// First-tier data-loss recovery: restore from the latest completed
    /// backup if it is strictly ahead of current state, otherwise report
    /// the state unchanged.
    fn try_recover(
        &self,
        log: &dyn ReplicatedLog,
        cancel: &CancelToken,
    ) -> Result<RecoveryOutcome, BackupError>;
}

/// On-disk manifest describing one backup folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupManifest {
    backup_id: Uuid,
    parent_backup_id: Option<Uuid>,
    kind: BackupKind,
    version: BackupVersion,
    start_version: BackupVersion,
    replica_id: u64,
}

#[derive(Debug, Default)]
struct BackupState {
    opened: bool,
    last_completed: Option<BackupManifest>,
    last_directory: Option<PathBuf>,
    accumulated_incremental_bytes: u64,
}

/// Backup manager materializing backups under a local root directory.
pub struct LocalBackupManager {
    root: PathBuf,
    replica_id: u64,
    enable_incremental_across_replicas: bool,
    max_accumulated_backup_log_bytes: u64,
    state: Mutex<BackupState>,
}

impl LocalBackupManager {
    pub fn new(root: impl Into<PathBuf>, replica_id: u64, config: &ValidatedConfig) -> Self {
        Self {
            root: root.into(),
            replica_id,
            enable_incremental_across_replicas: config.enable_incremental_backups_across_replicas,
            max_accumulated_backup_log_bytes: config.max_accumulated_backup_log_size_mb
                * 1024
                * 1024,
            state: Mutex::new(BackupState::default()),
        }
    }

    fn write_manifest(dir: &Path, manifest: &BackupManifest) -> Result<u64, BackupError> {
        fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec_pretty(manifest)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        fs::write(dir.join(MANIFEST_FILE), &bytes)?;
        fs::write(dir.join(DIGEST_FILE), digest)?;
        Ok(bytes.len() as u64)
    }

    fn read_manifest(dir: &Path) -> Result<BackupManifest, BackupError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let digest_path = dir.join(DIGEST_FILE);
        if !manifest_path.exists() || !digest_path.exists() {
            return Err(BackupError::ManifestMissing {
                path: dir.to_path_buf(),
            });
        }
        let bytes = fs::read(&manifest_path)?;
        let expected = fs::read_to_string(&digest_path)?;
        let observed = hex::encode(Sha256::digest(&bytes));
        if observed != expected.trim() {
            return Err(BackupError::ManifestCorrupt {
                path: dir.to_path_buf(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn ensure_opened(&self) -> Result<(), BackupError> {
        if !self.state.lock().opened {
            return Err(BackupError::NotOpened);
        }
        Ok(())
    }

    fn check_cancel(cancel: &CancelToken) -> Result<(), BackupError> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }
}

impl BackupRestoreManager for LocalBackupManager {
    fn open(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.root)?;
        self.state.lock().opened = true;
        info!("event=backup_manager_open root={:?}", self.root);
        Ok(())
    }

    fn change_role(&self, role: ReplicaRole) -> Result<(), BackupError> {
        self.ensure_opened()?;
        info!("event=backup_manager_change_role role={role}");
        Ok(())
    }

    fn close(&self) -> Result<(), BackupError> {
        let mut state = self.state.lock();
        state.opened = false;
        info!("event=backup_manager_close root={:?}", self.root);
        Ok(())
    }

    fn abort(&self) {
        self.state.lock().opened = false;
    }

    fn backup(
        &self,
        kind: BackupKind,
        log: &dyn ReplicatedLog,
        _timeout: Duration,
        cancel: &CancelToken,
        on_ready: &BackupCallback,
    ) -> Result<BackupInfo, BackupError> {
        self.ensure_opened()?;
        Self::check_cancel(cancel)?;

        let version = log.current_version();
        let mut state = self.state.lock();
        let (parent_backup_id, start_version) = match kind {
            BackupKind::Full => (None, version),
            BackupKind::Incremental => {
                let parent = state
                    .last_completed
                    .as_ref()
                    .ok_or(BackupError::NoPriorBackup)?;
                if parent.replica_id != self.replica_id && !self.enable_incremental_across_replicas
                {
                    return Err(BackupError::IncrementalAcrossReplicas {
                        parent_replica_id: parent.replica_id,
                        replica_id: self.replica_id,
                    });
                }
                if state.accumulated_incremental_bytes >= self.max_accumulated_backup_log_bytes {
                    return Err(BackupError::AccumulatedBudgetExceeded {
                        accumulated_bytes: state.accumulated_incremental_bytes,
                        budget_bytes: self.max_accumulated_backup_log_bytes,
                    });
                }
                (Some(parent.backup_id), parent.version)
            }
        };

        let backup_id = Uuid::new_v4();
        let directory = self.root.join(backup_id.to_string());
        let manifest = BackupManifest {
            backup_id,
            parent_backup_id,
            kind,
            version,
            start_version,
            replica_id: self.replica_id,
        };
        let written = Self::write_manifest(&directory, &manifest)?;
        drop(state);

        let info = BackupInfo {
            backup_id,
            parent_backup_id,
            kind,
            directory: directory.clone(),
            version,
            start_version,
        };

        Self::check_cancel(cancel)?;
        if !on_ready(&info, cancel) {
            warn!("event=backup_callback_rejected backup_id={backup_id}");
            let _ = fs::remove_dir_all(&directory);
            return Err(BackupError::CallbackRejected { backup_id });
        }

        let mut state = self.state.lock();
        match kind {
            BackupKind::Full => state.accumulated_incremental_bytes = 0,
            BackupKind::Incremental => {
                state.accumulated_incremental_bytes =
                    state.accumulated_incremental_bytes.saturating_add(written)
            }
        }
        state.last_completed = Some(manifest);
        state.last_directory = Some(directory);
        info!(
            "event=backup_complete backup_id={backup_id} kind={kind:?} lsn={}",
            version.lsn
        );
        Ok(info)
    }

    fn restore(
        &self,
        backup_dir: &Path,
        policy: RestorePolicy,
        log: &dyn ReplicatedLog,
        cancel: &CancelToken,
    ) -> Result<BackupVersion, BackupError> {
        Self::check_cancel(cancel)?;
        let manifest = Self::read_manifest(backup_dir)?;
        let current = log.current_version();
        if policy == RestorePolicy::Safe && manifest.version <= current {
            return Err(BackupError::NotAhead {
                backup_version: manifest.version,
                current_version: current,
            });
        }
        Self::check_cancel(cancel)?;
        log.complete_restore(manifest.version)?;
        info!(
            "event=restore_complete backup_id={} policy={policy:?} lsn={}",
            manifest.backup_id, manifest.version.lsn
        );
        Ok(manifest.version)
    }

    fn try_recover(
        &self,
        log: &dyn ReplicatedLog,
        cancel: &CancelToken,
    ) -> Result<RecoveryOutcome, BackupError> {
        Self::check_cancel(cancel)?;
        let candidate = {
            let state = self.state.lock();
            match (&state.last_completed, &state.last_directory) {
                (Some(manifest), Some(directory)) => Some((manifest.version, directory.clone())),
                _ => None,
            }
        };
        match candidate {
            Some((version, directory)) if version > log.current_version() => {
                self.restore(&directory, RestorePolicy::Safe, log, cancel)?;
                Ok(RecoveryOutcome::Restored)
            }
            _ => Ok(RecoveryOutcome::StateUnchanged),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup manager is not open")]
    NotOpened,
    #[error("backup callback declined to externalize backup {backup_id}")]
    CallbackRejected { backup_id: Uuid },
    #[error("incremental backup requires a prior completed backup")]
    NoPriorBackup,
    #[error("incremental backup chains from replica {parent_replica_id} but this replica is {replica_id} and cross-replica chaining is disabled")]
    IncrementalAcrossReplicas {
        parent_replica_id: u64,
        replica_id: u64,
    },
    #[error("accumulated incremental backups ({accumulated_bytes} bytes) exceed the configured budget ({budget_bytes} bytes); a full backup is required")]
    AccumulatedBudgetExceeded {
        accumulated_bytes: u64,
        budget_bytes: u64,
    },
    #[error("backup version {backup_version:?} is not strictly ahead of current state {current_version:?}")]
    NotAhead {
        backup_version: BackupVersion,
        current_version: BackupVersion,
    },
    #[error("backup manifest missing under {path:?}")]
    ManifestMissing { path: PathBuf },
    #[error("backup manifest under {path:?} failed digest verification")]
    ManifestCorrupt { path: PathBuf },
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backup manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("backup operation cancelled")]
    Cancelled,
}
