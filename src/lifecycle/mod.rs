//! Replica lifecycle: open/change-role/close/abort, configuration loading
//! and reload, and the data-loss recovery chain. The controller gates when
//! the state manager façade may accept calls.

use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::backup::{
    BackupCallback, BackupError, BackupInfo, BackupKind, BackupRestoreManager, BackupVersion,
    RecoveryOutcome, RestorePolicy,
};
use crate::config::{ConfigError, SettingsError, SettingsSource, ValidatedConfig};
use crate::replication::{LogError, OpenMode, ReplicaRole, ReplicatedLog};
use crate::telemetry::SharedMetrics;
use crate::util::CancelToken;

/// Lifecycle states. `Aborted` is terminal and reachable from every
/// non-`Closed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Created,
    Initialized,
    Opened,
    Primary,
    Secondary,
    Closed,
    Aborted,
}

/// Host-supplied identity of the replica, attached once at initialize time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationParameters {
    pub partition_id: Uuid,
    pub replica_id: u64,
    pub service_name: String,
    pub work_directory: PathBuf,
}

/// Handle to the partition this replica belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandle {
    pub partition_id: Uuid,
}

/// User-supplied second-tier data-loss recovery. Returns whether state was
/// externally restored.
pub type DataLossCallback =
    dyn Fn(&CancelToken) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> + Send + Sync;

/// Whether an error should be reported to the hosting runtime as a transient
/// fault (retry externally) or surfaced as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Fatal,
}

#[derive(Debug)]
struct ControllerState {
    state: ReplicaState,
    init: Option<InitializationParameters>,
    partition: Option<PartitionHandle>,
    backup_opened_after_log: bool,
}

/// Owns the replica lifecycle state machine and the validated configuration
/// snapshot. The log and the backup subsystem are independent collaborators
/// whose lifecycle calls are strictly sequenced: the log always observes a
/// transition first.
pub struct ReplicaLifecycleController {
    log: Arc<dyn ReplicatedLog>,
    backup_manager: Option<Arc<dyn BackupRestoreManager>>,
    settings_source: Arc<dyn SettingsSource>,
    metrics: SharedMetrics,
    state: Mutex<ControllerState>,
    config: RwLock<Option<Arc<ValidatedConfig>>>,
    on_data_loss: Mutex<Option<Box<DataLossCallback>>>,
}

impl ReplicaLifecycleController {
    pub fn new(
        log: Arc<dyn ReplicatedLog>,
        backup_manager: Option<Arc<dyn BackupRestoreManager>>,
        settings_source: Arc<dyn SettingsSource>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            log,
            backup_manager,
            settings_source,
            metrics,
            state: Mutex::new(ControllerState {
                state: ReplicaState::Created,
                init: None,
                partition: None,
                backup_opened_after_log: false,
            }),
            config: RwLock::new(None),
            on_data_loss: Mutex::new(None),
        }
    }

    pub fn current_state(&self) -> ReplicaState {
        self.state.lock().state
    }

    /// The active configuration snapshot. Readers observe either the old or
    /// the fully-validated new snapshot, never a partial update.
    pub fn config(&self) -> Option<Arc<ValidatedConfig>> {
        self.config.read().clone()
    }

    pub fn initialization(&self) -> Option<InitializationParameters> {
        self.state.lock().init.clone()
    }

    /// Registers the user recovery callback consulted when the backup
    /// subsystem declines a data-loss event.
    pub fn set_on_data_loss(&self, callback: Box<DataLossCallback>) {
        *self.on_data_loss.lock() = Some(callback);
    }

    /// Attaches initialization parameters. Idempotent when called again with
    /// identical parameters; fatal otherwise.
    pub fn initialize(&self, params: InitializationParameters) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        match state.state {
            ReplicaState::Created => {
                info!(
                    "event=replica_initialize replica_id={} partition_id={}",
                    params.replica_id, params.partition_id
                );
                state.init = Some(params);
                state.state = ReplicaState::Initialized;
                Ok(())
            }
            ReplicaState::Initialized if state.init.as_ref() == Some(&params) => Ok(()),
            ReplicaState::Initialized => Err(LifecycleError::AlreadyInitialized {
                replica_id: params.replica_id,
            }),
            from => Err(LifecycleError::InvalidTransition {
                from,
                operation: "initialize",
            }),
        }
    }

    /// Loads and validates configuration, then opens the log and (second)
    /// the backup subsystem. A failed open retains no partial state: the
    /// replica stays closed and configuration errors are reported as
    /// transient faults.
    pub fn open(&self, mode: OpenMode, partition: PartitionHandle) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        if state.state != ReplicaState::Initialized {
            return Err(LifecycleError::InvalidTransition {
                from: state.state,
                operation: "open",
            });
        }
        let settings = self.settings_source.load().map_err(|err| {
            error!("event=replica_open_settings_fault error={err}");
            LifecycleError::Settings(err)
        })?;
        let config = crate::config::validate(&settings).map_err(|err| {
            error!("event=replica_open_config_fault error={err}");
            self.metrics.inc_counter("lifecycle.config_faults_total", 1);
            LifecycleError::Configuration(err)
        })?;

        self.log.open(mode)?;
        if let Some(backup) = &self.backup_manager {
            if let Err(err) = backup.open() {
                // No partial state: release the log before failing the open.
                self.log.abort();
                return Err(LifecycleError::Backup(err));
            }
            state.backup_opened_after_log = true;
        }

        *self.config.write() = Some(Arc::new(config));
        state.partition = Some(partition);
        state.state = ReplicaState::Opened;
        self.metrics.inc_counter("lifecycle.opens_total", 1);
        info!("event=replica_open mode={mode:?}");
        Ok(())
    }

    /// Delegates the role transition to the log first and the backup
    /// subsystem second, so backup/restore never observes a role the log has
    /// not committed to.
    pub fn change_role(&self, new_role: ReplicaRole) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        match state.state {
            ReplicaState::Opened | ReplicaState::Primary | ReplicaState::Secondary => {}
            from => {
                return Err(LifecycleError::InvalidTransition {
                    from,
                    operation: "change_role",
                })
            }
        }
        self.log.change_role(new_role)?;
        if let Some(backup) = &self.backup_manager {
            backup.change_role(new_role)?;
        }
        state.state = match new_role {
            ReplicaRole::Primary => ReplicaState::Primary,
            ReplicaRole::Secondary => ReplicaState::Secondary,
            ReplicaRole::None => ReplicaState::Opened,
        };
        self.metrics.inc_counter("lifecycle.role_changes_total", 1);
        info!("event=replica_change_role role={new_role}");
        Ok(())
    }

    /// Two-tier data-loss recovery. The backup subsystem recovers first; the
    /// user callback runs only if the subsystem reports state unchanged —
    /// exactly one recovery path executes per event. Returns whether state
    /// was externally restored.
    pub fn on_data_loss(&self, cancel: &CancelToken) -> Result<bool, LifecycleError> {
        match self.current_state() {
            ReplicaState::Opened | ReplicaState::Primary | ReplicaState::Secondary => {}
            from => {
                return Err(LifecycleError::InvalidTransition {
                    from,
                    operation: "on_data_loss",
                })
            }
        }
        self.metrics.inc_counter("lifecycle.data_loss_events_total", 1);
        if let Some(backup) = &self.backup_manager {
            if backup.try_recover(&*self.log, cancel)? == RecoveryOutcome::Restored {
                info!("event=data_loss_recovered source=backup_manager");
                return Ok(true);
            }
        }
        let callback = self.on_data_loss.lock();
        match callback.as_ref() {
            Some(recover) => {
                let restored = recover(cancel)
                    .map_err(|err| LifecycleError::DataLossCallback(err.to_string()))?;
                info!("event=data_loss_recovered source=user_callback restored={restored}");
                Ok(restored)
            }
            None => Ok(false),
        }
    }

    /// Graceful close. The backup subsystem closes before the log finishes
    /// closing when it was opened after the log.
    pub fn close(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        match state.state {
            ReplicaState::Closed | ReplicaState::Aborted => {
                return Err(LifecycleError::ObjectClosed)
            }
            _ => {}
        }
        let mut first_error: Option<LifecycleError> = None;
        if state.backup_opened_after_log {
            if let Some(backup) = &self.backup_manager {
                if let Err(err) = backup.close() {
                    first_error.get_or_insert(LifecycleError::Backup(err));
                }
            }
            if let Err(err) = self.log.close() {
                first_error.get_or_insert(LifecycleError::Log(err));
            }
        } else {
            if let Err(err) = self.log.close() {
                first_error.get_or_insert(LifecycleError::Log(err));
            }
            if let Some(backup) = &self.backup_manager {
                if let Err(err) = backup.close() {
                    first_error.get_or_insert(LifecycleError::Backup(err));
                }
            }
        }
        state.state = ReplicaState::Closed;
        info!("event=replica_close");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Unconditional teardown. Resources are released best-effort and the
    /// controller becomes unusable; never fails.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if state.state == ReplicaState::Aborted {
            return;
        }
        if let Some(backup) = &self.backup_manager {
            backup.abort();
        }
        self.log.abort();
        state.state = ReplicaState::Aborted;
        warn!("event=replica_abort");
    }

    /// Re-runs validation against the external configuration source. On
    /// success the snapshot is swapped wholesale; on failure the previous
    /// valid configuration stays active and the error is reported as a
    /// transient fault — never swallowed.
    pub fn reload_settings(&self) -> Result<Arc<ValidatedConfig>, LifecycleError> {
        let settings = self.settings_source.load().map_err(|err| {
            self.metrics.inc_counter("lifecycle.reload_failures_total", 1);
            error!("event=config_reload_fault error={err}");
            LifecycleError::Settings(err)
        })?;
        match crate::config::validate(&settings) {
            Ok(config) => {
                let config = Arc::new(config);
                *self.config.write() = Some(config.clone());
                info!("event=config_reload");
                Ok(config)
            }
            Err(err) => {
                self.metrics.inc_counter("lifecycle.reload_failures_total", 1);
                error!("event=config_reload_fault error={err}");
                Err(LifecycleError::Configuration(err))
            }
        }
    }

    /// Performs a backup at the current durable point. Requires the primary
    /// role.
    pub fn backup(
        &self,
        kind: BackupKind,
        timeout: Duration,
        cancel: &CancelToken,
        on_ready: &BackupCallback,
    ) -> Result<BackupInfo, LifecycleError> {
        if self.current_state() != ReplicaState::Primary {
            return Err(LifecycleError::NotPrimary);
        }
        let backup = self
            .backup_manager
            .as_ref()
            .ok_or(LifecycleError::NoBackupManager)?;
        Ok(backup.backup(kind, &*self.log, timeout, cancel, on_ready)?)
    }

    /// Restores replicated state from a backup folder.
    pub fn restore(
        &self,
        backup_dir: &std::path::Path,
        policy: RestorePolicy,
        cancel: &CancelToken,
    ) -> Result<BackupVersion, LifecycleError> {
        match self.current_state() {
            ReplicaState::Closed | ReplicaState::Aborted => {
                return Err(LifecycleError::ObjectClosed)
            }
            _ => {}
        }
        let backup = self
            .backup_manager
            .as_ref()
            .ok_or(LifecycleError::NoBackupManager)?;
        Ok(backup.restore(backup_dir, policy, &*self.log, cancel)?)
    }

    /// Admission check for mutating façade operations.
    pub fn require_writable(&self) -> Result<(), LifecycleError> {
        match self.current_state() {
            ReplicaState::Primary => {
                if self.log.is_writable() {
                    Ok(())
                } else {
                    Err(LifecycleError::NotWritable)
                }
            }
            ReplicaState::Closed | ReplicaState::Aborted => Err(LifecycleError::ObjectClosed),
            _ => Err(LifecycleError::NotPrimary),
        }
    }

    /// Admission check for read-only façade operations.
    pub fn require_readable(&self) -> Result<(), LifecycleError> {
        match self.current_state() {
            ReplicaState::Opened | ReplicaState::Primary | ReplicaState::Secondary => {
                if self.log.is_readable() {
                    Ok(())
                } else {
                    Err(LifecycleError::NotReadable)
                }
            }
            ReplicaState::Closed | ReplicaState::Aborted => Err(LifecycleError::ObjectClosed),
            from => Err(LifecycleError::InvalidTransition {
                from,
                operation: "read",
            }),
        }
    }

    pub(crate) fn log(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("replica {replica_id} was already initialized with different parameters")]
    AlreadyInitialized { replica_id: u64 },
    #[error("operation {operation} is not legal from state {from:?}")]
    InvalidTransition {
        from: ReplicaState,
        operation: &'static str,
    },
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("no backup/restore manager is attached to this replica")]
    NoBackupManager,
    #[error("replica is closed")]
    ObjectClosed,
    #[error("replica is not primary")]
    NotPrimary,
    #[error("replica has no write status")]
    NotWritable,
    #[error("replica has no read status")]
    NotReadable,
    #[error("data-loss recovery callback failed: {0}")]
    DataLossCallback(String),
}

impl LifecycleError {
    /// How the hosting runtime should treat the failure: configuration and
    /// settings faults are transient (retry the open/reload externally),
    /// everything else is fatal to the operation that raised it.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            LifecycleError::Settings(_) | LifecycleError::Configuration(_) => FaultKind::Transient,
            _ => FaultKind::Fatal,
        }
    }
}
