mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use replistate::{
    BackupError, BackupKind, CancelToken, Capability, InMemoryLog, LifecycleError,
    LocalBackupManager, OpenMode, ReplicaLifecycleController, ReplicaRole, ReplicatedLog,
    RestorePolicy, SharedMetrics, StateManager, StateManagerError, StaticSettingsSource,
    ValidatedConfig, ValueKind, DEFAULT_OPERATION_TIMEOUT,
};
use support::{init_params, partition};

const BACKUP_TIMEOUT: Duration = Duration::from_secs(30);

fn open_primary_with_backup(root: &std::path::Path) -> (Arc<StateManager>, Arc<InMemoryLog>) {
    let log = Arc::new(InMemoryLog::new());
    let backup = Arc::new(LocalBackupManager::new(root, 1, &ValidatedConfig::default()));
    let source = Arc::new(StaticSettingsSource::new(HashMap::new()));
    let lifecycle = Arc::new(ReplicaLifecycleController::new(
        log.clone(),
        Some(backup),
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

fn seed_provider(manager: &StateManager, name: &str) {
    manager
        .get_or_add_with_timeout(
            name,
            Capability::keyed_map(ValueKind::Utf8, ValueKind::Bytes),
            DEFAULT_OPERATION_TIMEOUT,
            &CancelToken::new(),
        )
        .unwrap();
}

#[test]
fn backup_marks_the_current_durable_point() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, log) = open_primary_with_backup(dir.path());
    seed_provider(&manager, "orders");

    let info = manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| true)
        .unwrap();
    assert_eq!(info.version, log.current_version());
    assert_eq!(info.kind, BackupKind::Full);
    assert!(info.directory.join("backup.manifest.json").exists());
}

#[test]
fn safe_restore_rejects_a_stale_backup_but_force_accepts_it() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, log) = open_primary_with_backup(dir.path());
    seed_provider(&manager, "orders");

    let info = manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| true)
        .unwrap();

    // Current state already covers this backup, so a safe restore must fail.
    let err = manager
        .restore(&info.directory, RestorePolicy::Safe, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        StateManagerError::Lifecycle(LifecycleError::Backup(BackupError::NotAhead { .. }))
    ));

    // A forced restore of the same backup succeeds and opens a new
    // data-loss era strictly ahead of the backup.
    let restored = manager
        .restore(&info.directory, RestorePolicy::Force, &CancelToken::new())
        .unwrap();
    assert!(log.current_version() > restored);
}

#[test]
fn incremental_backups_chain_and_need_a_full_parent() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _log) = open_primary_with_backup(dir.path());
    seed_provider(&manager, "orders");

    let err = manager
        .backup(
            BackupKind::Incremental,
            BACKUP_TIMEOUT,
            &CancelToken::new(),
            &|_info, _cancel| true,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StateManagerError::Lifecycle(LifecycleError::Backup(BackupError::NoPriorBackup))
    ));

    let full = manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| true)
        .unwrap();
    seed_provider(&manager, "more-orders");
    let incremental = manager
        .backup(
            BackupKind::Incremental,
            BACKUP_TIMEOUT,
            &CancelToken::new(),
            &|_info, _cancel| true,
        )
        .unwrap();
    assert_eq!(incremental.parent_backup_id, Some(full.backup_id));
    assert_eq!(incremental.start_version, full.version);
    assert!(incremental.version > full.version);
}

#[test]
fn declined_callback_marks_the_backup_unsuccessful() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _log) = open_primary_with_backup(dir.path());
    seed_provider(&manager, "orders");

    let err = manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| false)
        .unwrap_err();
    assert!(matches!(
        err,
        StateManagerError::Lifecycle(LifecycleError::Backup(BackupError::CallbackRejected {
            ..
        }))
    ));
}

#[test]
fn backup_requires_the_primary_role() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _log) = open_primary_with_backup(dir.path());
    manager
        .lifecycle()
        .change_role(ReplicaRole::Secondary)
        .unwrap();
    let err = manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| true)
        .unwrap_err();
    assert!(matches!(
        err,
        StateManagerError::Lifecycle(LifecycleError::NotPrimary)
    ));
}

#[test]
fn data_loss_recovers_from_the_latest_completed_backup() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, log) = open_primary_with_backup(dir.path());
    seed_provider(&manager, "orders");
    manager
        .backup(BackupKind::Full, BACKUP_TIMEOUT, &CancelToken::new(), &|_info, _cancel| true)
        .unwrap();

    // Quorum loss: the log regresses behind the backup.
    log.set_version(replistate::LogVersion::default());
    let restored = manager
        .lifecycle()
        .on_data_loss(&CancelToken::new())
        .unwrap();
    assert!(restored, "the backup tier must restore without a user callback");
}
