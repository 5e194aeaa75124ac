//! Replicated transactional state-provider manager.
//!
//! A stateful service replica uses this crate to create, look up, and remove
//! named strongly-consistent collections ("state providers") whose mutations
//! flow through a primary/secondary replication log, survive role changes,
//! and can be backed up and restored. The replication engine itself
//! (append/acknowledge/checkpoint/truncate) sits behind the
//! [`replication::ReplicatedLog`] trait.

pub mod backup;
pub mod capability;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod manager;
pub mod naming;
pub mod provider;
pub mod replication;
pub mod serialization;
pub mod telemetry;
pub mod transaction;
pub mod util;

pub use backup::{
    BackupCallback, BackupError, BackupInfo, BackupKind, BackupRestoreManager, BackupVersion,
    LocalBackupManager, RecoveryOutcome, RestorePolicy,
};
pub use capability::{
    Capability, CollectionKind, ConcreteType, ResolveError, TypeResolver, ValueKind,
};
pub use config::{
    validate, ConfigError, ReplicatorSettings, SettingsError, SettingsSource, SharedLogSettings,
    StaticSettingsSource, ValidatedConfig,
};
pub use gateway::{ReplicationError, ReplicationGateway};
pub use lifecycle::{
    DataLossCallback, FaultKind, InitializationParameters, LifecycleError, PartitionHandle,
    ReplicaLifecycleController, ReplicaState,
};
pub use replication::{
    Epoch, InMemoryLog, LogError, LogVersion, Lsn, OpenMode, ProviderId, ReplicaRole,
    ReplicatedLog, TxId, STATE_MANAGER_PROVIDER_ID,
};
#[cfg(feature = "rt")]
pub use manager::async_adapter::AsyncStateManager;
pub use manager::{StateManager, StateManagerError, DEFAULT_OPERATION_TIMEOUT};
pub use naming::{NamingError, StateProviderName, RESERVED_PREFIX};
pub use provider::{
    construct_provider, ProviderError, ProviderHandle, ProviderMetadataRecord, ProviderTable,
    StateProvider, TableError,
};
pub use serialization::{
    JsonSerializer, SerializationError, SerializerRegistry, StateSerializer,
};
pub use telemetry::{MetricsRegistry, MetricsSnapshot, SharedMetrics};
pub use transaction::{Transaction, TransactionError};
pub use util::{CancelToken, RetryError, RetryPolicy, RetrySession};
