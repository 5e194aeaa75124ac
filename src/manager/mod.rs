//! The public surface of the replica: transactions, get-or-add / remove /
//! try-get of named state providers, serializer registration, enumeration,
//! and the backup/restore entry points. The lifecycle controller gates every
//! call; mutations flow to the log through the replication gateway.

#[cfg(feature = "rt")]
pub mod async_adapter;

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::backup::{BackupCallback, BackupInfo, BackupKind, BackupVersion, RestorePolicy};
use crate::capability::{Capability, ResolveError, TypeResolver};
use crate::gateway::{ReplicationError, ReplicationGateway};
use crate::lifecycle::{LifecycleError, ReplicaLifecycleController};
use crate::replication::{LogError, Lsn, ReplicatedLog, STATE_MANAGER_PROVIDER_ID};
use crate::naming::{NamingError, StateProviderName};
use crate::provider::{
    construct_provider, ProviderHandle, ProviderMetadataRecord, ProviderTable, TableError,
};
use crate::serialization::{SerializationError, SerializerRegistry, StateSerializer};
use crate::telemetry::SharedMetrics;
use crate::transaction::{Transaction, TransactionError};
use crate::util::CancelToken;

/// Default budget for operations invoked without an explicit timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(4);

/// Kind tag of a state-manager metadata operation, replicated alongside the
/// full provider record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum MetadataOperationKind {
    Create,
    Remove,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataOperation {
    kind: MetadataOperationKind,
    name: StateProviderName,
}

/// Manages named, strongly-consistent state providers for one replica.
pub struct StateManager {
    lifecycle: Arc<ReplicaLifecycleController>,
    gateway: ReplicationGateway,
    resolver: TypeResolver,
    serializers: SerializerRegistry,
    table: Arc<ProviderTable>,
    log: Arc<dyn ReplicatedLog>,
    next_tx_id: AtomicU64,
    metrics: SharedMetrics,
}

impl StateManager {
    pub fn new(lifecycle: Arc<ReplicaLifecycleController>, metrics: SharedMetrics) -> Self {
        let log = lifecycle.log().clone();
        Self {
            gateway: ReplicationGateway::new(log.clone(), metrics.clone()),
            lifecycle,
            resolver: TypeResolver::new(),
            serializers: SerializerRegistry::new(),
            table: Arc::new(ProviderTable::new()),
            log,
            next_tx_id: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn lifecycle(&self) -> &Arc<ReplicaLifecycleController> {
        &self.lifecycle
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Normalizes a short name into its canonical reserved-prefix form.
    pub fn normalize_name(&self, short_name: &str) -> Result<StateProviderName, StateManagerError> {
        Ok(StateProviderName::normalize(short_name)?)
    }

    /// Creates and starts a transaction for grouping operations atomically.
    pub fn create_transaction(&self) -> Result<Transaction, StateManagerError> {
        self.lifecycle.require_writable()?;
        let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        Ok(Transaction::begin(
            id,
            self.log.clone(),
            self.table.clone(),
        )?)
    }

    /// Returns the provider at `name`, creating it atomically under `tx` if
    /// absent. At most one instance is ever created for a given name, even
    /// under concurrent callers; a capability disagreement with an existing
    /// provider fails with `CapabilityMismatch`.
    pub fn get_or_add(
        &self,
        tx: &Transaction,
        short_name: &str,
        capability: Capability,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ProviderHandle, StateManagerError> {
        self.lifecycle.require_writable()?;
        tx.ensure_active()?;
        let name = StateProviderName::normalize(short_name)?;
        let concrete = self.resolver.resolve(&capability)?;

        let (handle, created) = self.table.get_or_stage_create(
            &name,
            &capability,
            tx.id(),
            |provider_id| {
                construct_provider(concrete, name.clone(), capability.clone(), provider_id)
            },
        )?;
        if !created {
            return Ok(handle);
        }

        let record = ProviderMetadataRecord {
            name: name.clone(),
            capability: handle.capability().clone(),
            provider_id: handle.provider_id(),
        };
        if let Err(err) = self.propose_metadata(
            tx,
            MetadataOperationKind::Create,
            &record,
            timeout,
            cancel,
        ) {
            self.table.revert_staged_create(&name, tx.id());
            return Err(err);
        }
        info!(
            "event=state_provider_create name={name} provider_id={} tx={}",
            record.provider_id,
            tx.id()
        );
        Ok(handle)
    }

    /// Timeout-only overload: creates, uses, and commits its own
    /// transaction. If the commit fails the transaction is rolled back (a
    /// creation staged by it is reverted; a pre-existing provider is
    /// untouched).
    pub fn get_or_add_with_timeout(
        &self,
        short_name: &str,
        capability: Capability,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ProviderHandle, StateManagerError> {
        let tx = self.create_transaction()?;
        match self.get_or_add(&tx, short_name, capability, timeout, cancel) {
            Ok(handle) => match tx.commit() {
                Ok(_) => Ok(handle),
                Err(err) => {
                    let _ = tx.abort();
                    Err(err.into())
                }
            },
            Err(err) => {
                let _ = tx.abort();
                Err(err)
            }
        }
    }

    /// Removes the provider at `name` under `tx`; the removal becomes
    /// durable when the transaction commits. A non-existent name fails with
    /// `NotFound`.
    pub fn remove(
        &self,
        tx: &Transaction,
        short_name: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), StateManagerError> {
        self.lifecycle.require_writable()?;
        tx.ensure_active()?;
        let name = StateProviderName::normalize(short_name)?;
        let handle = self
            .table
            .get_any(&name)
            .ok_or_else(|| StateManagerError::Table(TableError::NotFound {
                name: name.clone(),
            }))?;
        self.table.stage_remove(&name, tx.id())?;

        let record = ProviderMetadataRecord {
            name: name.clone(),
            capability: handle.capability().clone(),
            provider_id: handle.provider_id(),
        };
        if let Err(err) = self.propose_metadata(
            tx,
            MetadataOperationKind::Remove,
            &record,
            timeout,
            cancel,
        ) {
            self.table.revert_staged_remove(&name, tx.id());
            return Err(err);
        }
        info!(
            "event=state_provider_remove name={name} provider_id={} tx={}",
            record.provider_id,
            tx.id()
        );
        Ok(())
    }

    /// Top-level convenience removal with its own transaction.
    ///
    /// Unlike the explicit-transaction path, absence here is not an error:
    /// the method returns `Ok(false)` when no provider exists at `name`.
    /// This asymmetry is deliberate and kept visible in the signature.
    pub fn remove_with_timeout(
        &self,
        short_name: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, StateManagerError> {
        let tx = self.create_transaction()?;
        match self.remove(&tx, short_name, timeout, cancel) {
            Ok(()) => match tx.commit() {
                Ok(_) => Ok(true),
                Err(err) => {
                    let _ = tx.abort();
                    Err(err.into())
                }
            },
            Err(StateManagerError::Table(TableError::NotFound { .. })) => {
                let _ = tx.abort();
                Ok(false)
            }
            Err(err) => {
                let _ = tx.abort();
                Err(err)
            }
        }
    }

    /// Non-transactional, best-effort snapshot read. A capability mismatch
    /// still fails with `CapabilityMismatch` rather than reporting absence.
    pub fn try_get(
        &self,
        short_name: &str,
        capability: &Capability,
    ) -> Result<Option<ProviderHandle>, StateManagerError> {
        self.lifecycle.require_readable()?;
        let name = StateProviderName::normalize(short_name)?;
        Ok(self.table.lookup(&name, capability)?)
    }

    /// Snapshot of the providers currently present on this replica.
    pub fn enumerate(&self) -> Result<Vec<ProviderHandle>, StateManagerError> {
        self.lifecycle.require_readable()?;
        Ok(self.table.enumerate())
    }

    /// Attaches one provider operation (metadata/redo/undo payloads) to `tx`
    /// and proposes it to the log. Operations within one transaction reach
    /// the log in attach order.
    pub fn replicate(
        &self,
        tx: &Transaction,
        handle: &ProviderHandle,
        metadata: &[u8],
        redo: &[u8],
        undo: Option<&[u8]>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Lsn, StateManagerError> {
        self.lifecycle.require_writable()?;
        Ok(self.gateway.propose(
            tx,
            handle.provider_id(),
            metadata,
            redo,
            undo,
            timeout,
            cancel,
        )?)
    }

    /// Registers a serializer for `T`, exactly once. A second registration
    /// for the same type fails with `AlreadyRegistered`.
    pub fn add_state_serializer<T: 'static>(
        &self,
        serializer: Arc<dyn StateSerializer<T>>,
    ) -> Result<(), StateManagerError> {
        Ok(self.serializers.add(serializer)?)
    }

    pub fn state_serializer<T: 'static>(&self) -> Option<Arc<dyn StateSerializer<T>>> {
        self.serializers.get::<T>()
    }

    /// Performs a backup of all replicated state managed by this replica.
    pub fn backup(
        &self,
        kind: BackupKind,
        timeout: Duration,
        cancel: &CancelToken,
        on_ready: &BackupCallback,
    ) -> Result<BackupInfo, StateManagerError> {
        Ok(self.lifecycle.backup(kind, timeout, cancel, on_ready)?)
    }

    /// Restores replicated state from a backup folder. Under
    /// [`RestorePolicy::Safe`] the backup must be strictly ahead of current
    /// state.
    pub fn restore(
        &self,
        backup_dir: &Path,
        policy: RestorePolicy,
        cancel: &CancelToken,
    ) -> Result<BackupVersion, StateManagerError> {
        Ok(self.lifecycle.restore(backup_dir, policy, cancel)?)
    }

    fn propose_metadata(
        &self,
        tx: &Transaction,
        kind: MetadataOperationKind,
        record: &ProviderMetadataRecord,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Lsn, StateManagerError> {
        let metadata = serde_json::to_vec(&MetadataOperation {
            kind,
            name: record.name.clone(),
        })
        .map_err(SerializationError::from)?;
        let redo = serde_json::to_vec(record).map_err(SerializationError::from)?;
        Ok(self.gateway.propose(
            tx,
            STATE_MANAGER_PROVIDER_ID,
            &metadata,
            &redo,
            None,
            timeout,
            cancel,
        )?)
    }
}

#[derive(Debug, Error)]
pub enum StateManagerError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
