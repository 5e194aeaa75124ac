use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::capability::{Capability, ConcreteType};
use crate::replication::{ProviderId, TxId};
use crate::naming::StateProviderName;

/// A named, replicated collection instance. Collection semantics (lookup,
/// enqueue, ...) belong to the concrete data structures and are out of scope
/// here; the state manager only needs identity and the hooks the log drives.
pub trait StateProvider: Send + Sync {
    fn name(&self) -> &StateProviderName;
    fn capability(&self) -> &Capability;
    fn provider_id(&self) -> ProviderId;
    /// Concrete implementation the resolver selected for this instance.
    fn concrete_type(&self) -> ConcreteType;
    /// Applies a committed redo payload to local state.
    fn apply_redo(&self, redo: &[u8]) -> Result<(), ProviderError>;
    /// Reverts the effect of a payload whose transaction rolled back.
    fn apply_undo(&self, undo: &[u8]) -> Result<(), ProviderError>;
    /// Number of payloads currently applied.
    fn applied_len(&self) -> usize;
}

/// Minimal concrete target the resolver instantiates. One struct serves all
/// three collection kinds: the distinction that matters to the state manager
/// is the declared capability, not the in-memory layout.
struct JournalingProvider {
    name: StateProviderName,
    capability: Capability,
    provider_id: ProviderId,
    concrete: ConcreteType,
    applied: Mutex<Vec<Vec<u8>>>,
}

impl StateProvider for JournalingProvider {
    fn name(&self) -> &StateProviderName {
        &self.name
    }

    fn capability(&self) -> &Capability {
        &self.capability
    }

    fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    fn concrete_type(&self) -> ConcreteType {
        self.concrete
    }

    fn apply_redo(&self, redo: &[u8]) -> Result<(), ProviderError> {
        self.applied.lock().push(redo.to_vec());
        Ok(())
    }

    fn apply_undo(&self, undo: &[u8]) -> Result<(), ProviderError> {
        let mut applied = self.applied.lock();
        match applied.iter().rposition(|payload| payload == undo) {
            Some(idx) => {
                applied.remove(idx);
                Ok(())
            }
            None => Err(ProviderError::UndoWithoutMatchingRedo {
                name: self.name.clone(),
            }),
        }
    }

    fn applied_len(&self) -> usize {
        self.applied.lock().len()
    }
}

/// Instantiates the concrete provider for a resolved capability.
pub fn construct_provider(
    concrete: ConcreteType,
    name: StateProviderName,
    capability: Capability,
    provider_id: ProviderId,
) -> Arc<dyn StateProvider> {
    Arc::new(JournalingProvider {
        name,
        capability,
        provider_id,
        concrete,
        applied: Mutex::new(Vec::new()),
    })
}

/// Transient pairing of a name, its declared capability, and the live
/// instance. The provider table owns the instance; handles are references
/// returned from lookups and creations.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Arc<dyn StateProvider>,
}

impl ProviderHandle {
    pub fn name(&self) -> &StateProviderName {
        self.provider.name()
    }

    pub fn capability(&self) -> &Capability {
        self.provider.capability()
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.provider_id()
    }

    pub fn provider(&self) -> &Arc<dyn StateProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", self.provider.name())
            .field("capability", self.provider.capability())
            .field("provider_id", &self.provider.provider_id())
            .finish()
    }
}

/// Replicated metadata record for provider creation/removal, carried in the
/// state manager's own log operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadataRecord {
    pub name: StateProviderName,
    pub capability: Capability,
    pub provider_id: ProviderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Active,
    PendingCreate { tx: TxId },
    PendingRemove { tx: TxId, created_by_tx: bool },
}

struct TableEntry {
    provider: Arc<dyn StateProvider>,
    state: EntryState,
}

/// The provider table: exclusive owner of live provider instances.
///
/// Creations and removals are staged under a transaction and finalized when
/// that transaction terminates; lookups see staged entries so concurrent
/// get-or-add callers converge on a single instance.
#[derive(Default)]
pub struct ProviderTable {
    entries: Mutex<HashMap<StateProviderName, TableEntry>>,
    next_provider_id: AtomicU64,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            // Id 0 is the state manager itself.
            next_provider_id: AtomicU64::new(1),
        }
    }

    pub fn next_provider_id(&self) -> ProviderId {
        self.next_provider_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Snapshot lookup. A present entry with a different capability fails
    /// with `CapabilityMismatch` rather than reporting absence.
    pub fn lookup(
        &self,
        name: &StateProviderName,
        requested: &Capability,
    ) -> Result<Option<ProviderHandle>, TableError> {
        let entries = self.entries.lock();
        match entries.get(name) {
            None => Ok(None),
            Some(entry) => {
                Self::check_capability(name, requested, entry)?;
                Ok(Some(ProviderHandle {
                    provider: entry.provider.clone(),
                }))
            }
        }
    }

    /// Returns the existing instance for `name`, or reserves the name under
    /// `tx` with `provider` as the staged creation. The boolean reports
    /// whether this call staged the creation.
    pub fn get_or_stage_create(
        &self,
        name: &StateProviderName,
        requested: &Capability,
        tx: TxId,
        provider: impl FnOnce(ProviderId) -> Arc<dyn StateProvider>,
    ) -> Result<(ProviderHandle, bool), TableError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(name) {
            Self::check_capability(name, requested, entry)?;
            return Ok((
                ProviderHandle {
                    provider: entry.provider.clone(),
                },
                false,
            ));
        }
        let provider = provider(self.next_provider_id());
        entries.insert(
            name.clone(),
            TableEntry {
                provider: provider.clone(),
                state: EntryState::PendingCreate { tx },
            },
        );
        Ok((ProviderHandle { provider }, true))
    }

    /// Reverts a reservation made by `get_or_stage_create` whose replication
    /// proposal failed before the transaction terminated.
    pub fn revert_staged_create(&self, name: &StateProviderName, tx: TxId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(name) {
            if entry.state == (EntryState::PendingCreate { tx }) {
                entries.remove(name);
            }
        }
    }

    /// Lookup without a capability check; used by removal, which operates on
    /// the name alone.
    pub fn get_any(&self, name: &StateProviderName) -> Option<ProviderHandle> {
        let entries = self.entries.lock();
        entries.get(name).map(|entry| ProviderHandle {
            provider: entry.provider.clone(),
        })
    }

    /// Reverts a removal staged by `tx` whose replication proposal failed
    /// before the transaction terminated.
    pub fn revert_staged_remove(&self, name: &StateProviderName, tx: TxId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(name) {
            match entry.state {
                EntryState::PendingRemove {
                    tx: remover,
                    created_by_tx,
                } if remover == tx => {
                    entry.state = if created_by_tx {
                        EntryState::PendingCreate { tx }
                    } else {
                        EntryState::Active
                    };
                }
                _ => {}
            }
        }
    }

    /// Stages removal of `name` under `tx`. Removal becomes durable when the
    /// transaction commits.
    pub fn stage_remove(&self, name: &StateProviderName, tx: TxId) -> Result<(), TableError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(name).ok_or_else(|| TableError::NotFound {
            name: name.clone(),
        })?;
        match entry.state {
            EntryState::Active => {
                entry.state = EntryState::PendingRemove {
                    tx,
                    created_by_tx: false,
                };
                Ok(())
            }
            EntryState::PendingCreate { tx: creator } if creator == tx => {
                // Created and removed inside one transaction: net effect of a
                // commit is removal.
                entry.state = EntryState::PendingRemove {
                    tx,
                    created_by_tx: true,
                };
                Ok(())
            }
            EntryState::PendingCreate { .. } => Err(TableError::CreationPending {
                name: name.clone(),
            }),
            EntryState::PendingRemove { .. } => Err(TableError::RemovalPending {
                name: name.clone(),
            }),
        }
    }

    /// Finalizes all effects staged by `tx` after its commit.
    pub fn finalize_commit(&self, tx: TxId) {
        let mut entries = self.entries.lock();
        entries.retain(
            |_, entry| !matches!(entry.state, EntryState::PendingRemove { tx: remover, .. } if remover == tx),
        );
        for entry in entries.values_mut() {
            if entry.state == (EntryState::PendingCreate { tx }) {
                entry.state = EntryState::Active;
            }
        }
    }

    /// Reverts all effects staged by `tx` after its abort.
    pub fn finalize_abort(&self, tx: TxId) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| {
            !matches!(entry.state, EntryState::PendingCreate { tx: creator } if creator == tx)
                && !matches!(
                    entry.state,
                    EntryState::PendingRemove { tx: remover, created_by_tx: true } if remover == tx
                )
        });
        for entry in entries.values_mut() {
            if entry.state
                == (EntryState::PendingRemove {
                    tx,
                    created_by_tx: false,
                })
            {
                entry.state = EntryState::Active;
            }
        }
    }

    /// Best-effort snapshot of present providers (staged creations excluded;
    /// staged removals are still present until their transaction commits).
    pub fn enumerate(&self) -> Vec<ProviderHandle> {
        let entries = self.entries.lock();
        let mut handles: Vec<_> = entries
            .values()
            .filter(|entry| !matches!(entry.state, EntryState::PendingCreate { .. }))
            .map(|entry| ProviderHandle {
                provider: entry.provider.clone(),
            })
            .collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_capability(
        name: &StateProviderName,
        requested: &Capability,
        entry: &TableEntry,
    ) -> Result<(), TableError> {
        let actual = entry.provider.capability();
        if actual != requested {
            return Err(TableError::CapabilityMismatch {
                name: name.clone(),
                requested: requested.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("state provider {name} does not exist")]
    NotFound { name: StateProviderName },
    #[error("state provider {name} holds capability {actual}, caller requested {requested}")]
    CapabilityMismatch {
        name: StateProviderName,
        requested: Capability,
        actual: Capability,
    },
    #[error("state provider {name} has an uncommitted creation pending")]
    CreationPending { name: StateProviderName },
    #[error("state provider {name} has an uncommitted removal pending")]
    RemovalPending { name: StateProviderName },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("undo payload for {name} does not match any applied redo")]
    UndoWithoutMatchingRedo { name: StateProviderName },
}
