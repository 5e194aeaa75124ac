//! Async adapter over the synchronous state manager. Operations run on the
//! blocking pool; a shared cancel token lets callers abort in-flight work,
//! including active retry delays.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use super::{StateManager, StateManagerError};
use crate::backup::{BackupInfo, BackupKind, BackupVersion, RestorePolicy};
use crate::capability::Capability;
use crate::gateway::ReplicationError;
use crate::provider::ProviderHandle;
use crate::util::CancelToken;

/// Cloneable async façade around an `Arc<StateManager>`.
pub struct AsyncStateManager {
    inner: Arc<StateManager>,
    cancel: CancelToken,
}

impl AsyncStateManager {
    pub fn new(inner: Arc<StateManager>) -> Self {
        Self {
            inner,
            cancel: CancelToken::new(),
        }
    }

    pub fn inner(&self) -> &Arc<StateManager> {
        &self.inner
    }

    /// Trips the shared token: every in-flight and future operation on this
    /// adapter observes the cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn get_or_add(
        &self,
        short_name: impl Into<String>,
        capability: Capability,
        timeout: Duration,
    ) -> Result<ProviderHandle, StateManagerError> {
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let short_name = short_name.into();
        task::spawn_blocking(move || {
            inner.get_or_add_with_timeout(&short_name, capability, timeout, &cancel)
        })
        .await
        .map_err(map_join_error)?
    }

    pub async fn remove(
        &self,
        short_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<bool, StateManagerError> {
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let short_name = short_name.into();
        task::spawn_blocking(move || inner.remove_with_timeout(&short_name, timeout, &cancel))
            .await
            .map_err(map_join_error)?
    }

    pub async fn try_get(
        &self,
        short_name: impl Into<String>,
        capability: Capability,
    ) -> Result<Option<ProviderHandle>, StateManagerError> {
        let inner = self.inner.clone();
        let short_name = short_name.into();
        task::spawn_blocking(move || inner.try_get(&short_name, &capability))
            .await
            .map_err(map_join_error)?
    }

    pub async fn backup<F>(
        &self,
        kind: BackupKind,
        timeout: Duration,
        on_ready: F,
    ) -> Result<BackupInfo, StateManagerError>
    where
        F: Fn(&BackupInfo, &CancelToken) -> bool + Send + Sync + 'static,
    {
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        task::spawn_blocking(move || inner.backup(kind, timeout, &cancel, &on_ready))
            .await
            .map_err(map_join_error)?
    }

    pub async fn restore(
        &self,
        backup_dir: impl Into<PathBuf>,
        policy: RestorePolicy,
    ) -> Result<BackupVersion, StateManagerError> {
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let backup_dir = backup_dir.into();
        task::spawn_blocking(move || inner.restore(&backup_dir, policy, &cancel))
            .await
            .map_err(map_join_error)?
    }
}

impl Clone for AsyncStateManager {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

fn map_join_error(_err: task::JoinError) -> StateManagerError {
    StateManagerError::Replication(ReplicationError::Cancelled)
}
