//! Contract between the state manager and the external replicated log
//! engine. Append/acknowledge/checkpoint/truncate mechanics live behind
//! [`ReplicatedLog`]; this crate only depends on the control surface below.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::InMemoryLog;

/// Log versioning coordinates: a data-loss number bumped on every quorum-loss
/// recovery, and a configuration number bumped on reconfiguration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Epoch {
    pub data_loss_number: u64,
    pub configuration_number: u64,
}

impl Epoch {
    pub fn new(data_loss_number: u64, configuration_number: u64) -> Self {
        Self {
            data_loss_number,
            configuration_number,
        }
    }
}

/// Logical sequence number of a replicated record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable point in replicated history: the epoch and LSN of the highest
/// record it covers. Total order: data-loss number, then configuration
/// number, then LSN.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogVersion {
    pub epoch: Epoch,
    pub lsn: Lsn,
}

impl LogVersion {
    pub fn new(epoch: Epoch, lsn: Lsn) -> Self {
        Self { epoch, lsn }
    }
}

/// Role granted to a replica by the cluster. `Primary` grants writes,
/// `Secondary` applies replicated records, `None` is pre-demotion teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    Primary,
    Secondary,
    None,
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicaRole::Primary => "primary",
            ReplicaRole::Secondary => "secondary",
            ReplicaRole::None => "none",
        };
        f.write_str(name)
    }
}

/// Whether the replica opens over an empty log or recovers an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    New,
    Existing,
}

pub type TxId = u64;
pub type ProviderId = u64;

/// Provider id the state manager uses for its own replicated metadata
/// operations (provider creation and removal records).
pub const STATE_MANAGER_PROVIDER_ID: ProviderId = 0;

/// The control surface the state manager requires from the replication
/// engine. Re-proposal of an unacknowledged operation (same transaction and
/// operation sequence) must be treated as at-most-once by implementations.
pub trait ReplicatedLog: Send + Sync {
    fn open(&self, mode: OpenMode) -> Result<(), LogError>;
    fn change_role(&self, role: ReplicaRole) -> Result<(), LogError>;
    fn close(&self) -> Result<(), LogError>;
    /// Unconditional teardown; must not fail.
    fn abort(&self);

    fn is_writable(&self) -> bool;
    fn is_readable(&self) -> bool;

    fn begin_transaction(&self, tx: TxId) -> Result<(), LogError>;
    /// Stages one operation under `tx`. `op_seq` identifies the logical
    /// operation for at-most-once re-proposal.
    fn append(
        &self,
        tx: TxId,
        op_seq: u64,
        provider_id: ProviderId,
        metadata: &[u8],
        redo: &[u8],
        undo: Option<&[u8]>,
    ) -> Result<Lsn, LogError>;
    fn commit_transaction(&self, tx: TxId) -> Result<Lsn, LogError>;
    fn abort_transaction(&self, tx: TxId) -> Result<(), LogError>;

    /// Coordinates of the highest committed record.
    fn current_version(&self) -> LogVersion;
    /// Installs restored state: adopts `version` and opens a fresh epoch with
    /// a bumped data-loss number.
    fn complete_restore(&self, version: LogVersion) -> Result<(), LogError>;
}

/// Errors surfaced by the replication engine, split into transiently
/// retryable rejections and fatal conditions. The gateway consults
/// [`LogError::is_retryable`] to decide between backoff and immediate
/// surfacing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("log is not currently writable")]
    NotWritable,
    #[error("replication queue is full")]
    QueueFull,
    #[error("reconfiguration is pending")]
    ReconfigurationPending,
    #[error("log is closed")]
    Closed,
    #[error("replica is not primary")]
    NotPrimary,
    #[error("operation serialization failed: {0}")]
    Serialization(String),
    #[error("transaction {tx} is unknown to the log")]
    TransactionNotFound { tx: TxId },
    #[error("transaction {tx} was already terminated")]
    TransactionTerminated { tx: TxId },
    #[error("internal log failure: {0}")]
    Internal(String),
}

impl LogError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LogError::NotWritable | LogError::QueueFull | LogError::ReconfigurationPending
        )
    }
}
