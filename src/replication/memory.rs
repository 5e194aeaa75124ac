//! In-process replicated log used by tests and single-node embeddings.
//! Honors the [`ReplicatedLog`] contract, including at-most-once re-proposal,
//! and supports scripted append rejection for exercising retry paths.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::{
    Epoch, LogError, LogVersion, Lsn, OpenMode, ProviderId, ReplicaRole, ReplicatedLog, TxId,
};

#[derive(Debug, Clone)]
pub struct CommittedRecord {
    pub tx: TxId,
    pub op_seq: u64,
    pub provider_id: ProviderId,
    pub metadata: Vec<u8>,
    pub redo: Vec<u8>,
    pub undo: Option<Vec<u8>>,
    pub lsn: Lsn,
    pub commit_lsn: Lsn,
}

#[derive(Debug)]
struct StagedOp {
    op_seq: u64,
    provider_id: ProviderId,
    metadata: Vec<u8>,
    redo: Vec<u8>,
    undo: Option<Vec<u8>>,
    lsn: Lsn,
}

#[derive(Debug, Default)]
struct LogInner {
    opened: bool,
    closed: bool,
    role: Option<ReplicaRole>,
    write_blocked: bool,
    read_blocked: bool,
    epoch: Epoch,
    next_lsn: u64,
    last_committed: Lsn,
    committed: Vec<CommittedRecord>,
    transactions: HashMap<TxId, Vec<StagedOp>>,
    injected_append_errors: VecDeque<LogError>,
    injected_commit_errors: VecDeque<LogError>,
}

#[derive(Debug, Default)]
pub struct InMemoryLog {
    inner: Mutex<LogInner>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        let log = Self::default();
        log.inner.lock().next_lsn = 1;
        log
    }

    /// Queues errors returned by subsequent `append` attempts, in order,
    /// before any real staging happens.
    pub fn inject_append_errors(&self, errors: impl IntoIterator<Item = LogError>) {
        self.inner.lock().injected_append_errors.extend(errors);
    }

    /// Queues errors returned by subsequent `commit_transaction` attempts.
    pub fn inject_commit_errors(&self, errors: impl IntoIterator<Item = LogError>) {
        self.inner.lock().injected_commit_errors.extend(errors);
    }

    /// Simulates loss (or recovery) of write status without a role change.
    pub fn set_write_blocked(&self, blocked: bool) {
        self.inner.lock().write_blocked = blocked;
    }

    pub fn set_read_blocked(&self, blocked: bool) {
        self.inner.lock().read_blocked = blocked;
    }

    /// Forces the log's version coordinates; test affordance for backup and
    /// restore scenarios.
    pub fn set_version(&self, version: LogVersion) {
        let mut inner = self.inner.lock();
        inner.epoch = version.epoch;
        inner.last_committed = version.lsn;
        inner.next_lsn = version.lsn.0 + 1;
    }

    pub fn committed_records(&self) -> Vec<CommittedRecord> {
        self.inner.lock().committed.clone()
    }

    pub fn role(&self) -> Option<ReplicaRole> {
        self.inner.lock().role
    }

    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        inner.opened && !inner.closed
    }
}

impl ReplicatedLog for InMemoryLog {
    fn open(&self, _mode: OpenMode) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        inner.opened = true;
        Ok(())
    }

    fn change_role(&self, role: ReplicaRole) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if !inner.opened || inner.closed {
            return Err(LogError::Closed);
        }
        inner.role = Some(role);
        Ok(())
    }

    fn close(&self) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if !inner.opened {
            return Err(LogError::Closed);
        }
        inner.closed = true;
        Ok(())
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.transactions.clear();
    }

    fn is_writable(&self) -> bool {
        let inner = self.inner.lock();
        inner.opened
            && !inner.closed
            && !inner.write_blocked
            && inner.role == Some(ReplicaRole::Primary)
    }

    fn is_readable(&self) -> bool {
        let inner = self.inner.lock();
        inner.opened && !inner.closed && !inner.read_blocked
    }

    fn begin_transaction(&self, tx: TxId) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if !inner.opened || inner.closed {
            return Err(LogError::Closed);
        }
        inner.transactions.entry(tx).or_default();
        Ok(())
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
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        if let Some(error) = inner.injected_append_errors.pop_front() {
            return Err(error);
        }
        if inner.write_blocked || inner.role != Some(ReplicaRole::Primary) {
            return Err(LogError::NotWritable);
        }
        let lsn = Lsn(inner.next_lsn);
        let staged = inner
            .transactions
            .get_mut(&tx)
            .ok_or(LogError::TransactionNotFound { tx })?;
        // Re-proposal of an unacknowledged operation applies at most once.
        if let Some(existing) = staged.iter().find(|op| op.op_seq == op_seq) {
            return Ok(existing.lsn);
        }
        staged.push(StagedOp {
            op_seq,
            provider_id,
            metadata: metadata.to_vec(),
            redo: redo.to_vec(),
            undo: undo.map(<[u8]>::to_vec),
            lsn,
        });
        inner.next_lsn += 1;
        Ok(lsn)
    }

    fn commit_transaction(&self, tx: TxId) -> Result<Lsn, LogError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        if let Some(error) = inner.injected_commit_errors.pop_front() {
            return Err(error);
        }
        if inner.write_blocked || inner.role != Some(ReplicaRole::Primary) {
            return Err(LogError::NotWritable);
        }
        let staged = inner
            .transactions
            .remove(&tx)
            .ok_or(LogError::TransactionNotFound { tx })?;
        let commit_lsn = Lsn(inner.next_lsn);
        inner.next_lsn += 1;
        for op in staged {
            inner.committed.push(CommittedRecord {
                tx,
                op_seq: op.op_seq,
                provider_id: op.provider_id,
                metadata: op.metadata,
                redo: op.redo,
                undo: op.undo,
                lsn: op.lsn,
                commit_lsn,
            });
        }
        inner.last_committed = commit_lsn;
        Ok(commit_lsn)
    }

    fn abort_transaction(&self, tx: TxId) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        inner
            .transactions
            .remove(&tx)
            .ok_or(LogError::TransactionNotFound { tx })?;
        Ok(())
    }

    fn current_version(&self) -> LogVersion {
        let inner = self.inner.lock();
        LogVersion::new(inner.epoch, inner.last_committed)
    }

    fn complete_restore(&self, version: LogVersion) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }
        // Restored state starts a new data-loss era ahead of the backup.
        inner.epoch = Epoch::new(
            version.epoch.data_loss_number + 1,
            version.epoch.configuration_number,
        );
        inner.last_committed = version.lsn;
        inner.next_lsn = version.lsn.0 + 1;
        inner.committed.clear();
        inner.transactions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened_primary() -> InMemoryLog {
        let log = InMemoryLog::new();
        log.open(OpenMode::New).unwrap();
        log.change_role(ReplicaRole::Primary).unwrap();
        log
    }

    #[test]
    fn reproposal_returns_the_original_lsn() {
        let log = opened_primary();
        log.begin_transaction(7).unwrap();
        let first = log.append(7, 1, 3, b"m", b"r", None).unwrap();
        let again = log.append(7, 1, 3, b"m", b"r", None).unwrap();
        assert_eq!(first, again);
        log.commit_transaction(7).unwrap();
        assert_eq!(log.committed_records().len(), 1);
    }

    #[test]
    fn aborted_transaction_leaves_no_log_effect() {
        let log = opened_primary();
        log.begin_transaction(9).unwrap();
        log.append(9, 1, 3, b"m", b"r", None).unwrap();
        log.abort_transaction(9).unwrap();
        assert!(log.committed_records().is_empty());
    }

    #[test]
    fn injected_errors_surface_before_staging() {
        let log = opened_primary();
        log.begin_transaction(1).unwrap();
        log.inject_append_errors([LogError::NotWritable]);
        assert_eq!(
            log.append(1, 1, 3, b"m", b"r", None),
            Err(LogError::NotWritable)
        );
        assert_eq!(log.append(1, 1, 3, b"m", b"r", None).map(|l| l.0), Ok(1));
    }

    #[test]
    fn secondary_rejects_writes() {
        let log = InMemoryLog::new();
        log.open(OpenMode::New).unwrap();
        log.change_role(ReplicaRole::Secondary).unwrap();
        log.begin_transaction(1).unwrap();
        assert_eq!(
            log.append(1, 1, 3, b"m", b"r", None),
            Err(LogError::NotWritable)
        );
    }

    #[test]
    fn restore_bumps_the_data_loss_number() {
        let log = opened_primary();
        let backup = LogVersion::new(Epoch::new(3, 2), Lsn(40));
        log.complete_restore(backup).unwrap();
        let current = log.current_version();
        assert_eq!(current.epoch.data_loss_number, 4);
        assert_eq!(current.lsn, Lsn(40));
        assert!(current > backup);
    }
}
