use log::warn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::replication::{LogError, Lsn, ReplicatedLog, TxId};
use crate::provider::ProviderTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed(Lsn),
    Aborted,
}

/// Unit of atomicity for state-provider operations. Operations are staged in
/// attach order and become durable when the transaction commits; an abort
/// discards them with no log effect. A transaction terminates exactly once.
pub struct Transaction {
    id: TxId,
    log: Arc<dyn ReplicatedLog>,
    table: Arc<ProviderTable>,
    state: Mutex<TxState>,
    next_op_seq: AtomicU64,
}

impl Transaction {
    pub fn begin(
        id: TxId,
        log: Arc<dyn ReplicatedLog>,
        table: Arc<ProviderTable>,
    ) -> Result<Self, LogError> {
        log.begin_transaction(id)?;
        Ok(Self {
            id,
            log,
            table,
            state: Mutex::new(TxState::Active),
            next_op_seq: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        *self.state.lock() == TxState::Active
    }

    pub(crate) fn ensure_active(&self) -> Result<(), TransactionError> {
        match *self.state.lock() {
            TxState::Active => Ok(()),
            _ => Err(TransactionError::AlreadyTerminated { tx: self.id }),
        }
    }

    pub(crate) fn next_op_seq(&self) -> u64 {
        self.next_op_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Commits staged operations in the order they were attached. On success
    /// the staged provider-table effects (creations, removals) become
    /// durable. A failed commit leaves the transaction active so the caller
    /// can abort it.
    pub fn commit(&self) -> Result<Lsn, TransactionError> {
        let mut state = self.state.lock();
        if *state != TxState::Active {
            return Err(TransactionError::AlreadyTerminated { tx: self.id });
        }
        let lsn = self.log.commit_transaction(self.id)?;
        self.table.finalize_commit(self.id);
        *state = TxState::Committed(lsn);
        Ok(lsn)
    }

    /// Discards staged operations and reverts staged provider-table effects.
    pub fn abort(&self) -> Result<(), TransactionError> {
        let mut state = self.state.lock();
        if *state != TxState::Active {
            return Err(TransactionError::AlreadyTerminated { tx: self.id });
        }
        self.log.abort_transaction(self.id)?;
        self.table.finalize_abort(self.id);
        *state = TxState::Aborted;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let state = *self.state.lock();
        if state == TxState::Active {
            warn!("event=transaction_dropped_active tx={}; aborting", self.id);
            if self.log.abort_transaction(self.id).is_ok() {
                self.table.finalize_abort(self.id);
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {tx} was already committed or aborted")]
    AlreadyTerminated { tx: TxId },
    #[error(transparent)]
    Log(#[from] LogError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{InMemoryLog, OpenMode, ReplicaRole};

    fn fixture() -> (Arc<InMemoryLog>, Arc<ProviderTable>) {
        let log = Arc::new(InMemoryLog::new());
        log.open(OpenMode::New).unwrap();
        log.change_role(ReplicaRole::Primary).unwrap();
        (log, Arc::new(ProviderTable::new()))
    }

    #[test]
    fn commit_terminates_exactly_once() {
        let (log, table) = fixture();
        let tx = Transaction::begin(1, log, table).unwrap();
        tx.commit().unwrap();
        assert!(matches!(
            tx.commit(),
            Err(TransactionError::AlreadyTerminated { tx: 1 })
        ));
        assert!(matches!(
            tx.abort(),
            Err(TransactionError::AlreadyTerminated { tx: 1 })
        ));
    }

    #[test]
    fn abort_discards_staged_operations() {
        let (log, table) = fixture();
        let tx = Transaction::begin(2, log.clone(), table).unwrap();
        log.append(2, tx.next_op_seq(), 1, b"m", b"r", None).unwrap();
        tx.abort().unwrap();
        assert!(log.committed_records().is_empty());
    }

    #[test]
    fn failed_commit_leaves_transaction_active() {
        let (log, table) = fixture();
        let tx = Transaction::begin(3, log.clone(), table).unwrap();
        log.set_write_blocked(true);
        assert!(tx.commit().is_err());
        assert!(tx.is_active());
        log.set_write_blocked(false);
        tx.commit().unwrap();
    }

    #[test]
    fn dropping_an_active_transaction_aborts_it() {
        let (log, table) = fixture();
        {
            let tx = Transaction::begin(4, log.clone(), table).unwrap();
            log.append(4, tx.next_op_seq(), 1, b"m", b"r", None).unwrap();
        }
        assert!(log.committed_records().is_empty());
        // A fresh transaction can reuse the log unimpeded.
        let (log2, table2) = fixture();
        Transaction::begin(4, log2, table2).unwrap();
    }
}
