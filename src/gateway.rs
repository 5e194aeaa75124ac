use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::replication::{LogError, Lsn, ProviderId, ReplicatedLog};
use crate::telemetry::SharedMetrics;
use crate::transaction::{Transaction, TransactionError};
use crate::util::{CancelToken, RetryError, RetryPolicy};

/// Wraps "append operation to the replicated log" with transient/fatal error
/// classification and bounded-backoff retry.
///
/// A retryable rejection re-proposes the same logical operation (same
/// transaction and operation sequence); the log treats re-proposal as
/// at-most-once. Fatal errors surface immediately. Retry reporting is
/// flood-controlled: the first retry of a proposal is logged at warn, every
/// 4th consecutive retry at debug.
pub struct ReplicationGateway {
    log: Arc<dyn ReplicatedLog>,
    metrics: SharedMetrics,
}

impl ReplicationGateway {
    pub fn new(log: Arc<dyn ReplicatedLog>, metrics: SharedMetrics) -> Self {
        Self { log, metrics }
    }

    /// Proposes one operation under `tx`, retrying transient log rejections
    /// with exponential backoff until `timeout` is spent. Cancellation
    /// propagates through the active delay and leaves no partial log effect.
    pub fn propose(
        &self,
        tx: &Transaction,
        provider_id: ProviderId,
        metadata: &[u8],
        redo: &[u8],
        undo: Option<&[u8]>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Lsn, ReplicationError> {
        tx.ensure_active()?;
        let op_seq = tx.next_op_seq();
        let mut session = RetryPolicy::replication(timeout).session();
        let mut retries: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                self.metrics.inc_counter("gateway.cancelled_total", 1);
                return Err(ReplicationError::Cancelled);
            }
            match self
                .log
                .append(tx.id(), op_seq, provider_id, metadata, redo, undo)
            {
                Ok(lsn) => {
                    self.metrics.inc_counter("gateway.proposals_total", 1);
                    return Ok(lsn);
                }
                Err(err) if err.is_retryable() => {
                    retries += 1;
                    if retries == 1 {
                        warn!(
                            "event=replication_retry tx={} op_seq={op_seq} attempt={retries} error={err}",
                            tx.id()
                        );
                    } else if retries % 4 == 0 {
                        debug!(
                            "event=replication_retry tx={} op_seq={op_seq} attempt={retries} error={err}",
                            tx.id()
                        );
                    }
                    self.metrics.inc_counter("gateway.retries_total", 1);
                    match session.wait(cancel) {
                        Ok(()) => {}
                        Err(RetryError::Cancelled) => {
                            self.metrics.inc_counter("gateway.cancelled_total", 1);
                            return Err(ReplicationError::Cancelled);
                        }
                        Err(RetryError::Exhausted { elapsed, budget }) => {
                            self.metrics.inc_counter("gateway.exhausted_total", 1);
                            warn!(
                                "event=replication_timeout tx={} op_seq={op_seq} retries={retries} elapsed={elapsed:?}",
                                tx.id()
                            );
                            return Err(ReplicationError::TimedOut {
                                retries,
                                elapsed,
                                budget,
                            });
                        }
                    }
                }
                Err(err) => {
                    self.metrics.inc_counter("gateway.fatal_total", 1);
                    error!(
                        "event=replication_fatal tx={} op_seq={op_seq} error={err}",
                        tx.id()
                    );
                    return Err(ReplicationError::Fatal(err));
                }
            }
        }
    }

    pub fn is_writable(&self) -> bool {
        self.log.is_writable()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("replication timed out after {retries} retries ({elapsed:?} of {budget:?})")]
    TimedOut {
        retries: u64,
        elapsed: Duration,
        budget: Duration,
    },
    #[error("replication cancelled")]
    Cancelled,
    #[error("fatal replication failure: {0}")]
    Fatal(LogError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}
