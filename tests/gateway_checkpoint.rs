use std::sync::Arc;
use std::time::Duration;

use replistate::{
    CancelToken, InMemoryLog, LogError, OpenMode, ProviderTable, ReplicaRole, ReplicatedLog,
    ReplicationError, ReplicationGateway, SharedMetrics, Transaction,
};

fn primary_log() -> Arc<InMemoryLog> {
    let log = Arc::new(InMemoryLog::new());
    log.open(OpenMode::New).unwrap();
    log.change_role(ReplicaRole::Primary).unwrap();
    log
}

fn begin_tx(log: &Arc<InMemoryLog>, id: u64) -> Transaction {
    Transaction::begin(id, log.clone(), Arc::new(ProviderTable::new())).unwrap()
}

#[test]
fn transient_rejections_resolve_into_a_single_ack() {
    let log = primary_log();
    let metrics = SharedMetrics::default();
    let gateway = ReplicationGateway::new(log.clone(), metrics.clone());
    let tx = begin_tx(&log, 1);
    log.inject_append_errors([
        LogError::QueueFull,
        LogError::NotWritable,
        LogError::ReconfigurationPending,
    ]);
    gateway
        .propose(
            &tx,
            5,
            b"meta",
            b"redo",
            Some(b"undo"),
            Duration::from_secs(10),
            &CancelToken::new(),
        )
        .unwrap();
    tx.commit().unwrap();

    let records = log.committed_records();
    assert_eq!(records.len(), 1, "one logical operation, one record");
    assert_eq!(records[0].undo.as_deref(), Some(&b"undo"[..]));
    assert_eq!(
        metrics.snapshot().counter("replistate.gateway.retries_total"),
        3
    );
}

#[test]
fn fatal_rejection_skips_the_backoff_loop() {
    let log = primary_log();
    let gateway = ReplicationGateway::new(log.clone(), SharedMetrics::default());
    let tx = begin_tx(&log, 2);
    log.inject_append_errors([LogError::Serialization("cycle in payload".into())]);
    let err = gateway
        .propose(
            &tx,
            5,
            b"meta",
            b"redo",
            None,
            Duration::from_secs(10),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ReplicationError::Fatal(LogError::Serialization(_))
    ));
}

#[test]
fn budget_exhaustion_surfaces_as_timed_out() {
    let log = primary_log();
    let gateway = ReplicationGateway::new(log.clone(), SharedMetrics::default());
    let tx = begin_tx(&log, 3);
    log.set_write_blocked(true);
    let err = gateway
        .propose(
            &tx,
            5,
            b"meta",
            b"redo",
            None,
            Duration::from_millis(60),
            &CancelToken::new(),
        )
        .unwrap_err();
    match err {
        ReplicationError::TimedOut { retries, .. } => assert!(retries >= 1),
        other => panic!("expected TimedOut, got {other:?}"),
    }
}

#[test]
fn cancellation_during_backoff_leaves_no_partial_effect() {
    let log = primary_log();
    let gateway = ReplicationGateway::new(log.clone(), SharedMetrics::default());
    let tx = begin_tx(&log, 4);
    log.set_write_blocked(true);
    let cancel = CancelToken::new();
    let trip = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(40));
        trip.cancel();
    });
    let err = gateway
        .propose(
            &tx,
            5,
            b"meta",
            b"redo",
            None,
            Duration::from_secs(30),
            &cancel,
        )
        .unwrap_err();
    canceller.join().unwrap();
    assert_eq!(err, ReplicationError::Cancelled);
    log.set_write_blocked(false);
    tx.commit().unwrap();
    assert!(
        log.committed_records().is_empty(),
        "a cancelled proposal must not have been partially applied"
    );
}
