#![cfg(feature = "rt")]

mod support;

use std::time::Duration;

use replistate::{
    AsyncStateManager, Capability, ReplicationError, StateManagerError, ValueKind,
    DEFAULT_OPERATION_TIMEOUT,
};
use support::open_primary;

fn queue_capability() -> Capability {
    Capability::concurrent_queue(ValueKind::Bytes)
}

#[tokio::test(flavor = "multi_thread")]
async fn async_operations_drive_the_sync_core() {
    let (manager, _log) = open_primary();
    let adapter = AsyncStateManager::new(manager);

    let handle = adapter
        .get_or_add("jobs", queue_capability(), DEFAULT_OPERATION_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(handle.name().short_name().unwrap(), "jobs");

    let found = adapter
        .try_get("jobs", queue_capability())
        .await
        .unwrap();
    assert!(found.is_some());

    assert!(adapter.remove("jobs", DEFAULT_OPERATION_TIMEOUT).await.unwrap());
    assert!(!adapter.remove("jobs", DEFAULT_OPERATION_TIMEOUT).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_propagates_to_in_flight_operations() {
    let (manager, log) = open_primary();
    let adapter = AsyncStateManager::new(manager);
    log.inject_append_errors(vec![replistate::LogError::QueueFull; 200]);

    let racing = adapter.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        racing.cancel();
    });

    let err = adapter
        .get_or_add("jobs", queue_capability(), Duration::from_secs(30))
        .await
        .unwrap_err();
    canceller.await.unwrap();
    assert!(matches!(
        err,
        StateManagerError::Replication(ReplicationError::Cancelled)
    ));
}
