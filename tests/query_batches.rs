//! Batched reads: ordering, concurrency bound, partial failure, cancellation.

mod common;

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use node_daemon::clients::ClientError;
use node_daemon::lifecycle::CancelToken;
use node_daemon::query::{QueryError, QueryManager, QuerySettings, MULTICALL3_ADDRESS};

fn query_manager(
    primary: &Arc<FakeExecutionClient>,
    fallback: Option<&Arc<FakeExecutionClient>>,
    batch_size: usize,
    concurrency_limit: usize,
) -> QueryManager {
    QueryManager::new(
        execution_manager(primary, fallback),
        QuerySettings {
            multicall_address: MULTICALL3_ADDRESS,
            batch_size,
            concurrency_limit,
        },
    )
}

fn target(n: u8) -> Address {
    Address::with_last_byte(n)
}

fn decoded(result: &Result<node_daemon::query::CallOutput, QueryError>) -> u64 {
    let output = result.as_ref().expect("call should succeed");
    let value: U256 = output.decode::<echo::echoCall>().unwrap();
    value.to::<u64>()
}

#[tokio::test]
async fn test_results_keep_input_order_across_batches() {
    let node = FakeExecutionClient::new("primary");
    node.set_call_delay(Duration::from_millis(5));
    let manager = query_manager(&node, None, 10, 3);

    let calls: Vec<_> = (0..95).map(|i| echo_call(target((i % 7) as u8 + 1), i)).collect();
    let results = manager.query(calls, &CancelToken::new()).await;

    assert_eq!(results.len(), 95);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(decoded(result), i as u64);
        assert_eq!(result.as_ref().unwrap().target, target((i % 7) as u8 + 1));
    }
    // 95 calls in batches of 10.
    assert_eq!(node.call_count(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batches_in_flight_never_exceed_limit() {
    let node = FakeExecutionClient::new("primary");
    node.set_call_delay(Duration::from_millis(20));
    let manager = Arc::new(query_manager(&node, None, 5, 3));

    // Two concurrent requests share the same bound.
    let a = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let calls: Vec<_> = (0..50).map(|i| echo_call(target(1), i)).collect();
            manager.query(calls, &CancelToken::new()).await
        })
    };
    let b = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let calls: Vec<_> = (0..50).map(|i| echo_call(target(2), i)).collect();
            manager.query(calls, &CancelToken::new()).await
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.iter().chain(b.iter()).all(|r| r.is_ok()));
    assert!(node.peak_in_flight() <= 3, "peak was {}", node.peak_in_flight());
    assert!(node.peak_in_flight() >= 2);
    assert_eq!(manager.available_slots(), 3);
}

#[tokio::test]
async fn test_reverting_call_fails_alone() {
    let node = FakeExecutionClient::new("primary");
    node.revert_target(target(9));
    let manager = query_manager(&node, None, 100, 2);

    let calls = vec![echo_call(target(1), 1), echo_call(target(9), 2), echo_call(target(1), 3)];
    let results = manager.query(calls, &CancelToken::new()).await;

    assert_eq!(decoded(&results[0]), 1);
    match &results[1] {
        Err(QueryError::CallReverted { target: t, reason }) => {
            assert_eq!(*t, target(9));
            assert!(reason.contains("reverted by fake"), "reason: {reason}");
        }
        other => panic!("expected CallReverted, got {other:?}"),
    }
    assert_eq!(decoded(&results[2]), 3);
}

#[tokio::test]
async fn test_failed_batch_only_affects_its_own_calls() {
    let node = FakeExecutionClient::new("primary");
    node.poison_batches_with(target(13));
    let manager = query_manager(&node, None, 2, 2);

    // Batches: [0,1] [2,3] [4]; the poisoned call sits in the second one.
    let calls = vec![
        echo_call(target(1), 0),
        echo_call(target(1), 1),
        echo_call(target(13), 2),
        echo_call(target(1), 3),
        echo_call(target(1), 4),
    ];
    let results = manager.query(calls, &CancelToken::new()).await;

    assert_eq!(decoded(&results[0]), 0);
    assert_eq!(decoded(&results[1]), 1);
    assert!(matches!(results[2], Err(QueryError::Client(ClientError::Node { .. }))));
    assert!(matches!(results[3], Err(QueryError::Client(ClientError::Node { .. }))));
    assert_eq!(decoded(&results[4]), 4);
}

#[tokio::test]
async fn test_transport_failure_moves_request_to_fallback() {
    let primary = FakeExecutionClient::new("primary");
    let fallback = FakeExecutionClient::new("fallback");
    primary.crash_on_next_call();
    let manager = query_manager(&primary, Some(&fallback), 4, 2);

    let calls: Vec<_> = (0..12).map(|i| echo_call(target(1), i)).collect();
    let results = manager.query(calls, &CancelToken::new()).await;

    for (i, result) in results.iter().enumerate() {
        assert_eq!(decoded(result), i as u64);
    }
    assert_eq!(fallback.call_count(), 3);
}

#[tokio::test]
async fn test_no_client_fails_every_call() {
    let primary = FakeExecutionClient::new("primary");
    primary.set_reachable(false);
    let manager = query_manager(&primary, None, 10, 2);

    let calls: Vec<_> = (0..4).map(|i| echo_call(target(1), i)).collect();
    let results = manager.query(calls, &CancelToken::new()).await;

    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(QueryError::Client(ClientError::NoAvailableClient { .. })))));
    assert_eq!(primary.call_count(), 0);
}

#[tokio::test]
async fn test_cancellation_releases_slots() {
    let node = FakeExecutionClient::new("primary");
    node.set_call_delay(Duration::from_secs(30));
    let manager = Arc::new(query_manager(&node, None, 1, 2));
    let cancel = CancelToken::new();

    let handle = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let calls: Vec<_> = (0..6).map(|i| echo_call(target(1), i)).collect();
            manager.query(calls, &cancel).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.in_flight(), 2);
    cancel.cancel();

    let results = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancelled query should return promptly")
        .unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| matches!(r, Err(QueryError::Cancelled))));
    assert_eq!(manager.available_slots(), 2);
    assert_eq!(node.in_flight(), 0);

    // The manager is still usable afterwards.
    node.set_call_delay(Duration::ZERO);
    let output = manager.query_one(echo_call(target(1), 7), &CancelToken::new()).await;
    assert_eq!(decoded(&output), 7);
}

#[tokio::test]
async fn test_empty_request_makes_no_calls() {
    let node = FakeExecutionClient::new("primary");
    let manager = query_manager(&node, None, 10, 2);

    let results = manager.query(Vec::new(), &CancelToken::new()).await;
    assert!(results.is_empty());
    assert_eq!(node.call_count(), 0);
}
