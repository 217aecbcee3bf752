use std::time::Duration;

use queuerpc_core::{QueueSender, QueueTransport, SessionReceiver, TransportError};
use queuerpc_memory::{ChaosConfig, MemoryQueue};

use crate::{request, session};

const WAIT: Duration = Duration::from_secs(5);

/// One-shot send failures fire exactly the requested number of times
#[tokio::test(start_paused = true)]
async fn test_fail_next_sends() {
    let queue = MemoryQueue::new();
    let sender = queue.connect().create_sender();
    queue.fail_next_sends(2);

    for _ in 0..2 {
        let err = sender
            .send(&request("a", "calc", WAIT))
            .await
            .expect_err("injected failure");
        assert!(matches!(err, TransportError::SendFailed { .. }));
        assert!(err.is_transient());
    }

    sender.send(&request("a", "calc", WAIT)).await.expect("send");
    assert_eq!(queue.ready_count(&session("calc")), 1);
    assert_eq!(queue.stats().sent, 1);
}

/// A duplicated send is delivered twice
#[tokio::test(start_paused = true)]
async fn test_duplicate_next_sends() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));
    queue.duplicate_next_sends(1);

    sender.send(&request("a", "calc", WAIT)).await.expect("send");

    let batch = receiver.receive_messages(10, WAIT).await.expect("receive");
    assert_eq!(batch.len(), 2);
    assert_eq!(
        batch[0].envelope().message_id,
        batch[1].envelope().message_id
    );
    assert_eq!(queue.stats().duplicated, 1);
}

/// A receive failure is transient and leaves the handle usable
#[tokio::test(start_paused = true)]
async fn test_fail_next_receives() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let receiver = connection.create_receiver(&session("calc"));
    connection
        .create_sender()
        .send(&request("a", "calc", WAIT))
        .await
        .expect("send");
    queue.fail_next_receives(1);

    let err = receiver
        .receive_messages(1, WAIT)
        .await
        .expect_err("injected failure");
    assert!(matches!(err, TransportError::ReceiveFailed { .. }));
    assert!(!receiver.is_closed());

    let batch = receiver.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(batch.len(), 1);
}

/// A close fault closes the handle and frees the session
#[tokio::test(start_paused = true)]
async fn test_close_next_receives() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let receiver = connection.create_receiver(&session("calc"));
    queue.close_next_receives(1);

    let err = receiver
        .receive_messages(1, WAIT)
        .await
        .expect_err("injected close");
    assert_eq!(
        err,
        TransportError::ReceiverClosed {
            session_id: "calc".to_string()
        }
    );
    assert!(receiver.is_closed());

    // Subsequent receives on the same handle keep failing.
    assert!(receiver.receive_messages(1, WAIT).await.is_err());

    // A fresh handle can take the session.
    let fresh = connection.create_receiver(&session("calc"));
    let batch = fresh
        .receive_messages(1, Duration::from_millis(10))
        .await
        .expect("fresh receive");
    assert!(batch.is_empty());
}

/// A stalled receive never resolves on its own
#[tokio::test(start_paused = true)]
async fn test_stall_next_receives() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let receiver = connection.create_receiver(&session("calc"));
    queue.stall_next_receives(1);

    let stalled = tokio::time::timeout(
        Duration::from_secs(600),
        receiver.receive_messages(1, Duration::from_secs(1)),
    )
    .await;
    assert!(stalled.is_err(), "stalled receive should not resolve");

    let batch = receiver
        .receive_messages(1, Duration::from_secs(1))
        .await
        .expect("next receive");
    assert!(batch.is_empty());
}

/// The same seed yields the same fault sequence
#[tokio::test(start_paused = true)]
async fn test_chaos_is_deterministic() {
    async fn outcomes(seed: u64) -> Vec<bool> {
        let queue = MemoryQueue::with_chaos(ChaosConfig::flaky(seed));
        let sender = queue.connect().create_sender();
        let mut results = Vec::new();
        for i in 0..50 {
            let id = format!("m{i}");
            results.push(sender.send(&request(&id, "calc", WAIT)).await.is_ok());
        }
        results
    }

    let first = outcomes(7).await;
    let second = outcomes(7).await;
    assert_eq!(first, second);
    assert!(first.iter().any(|ok| *ok));
}
