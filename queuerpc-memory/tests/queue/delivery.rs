use std::time::Duration;

use queuerpc_core::{MessageId, QueueSender, QueueTransport, SessionReceiver, TransportError};
use queuerpc_memory::{MemoryQueue, QueueStats};
use tokio::time::Instant;

use crate::{request, session};

const WAIT: Duration = Duration::from_secs(5);

fn ids(messages: &[queuerpc_core::ReceivedMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.envelope().message_id.to_string())
        .collect()
}

/// Messages for a session are delivered in the order they were sent
#[tokio::test(start_paused = true)]
async fn test_session_delivery_is_fifo() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    for id in ["a", "b", "c"] {
        sender.send(&request(id, "calc", WAIT)).await.expect("send");
    }

    let batch = receiver.receive_messages(10, WAIT).await.expect("receive");
    assert_eq!(ids(&batch), ["a", "b", "c"]);
    assert!(batch.iter().all(|m| m.delivery_count() == 1));

    for message in &batch {
        message.complete().await.expect("complete");
    }
    assert_eq!(queue.ready_count(&session("calc")), 0);
    assert_eq!(queue.locked_count(&session("calc")), 0);
    assert_eq!(
        queue.stats(),
        QueueStats {
            sent: 3,
            delivered: 3,
            completed: 3,
            ..QueueStats::default()
        }
    );
}

/// Sessions are independent of each other
#[tokio::test(start_paused = true)]
async fn test_sessions_are_isolated() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();

    sender.send(&request("x", "left", WAIT)).await.expect("send");

    let right = connection.create_receiver(&session("right"));
    let batch = right
        .receive_messages(1, Duration::from_millis(100))
        .await
        .expect("receive");
    assert!(batch.is_empty());
    assert_eq!(queue.ready_count(&session("left")), 1);
}

/// Batch size is bounded by max_messages
#[tokio::test(start_paused = true)]
async fn test_receive_respects_max_messages() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    for id in ["a", "b", "c"] {
        sender.send(&request(id, "calc", WAIT)).await.expect("send");
    }

    let batch = receiver.receive_messages(2, WAIT).await.expect("receive");
    assert_eq!(ids(&batch), ["a", "b"]);
    assert_eq!(queue.ready_count(&session("calc")), 1);
    assert_eq!(queue.locked_count(&session("calc")), 2);
}

/// An abandoned message comes back with a higher delivery count
#[tokio::test(start_paused = true)]
async fn test_abandon_redelivers() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    sender.send(&request("a", "calc", WAIT)).await.expect("send");
    sender.send(&request("b", "calc", WAIT)).await.expect("send");

    let first = receiver.receive_messages(1, WAIT).await.expect("receive");
    first[0].abandon().await.expect("abandon");

    let again = receiver.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(ids(&again), ["a"]);
    assert_eq!(again[0].delivery_count(), 2);
    assert_eq!(queue.stats().redelivered, 1);
    assert_eq!(queue.stats().abandoned, 1);
}

/// Settling twice reports the lock as lost
#[tokio::test(start_paused = true)]
async fn test_double_complete_is_lock_lost() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    sender.send(&request("a", "calc", WAIT)).await.expect("send");
    let batch = receiver.receive_messages(1, WAIT).await.expect("receive");

    batch[0].complete().await.expect("first complete");
    assert_eq!(
        batch[0].complete().await,
        Err(TransportError::LockLost {
            message_id: "a".to_string()
        })
    );
}

/// An idle wait returns an empty batch once max_wait elapses
#[tokio::test(start_paused = true)]
async fn test_empty_wait_returns_empty_batch() {
    let queue = MemoryQueue::new();
    let receiver = queue.connect().create_receiver(&session("calc"));

    let started = Instant::now();
    let batch = receiver
        .receive_messages(1, Duration::from_secs(3))
        .await
        .expect("receive");

    assert!(batch.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));
}

/// A waiting receiver wakes as soon as a message arrives
#[tokio::test(start_paused = true)]
async fn test_waiting_receiver_wakes_on_send() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    let started = Instant::now();
    let (batch, sent) = tokio::join!(receiver.receive_messages(1, Duration::from_secs(30)), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        sender.send(&request("late", "calc", WAIT)).await
    });

    sent.expect("send");
    let batch = batch.expect("receive");
    assert_eq!(ids(&batch), ["late"]);
    assert!(started.elapsed() < Duration::from_secs(30));
}

/// Only one receiver may hold a session; closing it hands the session over
/// together with any unsettled messages
#[tokio::test(start_paused = true)]
async fn test_session_is_exclusive_until_closed() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let first = connection.create_receiver(&session("calc"));
    let second = connection.create_receiver(&session("calc"));

    sender.send(&request("a", "calc", WAIT)).await.expect("send");
    let held = first.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(ids(&held), ["a"]);

    assert_eq!(
        second.receive_messages(1, WAIT).await.unwrap_err(),
        TransportError::SessionLocked {
            session_id: "calc".to_string()
        }
    );

    first.close().await.expect("close");
    assert!(first.is_closed());

    let handed_over = second.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(ids(&handed_over), ["a"]);
    assert_eq!(handed_over[0].delivery_count(), 2);

    // The old lock no longer settles anything.
    assert!(matches!(
        held[0].complete().await,
        Err(TransportError::LockLost { .. })
    ));
}

/// Dropping a receiver releases its session
#[tokio::test(start_paused = true)]
async fn test_dropped_receiver_releases_session() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();

    sender.send(&request("a", "calc", WAIT)).await.expect("send");
    {
        let receiver = connection.create_receiver(&session("calc"));
        let batch = receiver.receive_messages(1, WAIT).await.expect("receive");
        assert_eq!(batch.len(), 1);
    }

    assert_eq!(queue.ready_count(&session("calc")), 1);
    assert_eq!(queue.locked_count(&session("calc")), 0);

    let receiver = connection.create_receiver(&session("calc"));
    let batch = receiver.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(batch[0].delivery_count(), 2);
}

/// Messages past their time-to-live are dropped instead of delivered
#[tokio::test(start_paused = true)]
async fn test_expired_messages_are_dropped() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let sender = connection.create_sender();
    let receiver = connection.create_receiver(&session("calc"));

    sender
        .send(&request("short", "calc", Duration::from_secs(1)))
        .await
        .expect("send");
    sender
        .send(&request("forever", "calc", Duration::ZERO))
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_secs(2)).await;

    let batch = receiver.receive_messages(10, Duration::ZERO).await.expect("receive");
    assert_eq!(ids(&batch), ["forever"]);
    assert_eq!(queue.stats().expired, 1);
}

/// Injected envelopes bypass send faults
#[tokio::test(start_paused = true)]
async fn test_inject_bypasses_faults() {
    let queue = MemoryQueue::new();
    queue.fail_next_sends(1);

    queue.inject(&request("direct", "calc", WAIT)).expect("inject");

    let receiver = queue.connect().create_receiver(&session("calc"));
    let batch = receiver.receive_messages(1, WAIT).await.expect("receive");
    assert_eq!(batch[0].envelope().message_id, MessageId::from("direct"));
}

/// Closing a connection fails its handles but not other connections
#[tokio::test(start_paused = true)]
async fn test_closed_connection_fails_its_handles() {
    let queue = MemoryQueue::new();
    let closing = queue.connect();
    let other = queue.connect();
    let sender = closing.create_sender();
    let receiver = closing.create_receiver(&session("calc"));

    closing.close().await.expect("close");
    assert!(closing.is_closed());
    assert!(receiver.is_closed());

    assert_eq!(
        sender.send(&request("a", "calc", WAIT)).await,
        Err(TransportError::ConnectionClosed)
    );
    assert_eq!(
        receiver.receive_messages(1, WAIT).await.unwrap_err(),
        TransportError::ConnectionClosed
    );

    other
        .create_sender()
        .send(&request("b", "calc", WAIT))
        .await
        .expect("other connection still sends");
}

/// Closing the connection wakes a receiver blocked in a wait
#[tokio::test(start_paused = true)]
async fn test_connection_close_wakes_waiting_receiver() {
    let queue = MemoryQueue::new();
    let connection = queue.connect();
    let receiver = connection.create_receiver(&session("calc"));

    let started = Instant::now();
    let (result, closed) = tokio::join!(
        receiver.receive_messages(1, Duration::from_secs(60)),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            connection.close().await
        }
    );

    closed.expect("close");
    assert_eq!(result.unwrap_err(), TransportError::ConnectionClosed);
    assert!(started.elapsed() < Duration::from_secs(60));
}
