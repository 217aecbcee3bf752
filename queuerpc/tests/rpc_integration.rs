//! Integration tests for the request-response RPC flow.
//!
//! These tests run a real client and server over the in-memory queue with
//! production timings on a paused clock:
//! - Client call → Sender → session → server Receiver → handler
//! - Acknowledgement, result and error replies routed back to the caller
//! - Timeouts, retries, overruns and duplicates injected through the queue

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use queuerpc::{
    CallOptions, ClientConfig, MethodTable, RemoteError, RpcClient, RpcError, RpcEvent, RpcEvents,
    RpcServer, ServerConfig, SessionId, WarningKind,
};
use queuerpc_memory::{MemoryConnection, MemoryQueue};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::LocalSet;
use tokio::time::Instant;

#[derive(Deserialize)]
struct DivArgs {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct SlowArgs {
    ms: u64,
}

fn session(name: &str) -> SessionId {
    SessionId::new(name).expect("valid session id")
}

fn ttl(secs: u64) -> CallOptions {
    CallOptions::with_ttl(Duration::from_secs(secs))
}

fn calculator(invocations: Rc<RefCell<Vec<Value>>>) -> MethodTable {
    MethodTable::new()
        .with_method("echo", |args: Value| async move { Ok(args) })
        .with_method("div", |DivArgs { a, b }| async move {
            if b == 0 {
                return Err(RemoteError::new("DivisionByZero", "b must not be 0")
                    .with_code("E_DIV_ZERO")
                    .with_details(json!({"a": a}))
                    .with_stack("div@calculator"));
            }
            Ok(a / b)
        })
        .with_method("slow", |SlowArgs { ms }| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .with_method("record", move |args: Value| {
            let invocations = invocations.clone();
            async move {
                invocations.borrow_mut().push(args);
                Ok(invocations.borrow().len())
            }
        })
}

async fn client(queue: &MemoryQueue) -> RpcClient<MemoryConnection> {
    RpcClient::connect(queue.connect(), ClientConfig::default())
        .await
        .expect("client connects")
}

async fn server(queue: &MemoryQueue, name: &str) -> RpcServer<MemoryConnection> {
    let server = RpcServer::new(queue.connect(), ServerConfig::default());
    server
        .listen(session(name), calculator(Rc::default()))
        .await
        .expect("listen");
    server
}

fn drain(events: &mut RpcEvents) -> Vec<RpcEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_echo_returns_arguments() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = server(&queue, "test6").await;
            let client = client(&queue).await;

            let echoed: Value = client
                .call(&session("test6"), "echo", json!({"rand": 0.42}), CallOptions::default())
                .await
                .expect("echo");
            assert_eq!(echoed, json!({"rand": 0.42}));
            assert_eq!(client.pending_calls(), 0);

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_method_is_method_not_found() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = RpcServer::new(queue.connect(), ServerConfig::default());
            server
                .listen(
                    session("test6"),
                    MethodTable::new().with_method("echo", |args: Value| async move { Ok(args) }),
                )
                .await
                .expect("listen");
            let client = client(&queue).await;

            let outcome = client
                .call::<_, Value>(&session("test6"), "mul", json!({"a": 5, "b": 3}), ttl(30))
                .await;
            assert_eq!(
                outcome,
                Err(RpcError::MethodNotFound {
                    method: "mul".to_string()
                })
            );

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_is_relayed() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = server(&queue, "calc").await;
            let client = client(&queue).await;

            let quotient: i64 = client
                .call(&session("calc"), "div", json!({"a": 15, "b": 3}), ttl(30))
                .await
                .expect("div");
            assert_eq!(quotient, 5);

            let error = client
                .call::<_, i64>(&session("calc"), "div", json!({"a": 1, "b": 0}), ttl(30))
                .await
                .expect_err("division by zero");
            let remote = match error {
                RpcError::Remote(remote) => remote,
                other => panic!("expected a remote error, got {other:?}"),
            };
            assert_eq!(remote.name, "DivisionByZero");
            assert_eq!(remote.code.as_deref(), Some("E_DIV_ZERO"));
            assert_eq!(remote.details, Some(json!({"a": 1})));
            assert_eq!(remote.stack.as_deref(), Some("div@calculator"));
            assert_eq!(remote.message, "b must not be 0");

            let invalid = client
                .call::<_, i64>(&session("calc"), "div", json!({"a": "x"}), ttl(30))
                .await
                .expect_err("bad arguments");
            assert!(
                matches!(&invalid, RpcError::Remote(e) if e.name == RemoteError::INVALID_ARGUMENTS),
                "{invalid:?}"
            );

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_extends_timeout() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let client = client(&queue).await;
            let server = RpcServer::new(queue.connect(), ServerConfig::default());

            // The request waits 4s in the queue, then the handler needs 4s:
            // 8s in total against a 5s ttl, rescued by the acknowledgement.
            let calc = session("calc");
            let started = Instant::now();
            let (result, listened) = tokio::join!(
                client.call::<_, u64>(&calc, "slow", json!({"ms": 4000}), ttl(5)),
                async {
                    tokio::time::sleep(Duration::from_secs(4)).await;
                    server.listen(session("calc"), calculator(Rc::default())).await
                }
            );

            listened.expect("listen");
            assert_eq!(result, Ok(4000));
            assert!(started.elapsed() > Duration::from_secs(5));

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_no_listener_times_out() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let client = client(&queue).await;

            let started = Instant::now();
            let outcome = client
                .call::<_, Value>(&session("nobody"), "echo", json!(1), ttl(3))
                .await;

            assert_eq!(
                outcome,
                Err(RpcError::Timeout {
                    method: "echo".to_string(),
                    ttl: Duration::from_secs(3)
                })
            );
            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
            assert!(elapsed < Duration::from_millis(3100), "{elapsed:?}");
            assert_eq!(client.pending_calls(), 0);

            client.close().await.expect("client close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_ignored() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = server(&queue, "late").await;
            let client = client(&queue).await;

            // Acknowledged right away, but the result needs 5s against a 2s ttl.
            let outcome = client
                .call::<_, u64>(&session("late"), "slow", json!({"ms": 5000}), ttl(2))
                .await;
            assert!(matches!(outcome, Err(RpcError::Timeout { .. })), "{outcome:?}");
            assert_eq!(client.pending_calls(), 0);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(client.pending_calls(), 0);
            assert_eq!(queue.ready_count(client.session_id()), 0);
            assert_eq!(queue.locked_count(client.session_id()), 0);

            let second: Value = client
                .call(&session("late"), "echo", json!("second"), ttl(30))
                .await
                .expect("second call");
            assert_eq!(second, json!("second"));

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_sends_stay_in_order_under_failures() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let invocations = Rc::new(RefCell::new(Vec::new()));
            let server = RpcServer::new(queue.connect(), ServerConfig::default());
            server
                .listen(session("ordered"), calculator(invocations.clone()))
                .await
                .expect("listen");
            let client = client(&queue).await;
            let mut events = client.take_events().expect("events");

            queue.fail_next_sends(2);
            let target = session("ordered");
            let (first, second, third) = tokio::join!(
                client.call::<_, usize>(&target, "record", json!(1), ttl(300)),
                client.call::<_, usize>(&target, "record", json!(2), ttl(300)),
                client.call::<_, usize>(&target, "record", json!(3), ttl(300)),
            );

            assert_eq!((first, second, third), (Ok(1), Ok(2), Ok(3)));
            assert_eq!(*invocations.borrow(), [json!(1), json!(2), json!(3)]);

            let send_failures = drain(&mut events)
                .into_iter()
                .filter(|event| {
                    matches!(event, RpcEvent::Warning(w) if matches!(w.kind, WarningKind::SendFailed(_)))
                })
                .count();
            assert_eq!(send_failures, 2);

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_recovers_from_receive_overrun() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            queue.stall_next_receives(1);
            let server = RpcServer::new(queue.connect(), ServerConfig::default());
            let mut server_events = server.take_events().expect("events");
            server
                .listen(session("stalled"), calculator(Rc::default()))
                .await
                .expect("listen");
            let client = client(&queue).await;

            let echoed: Value = client
                .call(&session("stalled"), "echo", json!({"after": "overrun"}), ttl(30))
                .await
                .expect("echo after overrun");
            assert_eq!(echoed, json!({"after": "overrun"}));

            let overrun = drain(&mut server_events).into_iter().find_map(|event| match event {
                RpcEvent::Warning(warning) if warning.is_overrun() => Some(warning),
                _ => None,
            });
            let overrun = overrun.expect("server reported an overrun");
            assert_eq!(overrun.session_id, Some(session("stalled")));

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_settles_once() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let invocations = Rc::new(RefCell::new(Vec::new()));
            let server = RpcServer::new(queue.connect(), ServerConfig::default());
            server
                .listen(session("dup"), calculator(invocations.clone()))
                .await
                .expect("listen");
            let client = client(&queue).await;

            queue.duplicate_next_sends(1);
            let count: usize = client
                .call(&session("dup"), "record", json!("once"), ttl(30))
                .await
                .expect("record");
            assert_eq!(count, 1);

            // Let the duplicate run and its replies drain.
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(invocations.borrow().len(), 2);
            assert_eq!(client.pending_calls(), 0);
            assert_eq!(queue.ready_count(client.session_id()), 0);

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_does_not_block_other_calls() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = server(&queue, "calc").await;
            let client = client(&queue).await;
            let target = session("calc");

            let started = Instant::now();
            let (slow, fast) = tokio::join!(
                client.call::<_, u64>(&target, "slow", json!({"ms": 20000}), ttl(30)),
                async {
                    let value = client
                        .call::<_, Value>(&target, "echo", json!("quick"), ttl(30))
                        .await;
                    (value, started.elapsed())
                }
            );

            assert_eq!(slow, Ok(20000));
            assert_eq!(fast.0, Ok(json!("quick")));
            assert!(fast.1 < Duration::from_secs(20), "{:?}", fast.1);

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_one_server_serves_many_sessions() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let server = RpcServer::new(queue.connect(), ServerConfig::default());
            server
                .listen(session("left"), calculator(Rc::default()))
                .await
                .expect("listen left");
            server
                .listen(
                    session("right"),
                    MethodTable::new().with_method("whoami", |_: Value| async move { Ok("right") }),
                )
                .await
                .expect("listen right");
            let client = client(&queue).await;

            let left: Value = client
                .call(&session("left"), "echo", json!("left"), ttl(30))
                .await
                .expect("left");
            let right: String = client
                .call(&session("right"), "whoami", Value::Null, ttl(30))
                .await
                .expect("right");
            assert_eq!(left, json!("left"));
            assert_eq!(right, "right");

            server.close_session(&session("right")).await;
            let gone = client
                .call::<_, String>(&session("right"), "whoami", Value::Null, ttl(2))
                .await;
            assert!(matches!(gone, Err(RpcError::Timeout { .. })));

            client.close().await.expect("client close");
            server.close().await.expect("server close");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_outstanding_calls() {
    LocalSet::new()
        .run_until(async {
            let queue = MemoryQueue::new();
            let client = client(&queue).await;
            let mut events = client.take_events().expect("events");

            let nobody = session("nobody");
            let (outcome, closed) = tokio::join!(
                client.call::<_, Value>(&nobody, "echo", json!(1), ttl(30)),
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    client.close().await
                }
            );

            closed.expect("close");
            assert_eq!(outcome, Err(RpcError::Closed));
            assert_eq!(client.pending_calls(), 0);

            client.close().await.expect("second close is a no-op");
            assert_eq!(
                client
                    .call::<_, Value>(&session("nobody"), "echo", json!(1), ttl(30))
                    .await,
                Err(RpcError::Closed)
            );

            let closed_events = drain(&mut events)
                .into_iter()
                .filter(|event| *event == RpcEvent::Closed)
                .count();
            assert_eq!(closed_events, 1);
        })
        .await;
}
