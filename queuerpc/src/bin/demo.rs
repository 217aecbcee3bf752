//! queuerpc demo: a calculator server and a client over the in-memory queue.
//!
//! # Run
//!
//! ```bash
//! cargo run --bin queuerpc-demo
//! cargo run --bin queuerpc-demo -- --chaos-seed 42 --calls 20
//! RUST_LOG=queuerpc=trace cargo run --bin queuerpc-demo -- --ttl-ms 2000
//! ```

use std::time::Duration;

use clap::Parser;
use queuerpc::{
    CallOptions, ClientConfig, MethodTable, RemoteError, RpcClient, RpcError, RpcEvent,
    RpcServer, ServerConfig, SessionId,
};
use queuerpc_memory::{ChaosConfig, MemoryQueue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "queuerpc-demo")]
#[command(about = "RPC over an in-memory session queue", long_about = None)]
struct Args {
    /// Session the calculator listens on
    #[arg(short, long, default_value = "calc")]
    session: String,

    /// Call time-to-live in milliseconds
    #[arg(long, default_value = "30000")]
    ttl_ms: u64,

    /// Number of echo calls to make
    #[arg(long, default_value = "3")]
    calls: u32,

    /// Enable flaky-broker chaos with this seed
    #[arg(long)]
    chaos_seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DivArgs {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SleepArgs {
    ms: u64,
}

fn calculator() -> MethodTable {
    MethodTable::new()
        .with_method("echo", |args: Value| async move { Ok(args) })
        .with_method("div", |DivArgs { a, b }| async move {
            if b == 0 {
                return Err(RemoteError::new("DivisionByZero", "b must not be 0")
                    .with_code("E_DIV_ZERO")
                    .with_details(json!({ "a": a })));
            }
            Ok(a / b)
        })
        .with_method("sleep", |SleepArgs { ms }| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,queuerpc=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            run(args).await.inspect_err(|e| {
                tracing::error!(error = %e, "demo failed");
            })
        })
        .await
}

async fn run(args: Args) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let queue = match args.chaos_seed {
        Some(seed) => {
            tracing::info!(seed, "chaos enabled");
            MemoryQueue::with_chaos(ChaosConfig::flaky(seed))
        }
        None => MemoryQueue::new(),
    };

    let target = SessionId::new(args.session)?;
    let options = CallOptions::with_ttl(Duration::from_millis(args.ttl_ms));

    let server = RpcServer::new(queue.connect(), ServerConfig::fast_local());
    let client = RpcClient::connect(queue.connect(), ClientConfig::fast_local()).await?;
    spawn_event_logger("server", server.take_events());
    spawn_event_logger("client", client.take_events());

    server.listen(target.clone(), calculator()).await?;
    tracing::info!(session = %target, client = %client.session_id(), "ready");

    for i in 0..args.calls {
        let sent = json!({ "rand": 0.42, "call": i });
        let echoed: Value = client.call(&target, "echo", &sent, options).await?;
        tracing::info!(%echoed, "echo");
    }

    let quotient: i64 = client
        .call(&target, "div", json!({"a": 15, "b": 3}), options)
        .await?;
    tracing::info!(quotient, "div");

    match client
        .call::<_, i64>(&target, "div", json!({"a": 1, "b": 0}), options)
        .await
    {
        Err(RpcError::Remote(error)) => tracing::info!(%error, code = ?error.code, "div by zero"),
        other => tracing::warn!(?other, "expected a remote error"),
    }

    match client
        .call::<_, Value>(&target, "mul", json!({"a": 5, "b": 3}), options)
        .await
    {
        Err(RpcError::MethodNotFound { method }) => tracing::info!(%method, "method not found"),
        other => tracing::warn!(?other, "expected MethodNotFound"),
    }

    let slept: u64 = client
        .call(&target, "sleep", SleepArgs { ms: 250 }, options)
        .await?;
    tracing::info!(slept, "sleep");

    tracing::info!(stats = ?queue.stats(), "queue stats");
    client.close().await?;
    server.close().await?;
    Ok(())
}

fn spawn_event_logger(side: &'static str, events: Option<queuerpc::RpcEvents>) {
    let Some(mut events) = events else {
        return;
    };
    tokio::task::spawn_local(async move {
        while let Some(event) = events.recv().await {
            match event {
                RpcEvent::Warning(warning) => tracing::warn!(side, %warning, "warning"),
                RpcEvent::Closed => {
                    tracing::info!(side, "closed");
                    break;
                }
            }
        }
    });
}
