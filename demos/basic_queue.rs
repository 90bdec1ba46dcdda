//! # Example: Basic Queue
//!
//! Enqueues a one-shot task, a delayed task, a repeating task and a task that
//! times out, then prints where each one ended up.
//!
//! ```bash
//! RUST_LOG=info cargo run --example basic_queue
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use taskqueue::{
    CallableFn, CallableRef, Invocation, QueueConfig, Scheduler, Subscribe, Task, TaskError,
    TaskQueue,
};

fn greet() -> CallableRef {
    CallableFn::arc("demo.greet", |inv: Invocation| async move {
        let who = inv.kwarg("who").and_then(Value::as_str).unwrap_or("world");
        println!("[greet] hello, {who}");
        Ok::<_, TaskError>(json!(format!("greeted {who}")))
    })
}

fn slow() -> CallableRef {
    CallableFn::arc("demo.slow", |inv: Invocation| async move {
        tokio::select! {
            _ = inv.token.cancelled() => Err(TaskError::Canceled),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(Value::Null),
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = QueueConfig {
        grace: Duration::from_secs(2),
        max_concurrent: 2,
        ..QueueConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(taskqueue::LogWriter::new())];
    let queue = TaskQueue::builder(cfg).with_subscribers(subs).build();

    let now = Task::builder(greet()).kwarg("who", json!("now")).build();
    let later = Task::builder(greet())
        .kwarg("who", json!("later"))
        .scheduler(Scheduler::at(Utc::now() + TimeDelta::milliseconds(300)))
        .build();
    let ticker = Task::builder(greet())
        .kwarg("who", json!("ticker"))
        .scheduler(Scheduler::interval(Duration::from_millis(200), None, Some(3)))
        .build();
    let stuck = Task::builder(slow())
        .timeout(Duration::from_millis(150))
        .build();

    for task in [&now, &later, &ticker, &stuck] {
        queue.enqueue(task, true).await?;
    }

    // The same greeting on the same schedule is rejected.
    let twin = Task::builder(greet())
        .kwarg("who", json!("ticker"))
        .scheduler(ticker.scheduler())
        .build();
    if let Err(e) = queue.enqueue(&twin, true).await {
        println!("[main] duplicate rejected: {e}");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    for task in queue.find([("method_name", json!("demo.greet"))]).await? {
        println!(
            "[main] {} {} runs={} result={:?}",
            task.id(),
            task.state(),
            task.runs(),
            task.result()
        );
    }
    println!("[main] slow task ended as {}", stuck.state());

    queue.shutdown().await?;
    Ok(())
}
