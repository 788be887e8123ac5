//! # Example: three workers against a Conductor server
//!
//! Server and credentials come from the environment:
//! ```text
//! CONDUCTOR_SERVER_URL=http://localhost:8080/api
//! CONDUCTOR_AUTH_KEY=...            (optional)
//! CONDUCTOR_AUTH_SECRET=...         (optional)
//! CONDUCTOR_WORKER_ALL_POLL_INTERVAL=500
//! CONDUCTOR_WORKER_SLOW_REPORT_PAUSED=true
//! ```
//!
//! Run with: `RUST_LOG=conductor_worker=debug cargo run --example worker`

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use conductor_worker::{
    Args, MetricsSettings, Param, Subscribe, Supervisor, SupervisorConfig, TaskEnvelope,
    TaskError, TaskInProgress, UserReturn, Worker,
};

/// Envelope-bound: reads the raw input map.
fn word_count() -> Worker {
    Worker::new("word_count", |task: &TaskEnvelope| {
        let text = task
            .input("text")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::non_retryable("missing 'text'"))?;
        Ok::<_, TaskError>(json!({ "words": text.split_whitespace().count() }))
    })
    .with_thread_count(4)
}

/// Named parameters with a default.
fn greet() -> Worker {
    Worker::with_args(
        "greet",
        vec![Param::new("name"), Param::new("greeting").with_default("hello")],
        |args: Args| {
            let name: String = args.get("name")?;
            let greeting: String = args.get("greeting")?;
            Ok::<_, TaskError>(format!("{greeting}, {name}"))
        },
    )
}

/// Async and long-running: asks to be called back until the third poll.
fn slow_report() -> Worker {
    Worker::new_async("slow_report", |task: TaskEnvelope| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if task.poll_count < 3 {
            let mut progress = serde_json::Map::new();
            progress.insert("progress".into(), json!(task.poll_count * 33));
            return Ok::<UserReturn, TaskError>(
                TaskInProgress::new(Duration::from_secs(5))
                    .with_output(progress)
                    .into(),
            );
        }
        Ok(json!({ "report": "ready" }).into())
    })
    .with_lease_extension(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = SupervisorConfig::default()
        .with_grace(Duration::from_secs(10))
        .with_metrics(MetricsSettings::new(std::env::temp_dir().join("conductor-worker.prom")));

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(conductor_worker::LogWriter)];

    let sup = Supervisor::builder(cfg)
        .with_workers(vec![word_count(), greet(), slow_report()])
        .with_subscribers(subs)
        .build()?;

    println!("polling for: {:?}", sup.task_types());
    sup.run().await?;
    Ok(())
}
