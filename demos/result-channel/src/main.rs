//! Mirrors `examples/result-channel` from the original `gojob`: subscribes
//! to the envelope stream directly instead of only reading the JSONL file,
//! printing each completed task as it lands.

use std::time::Duration;

use gojob_core::{SchedulerConfig, Task};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Serialize)]
struct FetchTask {
    url: String,
    status_code: Option<u16>,
}

#[async_trait::async_trait]
impl Task for FetchTask {
    async fn run(&mut self) -> Result<(), String> {
        let response = reqwest::get(&self.url).await.map_err(|err| err.to_string())?;
        self.status_code = Some(response.status().as_u16());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    const TOTAL: u64 = 256;

    let config = SchedulerConfig::builder()
        .num_workers(8)
        .max_retries(4)
        .max_runtime_per_task(Duration::from_secs(16))
        .num_shards(4)
        .shard(0)
        .total_tasks(TOTAL)
        .status_path("status.json")
        .result_path("result.json")
        .metadata_path("metadata.json")
        .build()?;

    let scheduler = gojob_core::Scheduler::new(config);
    let mut results = scheduler.subscribe_results()?;

    let printer = tokio::spawn(async move {
        while let Some(envelope) = results.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{line}"),
                Err(err) => error!(error = %err, "failed to marshal result"),
            }
        }
    });

    for index in 0..TOTAL {
        let task = FetchTask {
            url: format!("https://httpbin.org/task/{index}"),
            status_code: None,
        };
        scheduler.submit(task).await?;
    }
    scheduler.wait().await?;
    printer.await?;
    Ok(())
}
