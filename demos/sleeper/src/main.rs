//! Mirrors `examples/sleeper` from the original `gojob`: 256 tasks, each
//! sleeping a few seconds, sharded across 4 cooperating processes.

use std::time::Duration;

use gojob_core::{SchedulerConfig, Task};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct SleeperTask {
    index: u32,
    sleep_seconds: u64,
}

#[async_trait::async_trait]
impl Task for SleeperTask {
    async fn run(&mut self) -> Result<(), String> {
        tokio::time::sleep(Duration::from_secs(self.sleep_seconds)).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    const TOTAL: u32 = 256;

    let config = SchedulerConfig::builder()
        .num_workers(8)
        .max_retries(4)
        .max_runtime_per_task(Duration::from_secs(16))
        .num_shards(4)
        .shard(0)
        .total_tasks(TOTAL as u64)
        .result_path("output.txt")
        .build()?;

    let scheduler = gojob_core::Scheduler::new(config);
    for index in 0..TOTAL {
        let task = SleeperTask {
            index,
            sleep_seconds: (index % 10) as u64,
        };
        scheduler.submit(task).await?;
    }
    scheduler.wait().await?;
    Ok(())
}
