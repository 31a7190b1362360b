//! Integration tests driving the full `submit` -> `wait` lifecycle.
//!
//! Every subscribed result channel is drained by a concurrently spawned task
//! rather than after `wait()` returns: the channel is bounded (capacity =
//! `num_workers`), so a subscriber that only reads after shutdown would
//! deadlock the workers it's supposed to be listening to, exactly as the
//! design's back-pressure intends. Sinks are pointed at `""` (discarded)
//! unless a test needs to assert on persisted output, in which case a
//! `tempfile` directory is used so the suite stays hermetic.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gojob_core::{SchedulerConfig, Task, TaskEnvelope};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn discard_config() -> gojob_core::SchedulerConfigBuilder {
    SchedulerConfig::builder()
        .result_path("")
        .status_path("")
        .metadata_path("")
}

fn spawn_drain<T: Send + 'static>(mut rx: mpsc::Receiver<TaskEnvelope<T>>) -> JoinHandle<Vec<TaskEnvelope<T>>> {
    tokio::spawn(async move {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    })
}

#[derive(Debug, Clone, Serialize)]
struct NoopTask;

#[async_trait::async_trait]
impl Task for NoopTask {
    async fn run(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sharding_partitions_indices_disjointly() {
    const N: i64 = 15;
    const NUM_SHARDS: u32 = 3;

    let mut processed_by_shard = Vec::new();
    for shard in 0..NUM_SHARDS {
        let config = discard_config()
            .num_workers(2)
            .num_shards(NUM_SHARDS)
            .shard(shard)
            .build()
            .unwrap();
        let scheduler = gojob_core::Scheduler::new(config);
        let results = scheduler.subscribe_results().unwrap();
        let drain = spawn_drain(results);

        for _ in 0..N {
            scheduler.submit(NoopTask).await.unwrap();
        }
        scheduler.wait().await.unwrap();

        let indices: BTreeSet<i64> = drain.await.unwrap().into_iter().map(|e| e.index).collect();
        processed_by_shard.push(indices);
    }

    assert_eq!(processed_by_shard[1], BTreeSet::from([1, 4, 7, 10, 13]));

    let union: BTreeSet<i64> = processed_by_shard.iter().flatten().copied().collect();
    assert_eq!(union, (0..N).collect::<BTreeSet<_>>());
    let total: usize = processed_by_shard.iter().map(|s| s.len()).sum();
    assert_eq!(total as i64, N, "shards must partition disjointly");
}

#[derive(Debug, Clone, Serialize)]
struct FlakyTask {
    #[serde(skip)]
    attempts: Arc<AtomicU32>,
    fail_until: u32,
}

#[async_trait::async_trait]
impl Task for FlakyTask {
    async fn run(&mut self) -> Result<(), String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_until {
            Err(format!("attempt {attempt} failed on purpose"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_to_success_records_last_attempt_only() {
    let config = discard_config().num_workers(1).max_retries(4).build().unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    let results = scheduler.subscribe_results().unwrap();
    let drain = spawn_drain(results);

    scheduler
        .submit(FlakyTask {
            attempts: Arc::new(AtomicU32::new(0)),
            fail_until: 2,
        })
        .await
        .unwrap();
    scheduler.wait().await.unwrap();

    let envelopes = drain.await.unwrap();
    assert_eq!(envelopes.len(), 1);
    let envelope = &envelopes[0];
    assert_eq!(envelope.num_tries, 3);
    assert_eq!(envelope.error, "");
    assert!(envelope.started_at <= envelope.finished_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_exhaustion_reports_last_failure() {
    let config = discard_config().num_workers(1).max_retries(2).build().unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    let results = scheduler.subscribe_results().unwrap();
    let drain = spawn_drain(results);

    scheduler
        .submit(FlakyTask {
            attempts: Arc::new(AtomicU32::new(0)),
            fail_until: u32::MAX,
        })
        .await
        .unwrap();
    scheduler.wait().await.unwrap();

    let envelopes = drain.await.unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].num_tries, 2);
    assert_ne!(envelopes[0].error, "");
}

#[derive(Debug, Clone, Serialize)]
struct SleepTask {
    sleep: Duration,
}

#[async_trait::async_trait]
impl Task for SleepTask {
    async fn run(&mut self) -> Result<(), String> {
        tokio::time::sleep(self.sleep).await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_is_enforced_without_waiting_for_the_task() {
    let config = discard_config()
        .num_workers(1)
        .max_retries(1)
        .max_runtime_per_task(Duration::from_secs(1))
        .build()
        .unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    let results = scheduler.subscribe_results().unwrap();
    let drain = spawn_drain(results);

    let start = Instant::now();
    scheduler
        .submit(SleepTask {
            sleep: Duration::from_secs(2),
        })
        .await
        .unwrap();
    scheduler.wait().await.unwrap();
    let elapsed = start.elapsed();

    let envelopes = drain.await.unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].num_tries, 1);
    assert_ne!(envelopes[0].error, "");
    assert!(
        elapsed < Duration::from_millis(1500),
        "expected the attempt to be abandoned near the 1s deadline, took {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn two_subscribers_registered_before_start_both_see_every_envelope() {
    const N: i64 = 100;

    let config = discard_config().num_workers(8).build().unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    let drain_a = spawn_drain(scheduler.subscribe_results().unwrap());
    let drain_b = spawn_drain(scheduler.subscribe_results().unwrap());

    for _ in 0..N {
        scheduler.submit(NoopTask).await.unwrap();
    }
    scheduler.wait().await.unwrap();

    let indices_a: BTreeSet<i64> = drain_a.await.unwrap().into_iter().map(|e| e.index).collect();
    let indices_b: BTreeSet<i64> = drain_b.await.unwrap().into_iter().map(|e| e.index).collect();

    let expected: BTreeSet<i64> = (0..N).collect();
    assert_eq!(indices_a, expected);
    assert_eq!(indices_b, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_after_start_is_rejected() {
    let config = discard_config().build().unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    scheduler.submit(NoopTask).await.unwrap();
    scheduler.start().await;

    assert!(matches!(
        scheduler.subscribe_results(),
        Err(gojob_core::ConfigError::AlreadyStarted)
    ));
    scheduler.wait().await.unwrap();
}

#[derive(Debug, Clone, Serialize)]
struct MaybeFailTask {
    should_fail: bool,
}

#[async_trait::async_trait]
impl Task for MaybeFailTask {
    async fn run(&mut self) -> Result<(), String> {
        if self.should_fail {
            Err("deliberate failure".to_string())
        } else {
            Ok(())
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn status_counters_stay_consistent_with_the_projected_total() {
    let config = discard_config()
        .num_workers(4)
        .max_retries(1)
        .total_tasks(20)
        .build()
        .unwrap();
    let scheduler = gojob_core::Scheduler::new(config);
    let drain = spawn_drain(scheduler.subscribe_results().unwrap());

    let mut expected_failed = 0;
    for i in 0..20u32 {
        let should_fail = i % 3 == 0;
        if should_fail {
            expected_failed += 1;
        }
        scheduler.submit(MaybeFailTask { should_fail }).await.unwrap();
    }
    scheduler.wait().await.unwrap();

    let envelopes = drain.await.unwrap();
    let num_failed = envelopes.iter().filter(|e| !e.error.is_empty()).count();
    let num_succeed = envelopes.iter().filter(|e| e.error.is_empty()).count();
    assert_eq!(num_failed, expected_failed);
    assert_eq!(num_succeed, 20 - expected_failed);
    assert_eq!(num_failed + num_succeed, 20, "num_done == num_failed + num_succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn results_persist_to_a_real_sink_as_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let result_path = dir.path().join("result.json");

    let config = SchedulerConfig::builder()
        .result_path(result_path.to_string_lossy().to_string())
        .status_path("")
        .metadata_path(dir.path().join("metadata.json").to_string_lossy().to_string())
        .num_workers(2)
        .build()
        .unwrap();
    let scheduler = gojob_core::Scheduler::new(config);

    for _ in 0..5 {
        scheduler.submit(NoopTask).await.unwrap();
    }
    scheduler.wait().await.unwrap();

    let contents = tokio::fs::read_to_string(&result_path).await.unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(value.get("index").is_some());
        assert_eq!(value["error"], "");
        assert_eq!(value["num_tries"], 1);
    }

    let metadata = tokio::fs::read_to_string(dir.path().join("metadata.json")).await.unwrap();
    assert_eq!(metadata.lines().count(), 1);
}
