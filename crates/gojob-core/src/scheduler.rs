use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::envelope::TaskEnvelope;
use crate::error::{ConfigError, SchedulerError};
use crate::metrics::MetricsPusher;
use crate::status::StatusManager;
use crate::task::Task;
use crate::timed_runner::{run_with_timeout, RunOutcome};

struct Inner<T: Task> {
    config: SchedulerConfig,
    run_id: String,
    current_index: AtomicI64,
    started: AtomicBool,
    stopped: AtomicBool,
    task_tx: StdMutex<Option<mpsc::Sender<TaskEnvelope<T>>>>,
    task_rx: Arc<AsyncMutex<mpsc::Receiver<TaskEnvelope<T>>>>,
    result_channels: StdMutex<Vec<mpsc::Sender<TaskEnvelope<T>>>>,
    in_flight: AtomicI64,
    notify: Notify,
    status: Arc<StatusManager>,
    status_stop_tx: StdMutex<Option<oneshot::Sender<()>>>,
    worker_joinset: StdMutex<JoinSet<()>>,
    recorder_joinset: StdMutex<JoinSet<()>>,
    metrics_joinset: StdMutex<JoinSet<()>>,
}

/// Long-lived coordinator: accepts tasks from a producer, shards them,
/// dispatches survivors through a bounded worker pool with per-attempt
/// timeout and retry, and fans results to every registered consumer.
///
/// Cheaply cloneable — every clone shares the same underlying state via an
/// `Arc`, so the producer and any number of readers of `wait()` can hold
/// their own handle.
pub struct Scheduler<T: Task> {
    inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Task> Scheduler<T> {
    pub fn new(config: SchedulerConfig) -> Self {
        let (task_tx, task_rx) = mpsc::channel(config.num_workers as usize);
        let run_id = uuid::Uuid::new_v4().to_string();

        Self {
            inner: Arc::new(Inner {
                config,
                run_id,
                current_index: AtomicI64::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                task_tx: StdMutex::new(Some(task_tx)),
                task_rx: Arc::new(AsyncMutex::new(task_rx)),
                result_channels: StdMutex::new(Vec::new()),
                in_flight: AtomicI64::new(0),
                notify: Notify::new(),
                status: Arc::new(StatusManager::new()),
                status_stop_tx: StdMutex::new(None),
                worker_joinset: StdMutex::new(JoinSet::new()),
                recorder_joinset: StdMutex::new(JoinSet::new()),
                metrics_joinset: StdMutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Registers a fresh result consumer. Must be called before the first
    /// `submit`/`start`; afterwards a late subscriber would only see a
    /// suffix of the stream, so it is rejected instead.
    pub fn subscribe_results(&self) -> Result<mpsc::Receiver<TaskEnvelope<T>>, ConfigError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(ConfigError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(self.inner.config.num_workers.max(1) as usize);
        self.inner.result_channels.lock().unwrap().push(tx);
        Ok(rx)
    }

    /// Idempotent: spawns the worker pool, the StatusManager ticker, the
    /// three ChannelRecorders, and (if configured) the MetricsPusher.
    /// Calling it more than once, or relying on the first `submit` to call
    /// it implicitly, has no additional effect.
    pub async fn start(&self) {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(total) = self.inner.config.projected_total() {
            self.inner.status.set_total(total);
        }

        self.spawn_workers();
        // Every status subscriber (recorder, metrics pusher) must register
        // before the ticker's first publish, or it misses the initial
        // snapshot; spawn_recorders/spawn_metrics_pusher subscribe, so the
        // ticker is the last thing started.
        self.spawn_recorders();
        let prometheus = self.inner.config.prometheus.clone();
        if let Some(prometheus) = prometheus {
            self.spawn_metrics_pusher(prometheus);
        }
        self.spawn_status_ticker();
        self.write_metadata().await;

        info!(run_id = %self.inner.run_id, "scheduler started");
    }

    fn spawn_workers(&self) {
        let mut joinset = self.inner.worker_joinset.lock().unwrap();
        for worker_id in 0..self.inner.config.num_workers {
            let inner = self.inner.clone();
            joinset.spawn(async move { worker_loop(inner, worker_id).await });
        }
    }

    fn spawn_status_ticker(&self) {
        let (stop_tx, stop_rx) = oneshot::channel();
        *self.inner.status_stop_tx.lock().unwrap() = Some(stop_tx);

        let status = self.inner.status.clone();
        let tick = self.inner.config.status_tick;
        let mut joinset = self.inner.worker_joinset.lock().unwrap();
        joinset.spawn(async move {
            status.run(tick, stop_rx).await;
        });
    }

    fn spawn_recorders(&self) {
        let inner = &self.inner;
        let mut joinset = inner.recorder_joinset.lock().unwrap();

        let result_rx = {
            let (tx, rx) = mpsc::channel::<TaskEnvelope<T>>(inner.config.num_workers as usize);
            inner.result_channels.lock().unwrap().push(tx);
            rx
        };
        let result_handle =
            gojob_sinks::spawn_recorder(inner.config.result_path.clone(), result_rx);
        joinset.spawn(async move {
            let _ = result_handle.await;
        });

        let status_rx = inner.status.subscribe();
        let status_handle =
            gojob_sinks::spawn_recorder(inner.config.status_path.clone(), status_rx);
        joinset.spawn(async move {
            let _ = status_handle.await;
        });
    }

    /// Flat `id`-at-top-level map, matching the original's
    /// `map[string]interface{}` seeded by `SetMetadata("id", run_id)`: user
    /// `metadata_entry` calls land as top-level keys too, not nested under a
    /// sub-object, so a host reading this record for `id` always finds it.
    fn build_metadata(&self) -> BTreeMap<String, Value> {
        let cfg = &self.inner.config;
        let mut record: BTreeMap<String, Value> = cfg
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        record
            .entry("id".to_string())
            .or_insert_with(|| Value::String(self.inner.run_id.clone()));
        record.insert("run_id".to_string(), Value::String(self.inner.run_id.clone()));
        record.insert("num_workers".to_string(), cfg.num_workers.into());
        record.insert("max_retries".to_string(), cfg.max_retries.into());
        record.insert(
            "max_runtime_per_task_ms".to_string(),
            (cfg.max_runtime_per_task.as_millis() as u64).into(),
        );
        record.insert("num_shards".to_string(), cfg.num_shards.into());
        record.insert("shard".to_string(), cfg.shard.into());
        if let Some(total) = cfg.total_tasks {
            record.insert("total_tasks".to_string(), total.into());
        }
        record
    }

    async fn write_metadata(&self) {
        let metadata = self.build_metadata();

        let (tx, rx) = mpsc::channel(1);
        let handle = gojob_sinks::spawn_recorder(self.inner.config.metadata_path.clone(), rx);
        if tx.send(metadata).await.is_err() {
            error!("metadata recorder channel closed before the record could be sent");
        }
        drop(tx);
        if let Err(err) = handle.await {
            error!(error = %err, "metadata recorder task panicked");
        }
    }

    fn spawn_metrics_pusher(&self, prometheus: crate::config::PrometheusConfig) {
        let status_rx = self.inner.status.subscribe();
        let mut joinset = self.inner.metrics_joinset.lock().unwrap();
        joinset.spawn(async move {
            match MetricsPusher::new(prometheus).await {
                Ok(pusher) => pusher.run(status_rx).await,
                Err(err) => error!(error = %err, "failed to initialize metrics pusher"),
            }
        });
    }

    /// Submits one task. Starts the scheduler on first call (lazy start).
    /// Back-pressures on the bounded task channel once all workers are busy.
    pub async fn submit(&self, task: T) -> Result<(), SchedulerError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStopped);
        }
        self.start().await;

        let index = self.inner.current_index.fetch_add(1, Ordering::SeqCst);
        let num_shards = self.inner.config.num_shards as i64;
        if index % num_shards != self.inner.config.shard as i64 {
            // Another shard owns this index; the counter still advanced so
            // indices stay globally dense across shards.
            return Ok(());
        }

        let sender = self.inner.task_tx.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(SchedulerError::AlreadyStopped);
        };

        let envelope = TaskEnvelope::new(index, &self.inner.run_id, task);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        if sender.send(envelope).await.is_err() {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.notify.notify_one();
            return Err(SchedulerError::AlreadyStopped);
        }

        Ok(())
    }

    /// Drains every in-flight attempt, then closes channels and drains the
    /// recorder pool in order. Terminal: further `submit` calls fail.
    pub async fn wait(&self) -> Result<(), SchedulerError> {
        if self
            .inner
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyStopped);
        }

        self.start().await;

        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            self.inner.notify.notified().await;
        }

        // Drop the scheduler's own sender; once every worker's current
        // `recv()` observes the channel empty and sender-less, it returns.
        self.inner.task_tx.lock().unwrap().take();

        // Close every result channel so recorders observe closure and flush.
        self.inner.result_channels.lock().unwrap().clear();

        if let Some(stop_tx) = self.inner.status_stop_tx.lock().unwrap().take() {
            let _ = stop_tx.send(());
        }

        // Abort the metrics pusher before draining the worker/ticker joinset
        // below: the ticker's two final publishes on `stop` send to the
        // metrics subscriber channel (capacity 1) and block until it's
        // drained, so a pusher wedged in an in-flight push (even a timed-out
        // one still unwinding) must be cut loose first, or the ticker never
        // finishes and the worker joinset never drains.
        let mut metrics_joinset = std::mem::replace(
            &mut *self.inner.metrics_joinset.lock().unwrap(),
            JoinSet::new(),
        );
        metrics_joinset.abort_all();
        while metrics_joinset.join_next().await.is_some() {}

        let mut worker_joinset =
            std::mem::replace(&mut *self.inner.worker_joinset.lock().unwrap(), JoinSet::new());
        while worker_joinset.join_next().await.is_some() {}

        let mut recorder_joinset = std::mem::replace(
            &mut *self.inner.recorder_joinset.lock().unwrap(),
            JoinSet::new(),
        );
        while recorder_joinset.join_next().await.is_some() {}

        Ok(())
    }
}

async fn worker_loop<T: Task>(inner: Arc<Inner<T>>, worker_id: u32) {
    loop {
        let envelope = {
            let mut rx = inner.task_rx.lock().await;
            rx.recv().await
        };

        let Some(mut envelope) = envelope else {
            break;
        };

        run_envelope_to_completion(&inner, &mut envelope).await;

        let channels = inner.result_channels.lock().unwrap().clone();
        for channel in &channels {
            if channel.send(envelope.clone()).await.is_err() {
                warn!(worker_id, "result channel closed while broadcasting envelope");
            }
        }

        if envelope.error.is_empty() {
            inner.status.inc_succeed();
        } else {
            inner.status.inc_failed();
        }

        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        inner.notify.notify_one();
    }
}

async fn run_envelope_to_completion<T: Task>(envelope_owner: &Arc<Inner<T>>, envelope: &mut TaskEnvelope<T>) {
    let timeout = envelope_owner.config.max_runtime_per_task;
    for _ in 0..envelope_owner.config.max_retries {
        crate::envelope::mark_attempt_started(envelope);

        let (task_after, outcome) = run_attempt(&envelope.task, timeout).await;
        envelope.task = task_after;

        crate::envelope::mark_attempt_finished(envelope);

        match outcome {
            Ok(()) => {
                envelope.error.clear();
                break;
            }
            Err(RunOutcome::DeadlineExceeded) => {
                envelope.error = RunOutcome::DeadlineExceeded.to_string();
            }
            Err(RunOutcome::Failed(message)) => {
                envelope.error = message;
            }
        }
    }
}

/// Races one attempt against `timeout`. A lost race detaches the attempt's
/// own owned clone rather than the envelope's copy, so the envelope keeps a
/// stable value to serialize and retry from while the clone runs on,
/// unobserved, in the background (see `run_with_timeout`).
async fn run_attempt<T: Task>(task: &T, timeout: Duration) -> (T, Result<(), RunOutcome>) {
    let mut attempt_task = task.clone();
    let (state_tx, mut state_rx) = oneshot::channel::<T>();

    let fut = async move {
        let result = attempt_task.run().await;
        let _ = state_tx.send(attempt_task);
        result
    };

    let outcome = run_with_timeout(fut, timeout).await;
    let recovered = state_rx.try_recv().ok();

    (recovered.unwrap_or_else(|| task.clone()), outcome)
}
