use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

/// A consistent reading of all progress counters plus a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub timestamp: String,
    pub num_failed: i64,
    pub num_succeed: i64,
    pub num_done: i64,
    pub num_total: i64,
}

/// Thread-safe counters plus a periodic, lossless snapshot broadcast.
///
/// Subscribers get a bounded (capacity 1) channel; the publisher sends to
/// each subscriber in turn and awaits the send, so a slow subscriber blocks
/// the *next* snapshot reaching every subscriber — back-pressure is
/// intentional here, status fan-out is low volume.
pub struct StatusManager {
    num_failed: AtomicI64,
    num_succeed: AtomicI64,
    num_total: AtomicI64,
    subscribers: Mutex<Vec<mpsc::Sender<Status>>>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self {
            num_failed: AtomicI64::new(0),
            num_succeed: AtomicI64::new(0),
            num_total: AtomicI64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn inc_failed(&self) {
        self.num_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_succeed(&self) {
        self.num_succeed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_total(&self, total: i64) {
        self.num_total.store(total, Ordering::Relaxed);
    }

    /// Registers a new subscriber. Valid only before the scheduler starts
    /// producing results; the scheduler enforces that ordering.
    pub fn subscribe(&self) -> mpsc::Receiver<Status> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn snapshot(&self) -> Status {
        let num_failed = self.num_failed.load(Ordering::Relaxed);
        let num_succeed = self.num_succeed.load(Ordering::Relaxed);
        Status {
            timestamp: chrono::Utc::now().to_rfc3339(),
            num_failed,
            num_succeed,
            num_done: num_failed + num_succeed,
            num_total: self.num_total.load(Ordering::Relaxed),
        }
    }

    async fn publish(&self, status: Status) {
        // Collect senders under the lock, then await sends outside it so the
        // mutex is never held across an await point.
        let senders: Vec<mpsc::Sender<Status>> = self.subscribers.lock().unwrap().clone();
        for sender in &senders {
            let _ = sender.send(status.clone()).await;
        }
    }

    /// Runs the tick loop until `stop_rx` fires. Emits an initial snapshot
    /// immediately, then one per tick.
    pub async fn run(&self, tick: Duration, mut stop_rx: tokio::sync::oneshot::Receiver<()>) {
        self.publish(self.snapshot()).await;

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; we already emitted the initial
        // snapshot above, so consume and discard it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    self.publish(self.snapshot()).await;
                    self.publish(self.snapshot()).await;
                    self.subscribers.lock().unwrap().clear();
                    return;
                }
                _ = ticker.tick() => {
                    self.publish(self.snapshot()).await;
                }
            }
        }
    }
}

impl Default for StatusManager {
    fn default() -> Self {
        Self::new()
    }
}
