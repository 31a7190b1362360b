use serde::Serialize;

/// Engine-owned record wrapping a task with per-attempt metadata.
///
/// `index` is assigned once at submission time; everything else is mutated
/// in place by the single worker that owns this envelope for the duration
/// of its attempts, then the envelope is broadcast read-only to every
/// result channel.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEnvelope<T> {
    pub index: i64,
    pub run_id: String,
    pub id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub num_tries: u32,
    pub task: T,
    pub error: String,
}

impl<T> TaskEnvelope<T> {
    pub(crate) fn new(index: i64, run_id: &str, task: T) -> Self {
        Self {
            index,
            run_id: run_id.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            started_at: 0,
            finished_at: 0,
            num_tries: 0,
            task,
            error: String::new(),
        }
    }
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

pub(crate) fn mark_attempt_started<T>(envelope: &mut TaskEnvelope<T>) {
    envelope.started_at = now_micros();
}

pub(crate) fn mark_attempt_finished<T>(envelope: &mut TaskEnvelope<T>) {
    envelope.num_tries += 1;
    envelope.finished_at = now_micros();
}
