use serde::Serialize;

/// A single unit of work submitted to a [`crate::Scheduler`].
///
/// The engine never inspects a task's fields beyond the `Serialize` bound
/// needed to write it into the JSONL result stream — `run` is the only
/// capability it relies on. Returning `Err` signals the attempt should be
/// retried, subject to `max_retries`; the error message becomes
/// `TaskEnvelope::error` if this turns out to be the last attempt.
#[async_trait::async_trait]
pub trait Task: Serialize + Clone + Send + 'static {
    /// Performs one attempt. Called again (fresh state, same envelope) on
    /// failure until `max_retries` attempts have been made. There is no
    /// explicit cancellation token: the scheduler enforces the deadline by
    /// racing this future in its own spawned task (see `TimedRunner`) and
    /// simply stops waiting on it, rather than asking it to cooperatively
    /// exit.
    ///
    /// `Clone` lets the scheduler hand each attempt its own owned copy, so a
    /// lost race can be spawned as a truly `'static`, detached task instead
    /// of borrowing the envelope's copy — the same copy stays put for the
    /// next retry, or for serialization, while the abandoned clone runs on.
    async fn run(&mut self) -> Result<(), String>;
}
