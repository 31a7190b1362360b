use thiserror::Error;

/// Errors surfaced directly by scheduler construction.
///
/// Runtime failures (a task erroring, a sink failing to open, a metrics push
/// timing out) are never returned to the caller — they are logged via
/// `tracing` and absorbed, matching the engine's "best effort" stance on
/// everything past the point a run has started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("num_workers must be at least 1")]
    WorkersMustBePositive,

    #[error("max_retries must be at least 1")]
    RetriesMustBePositive,

    #[error("max_runtime_per_task must be at least 1s")]
    TimeoutMustBePositive,

    #[error("shard {shard} is out of range for num_shards {num_shards}")]
    ShardOutOfRange { shard: u32, num_shards: u32 },

    #[error("status_tick must be at least 1s")]
    StatusTickMustBeAtLeastOneSecond,

    #[error("cannot subscribe to results after the scheduler has started")]
    AlreadyStarted,
}

/// Errors returned by scheduler operations after construction.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler has already been stopped")]
    AlreadyStopped,
}
