use std::future::Future;
use std::time::Duration;

/// Outcome of a single timed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    DeadlineExceeded,
    Failed(String),
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::DeadlineExceeded => write!(f, "deadline exceeded"),
            RunOutcome::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

/// Runs `fut` to completion or until `timeout` elapses, whichever comes first.
///
/// `fut` is spawned as its own task so that a deadline win does not cancel
/// it: the `JoinHandle` is simply dropped, leaving the attempt to finish (or
/// hang) on its own, unobserved. This mirrors a cancellation signal that the
/// task's own code is free to ignore — the scheduler never forces it to stop,
/// it only stops waiting for it.
pub async fn run_with_timeout<F>(fut: F, timeout: Duration) -> Result<(), RunOutcome>
where
    F: Future<Output = Result<(), String>> + Send + 'static,
{
    let handle = tokio::spawn(fut);

    tokio::select! {
        result = handle => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(RunOutcome::Failed(message)),
                Err(join_err) => Err(RunOutcome::Failed(format!("task panicked: {join_err}"))),
            }
        }
        _ = tokio::time::sleep(timeout) => {
            Err(RunOutcome::DeadlineExceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_ok_when_future_completes_in_time() {
        let result = run_with_timeout(async { Ok(()) }, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_failure_message_on_task_error() {
        let result = run_with_timeout(
            async { Err("boom".to_string()) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Err(RunOutcome::Failed("boom".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_deadline_exceeded_without_waiting_for_slow_future() {
        let fut = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };
        let result = run_with_timeout(fut, Duration::from_millis(50)).await;
        assert_eq!(result, Err(RunOutcome::DeadlineExceeded));
    }
}
