use serde::Serialize;
use tokio::sync::mpsc;

use crate::sink::Sink;

/// Spawns a task that drains `rx` into a `Sink` opened at `path`, one JSON
/// object per line. A malformed record is logged and skipped; the recorder
/// itself never aborts on an encode error. Returns the `JoinHandle` so the
/// caller can track it in a `JoinSet` alongside its sibling recorders.
pub fn spawn_recorder<T>(
    path: String,
    mut rx: mpsc::Receiver<T>,
) -> tokio::task::JoinHandle<()>
where
    T: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = match Sink::open(&path).await {
            Ok(sink) => sink,
            Err(err) => {
                tracing::error!(target: "gojob_sinks::recorder", %path, error = %err, "failed to open sink");
                // Drain the channel so upstream senders don't block forever on a dead recorder.
                while rx.recv().await.is_some() {}
                return;
            }
        };

        while let Some(item) = rx.recv().await {
            match serde_json::to_vec(&item) {
                Ok(line) => {
                    if let Err(err) = sink.write_line(&line).await {
                        tracing::error!(target: "gojob_sinks::recorder", %path, error = %err, "failed to write record");
                    }
                }
                Err(err) => {
                    tracing::error!(target: "gojob_sinks::recorder", %path, error = %err, "failed to serialize record, skipping");
                }
            }
        }

        if let Err(err) = sink.close().await {
            tracing::error!(target: "gojob_sinks::recorder", %path, error = %err, "failed to close sink");
        }
    })
}
