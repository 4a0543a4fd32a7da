//! Long-running background jobs: batch pipelines, single-device flashes,
//! reboots. Each job owns a log channel; a forwarder task keeps the task
//! store (and, for streaming endpoints, the HTTP body) in program order.

pub mod batch;
pub mod flash;
pub mod reboot;

use std::sync::Arc;

use fleet_transport::LogSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// A sink whose lines are appended to the task's log, in send order. Await
/// the handle after dropping the sink to know the log is fully flushed.
pub(crate) fn store_logger(state: Arc<AppState>, task_id: String) -> (LogSink, JoinHandle<()>) {
    let (sink, mut rx) = LogSink::channel();
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            state.tasks.append_log(&task_id, line);
        }
    });
    (sink, handle)
}

/// Like `store_logger`, but lines are also forwarded to a channel consumed
/// by a streaming HTTP response. A disconnected client only stops the
/// stream; the task log keeps filling.
pub(crate) fn stream_logger(
    state: Arc<AppState>,
    task_id: String,
) -> (
    LogSink,
    mpsc::UnboundedReceiver<String>,
    JoinHandle<()>,
) {
    let (sink, mut rx) = LogSink::channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            state.tasks.append_log(&task_id, line.clone());
            let _ = out_tx.send(line);
        }
    });
    (sink, out_rx, handle)
}
