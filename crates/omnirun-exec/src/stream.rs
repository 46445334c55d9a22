//! Incremental command output
//!
//! Every adapter's `stream` returns an [`OutputStream`]: a bounded channel of
//! [`StreamEvent`]s fed by a producer task that owns the underlying process or
//! session channel. Closing the stream terminates the producer, which in turn
//! kills the process it was reading.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Channel capacity; producers block once the consumer falls this far behind
pub(crate) const STREAM_BUFFER: usize = 256;

/// One unit of streamed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A line of stdout
    Stdout(String),
    /// A line of stderr
    Stderr(String),
    /// The command exited with this status; always the final event
    Exit(i32),
}

/// Handle to a running command's output
pub struct OutputStream {
    events: ReceiverStream<StreamEvent>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl OutputStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<StreamEvent>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events: ReceiverStream::new(rx),
            stop: Some(stop),
            task,
        }
    }

    /// Next event, or `None` once the producer has finished
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.next().await
    }

    /// Terminate the underlying command and release its resources
    pub async fn close(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(Duration::from_secs(2), &mut self.task)
            .await
            .is_err()
        {
            debug!("stream producer did not stop in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        // A dropped stream must not leak its producer or the process under it.
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("closed", &self.stop.is_none())
            .finish_non_exhaustive()
    }
}
