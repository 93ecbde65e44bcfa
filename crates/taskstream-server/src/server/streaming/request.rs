use taskstream_core::WorkItem;
use tokio::sync::oneshot;

/// A message sent from the worker pool to an individual worker task.
#[derive(Debug)]
pub enum WorkRequest {
    /// Execute an accepted task of `session`.
    Execute { session: String, item: WorkItem },

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   completed its shutdown routine.
    Shutdown { response: oneshot::Sender<()> },
}
