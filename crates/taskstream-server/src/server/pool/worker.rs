use crate::server::{
    store::ResultStore,
    streaming::{processor::execute_task, request::WorkRequest},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// The worker listens on its own MPSC channel and executes tasks one at a
/// time until a shutdown request is received or every sender is dropped.
///
/// # Request Types
///
/// - [`WorkRequest::Execute`] - Runs an accepted task via [`execute_task`].
/// - [`WorkRequest::Shutdown`] - Signals the worker to stop and acknowledge
///   shutdown.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    store: Arc<ResultStore>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Execute { session, item } => {
                execute_task(worker_id, &store, &session, item).await;
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}
