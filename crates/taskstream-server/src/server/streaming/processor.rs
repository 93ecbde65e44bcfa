use crate::server::{
    store::{ResultState, ResultStore},
    telemetry::increment_tasks_failed,
};
use taskstream_core::WorkItem;

/// Executes a single accepted task within a worker.
///
/// The service is a loopback peer: a task's result is its own payload,
/// published under each of its expected output keys. A task whose data
/// dependency has already failed fails as well, carrying the dependency's
/// error.
///
/// # Arguments
///
/// - `_worker_id`: Identifier for this worker, used in logs and tracing.
/// - `store`: Shared store the result is published to.
/// - `session`: Session the task was submitted to.
/// - `item`: The accepted task.
#[allow(clippy::used_underscore_binding)]
pub async fn execute_task(_worker_id: usize, store: &ResultStore, session: &str, item: WorkItem) {
    for key in &item.data_dependencies {
        if let Some(ResultState::Failed { task_id, message }) = store.get(session, key).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Worker {_worker_id} failing task {} on dependency {key}",
                item.id
            );
            let message = format!("dependency {key} of task {task_id} failed: {message}");
            store.fail(session, &item, &message).await;
            increment_tasks_failed();
            return;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(
        "Worker {_worker_id} completed task {} ({} bytes)",
        item.id,
        item.payload.len()
    );

    let data = item.payload.clone();
    store.complete(session, &item, data).await;
}
