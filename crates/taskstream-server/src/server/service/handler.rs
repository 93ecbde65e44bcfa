//! gRPC service implementation for chunked task submission.
//!
//! This module defines [`SubmitterService`], the loopback implementation of
//! the `Submitter` gRPC service.
//!
//! ## Responsibilities
//!
//! - Advertise the chunk size limit.
//! - Reassemble `CreateLargeTasks` streams, accept or reject each item and
//!   dispatch accepted items to the worker pool.
//! - Stream stored results back through `TryGetResultStream`.
//! - Refuse new streams and drain open ones on shutdown.

use crate::server::{
    config::ServerConfig,
    pool::{manager::WorkerPool, worker::worker_loop},
    store::{ResultState, ResultStore},
    streaming::{
        assembler::{Batch, SubmissionAssembler},
        coordinator::feed_result,
    },
    telemetry::{
        increment_stream_errors, increment_submissions, increment_tasks_accepted,
        increment_tasks_failed, increment_tasks_rejected, record_submission_duration,
    },
};
use core::pin::Pin;
use std::sync::Arc;
use taskstream_core::{
    Error, ProtocolMessage, ResultReply,
    proto::{
        self, Configuration, CreateLargeTaskRequest, CreateTaskReply, ResultRequest,
        create_task_reply::{self, CreationStatusList},
        submitter_server::Submitter,
    },
};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

/// Loopback gRPC service for chunked task submission and result streaming.
///
/// Accepted tasks are executed by a pool of background workers, each of which
/// publishes the task's payload as its result.
#[derive(Clone)]
pub struct SubmitterService {
    config: ServerConfig,
    worker_pool: Arc<WorkerPool>,
    store: Arc<ResultStore>,
}

impl SubmitterService {
    /// Creates a new `SubmitterService` and spawns its worker tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(ResultStore::new());
        let shutdown_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(config.num_workers);

        for worker_id in 0..config.num_workers {
            let (tx, rx) = mpsc::channel(config.work_queue_size);
            workers.push(tx);
            tokio::spawn(worker_loop(worker_id, rx, Arc::clone(&store)));
        }

        let worker_pool = WorkerPool::new(workers, shutdown_token, config.shutdown_timeout);

        Self {
            config,
            worker_pool: Arc::new(worker_pool),
            store,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Stops accepting streams, drains open ones and stops the workers.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.worker_pool.shutdown().await
    }

    /// Reads a whole submission stream into a batch and accepts it.
    async fn accept_batch(
        &self,
        mut stream: Streaming<CreateLargeTaskRequest>,
    ) -> Result<CreationStatusList, Error> {
        let mut assembler =
            SubmissionAssembler::new(self.config.chunk_limit, self.config.max_payload_bytes);

        while let Some(request) = stream.message().await? {
            assembler.push(ProtocolMessage::try_from(request)?)?;
        }
        let Batch {
            session,
            options: _options,
            items,
        } = assembler.finish()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Received {} tasks for session {session} with options {:?}",
            items.len(),
            _options
        );

        let (creation_statuses, accepted) = self.store.register(&session, items).await;

        let accepted_count = accepted.len();
        increment_tasks_accepted(accepted_count as u64);
        increment_tasks_rejected((creation_statuses.len() - accepted_count) as u64);

        for item in accepted {
            if let Err(e) = self
                .worker_pool
                .send_to_next_worker(&session, item.clone())
                .await
            {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to dispatch task {}: {e}", item.id);
                self.store.fail(&session, &item, &e.to_string()).await;
                increment_tasks_failed();
            }
        }

        Ok(CreationStatusList { creation_statuses })
    }
}

type ResultStream = Pin<Box<dyn Stream<Item = Result<proto::ResultReply, Status>> + Send>>;

fn single_reply(reply: ResultReply) -> ResultStream {
    Box::pin(tokio_stream::iter([Ok(proto::ResultReply::from(reply))]))
}

#[tonic::async_trait]
impl Submitter for SubmitterService {
    type TryGetResultStreamStream = ResultStream;

    async fn get_service_configuration(
        &self,
        _req: Request<proto::Empty>,
    ) -> Result<Response<Configuration>, Status> {
        Ok(Response::new(Configuration {
            data_chunk_max_size: self.config.data_chunk_max_size,
        }))
    }

    /// Handles a chunked batch submission.
    ///
    /// Malformed streams fail the whole call with `InvalidArgument`. A well
    /// formed stream is answered with one creation status per item, in
    /// submission order.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn create_large_tasks(
        &self,
        req: Request<Streaming<CreateLargeTaskRequest>>,
    ) -> Result<Response<CreateTaskReply>, Status> {
        let _guard = self.worker_pool.track_stream()?;
        let start = std::time::Instant::now();
        increment_submissions();

        let statuses = self.accept_batch(req.into_inner()).await.map_err(|e| {
            #[cfg(feature = "tracing")]
            tracing::warn!("Rejected submission: {e}");
            increment_stream_errors();
            Status::from(e)
        })?;

        record_submission_duration(start.elapsed().as_secs_f64() * 1000.0);

        Ok(Response::new(CreateTaskReply {
            response: Some(create_task_reply::Response::CreationStatusList(statuses)),
        }))
    }

    /// Streams the result stored under `result_id`.
    ///
    /// Pending and failed results are answered with a single reply; unknown
    /// keys fail the call with `NotFound`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(session = %req.get_ref().session, result_id = %req.get_ref().result_id))
    )]
    async fn try_get_result_stream(
        &self,
        req: Request<ResultRequest>,
    ) -> Result<Response<Self::TryGetResultStreamStream>, Status> {
        let guard = self.worker_pool.track_stream()?;
        let ResultRequest { session, result_id } = req.into_inner();

        let Some(state) = self.store.get(&session, &result_id).await else {
            increment_stream_errors();
            return Err(Status::not_found(format!(
                "result {result_id} is unknown in session {session}"
            )));
        };

        let data = match state {
            ResultState::Pending { task_id } => {
                return Ok(Response::new(single_reply(ResultReply::TaskIncomplete {
                    task_id,
                })));
            }
            ResultState::Failed { task_id, message } => {
                return Ok(Response::new(single_reply(ResultReply::TaskFailed {
                    task_id,
                    message,
                })));
            }
            ResultState::Ready { data, .. } => data,
        };

        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let limit = self.config.chunk_limit;
        let shutdown = self.worker_pool.shutdown_token();

        let fut = async move {
            // The stream counts as in flight until every chunk is handed off.
            let _guard = guard;
            if let Err(_e) = feed_result(data, limit, resp_tx, shutdown).await {
                increment_stream_errors();
                #[cfg(feature = "tracing")]
                tracing::warn!("Error: {}", _e);
            }
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(tracing::info_span!("streaming"))
        };

        tokio::spawn(fut);

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}
