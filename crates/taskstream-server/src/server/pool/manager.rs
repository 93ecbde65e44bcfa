//! Asynchronous worker pool executing accepted tasks.
//!
//! [`WorkerPool`] owns the sending half of every worker's bounded
//! [`mpsc`] channel and hands out work in round-robin order. It also keeps
//! the count of open gRPC streams so that shutdown can wait for them to drain
//! before the workers are stopped.

use crate::server::{
    streaming::request::WorkRequest,
    telemetry::{decrement_streams_inflight, increment_streams_inflight},
};
use core::time::Duration;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use taskstream_core::{Error, WorkItem};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    draining: AtomicBool,
    streams_inflight: Arc<AtomicUsize>,
}

/// Marks one open gRPC stream until dropped.
#[derive(Debug)]
pub struct StreamGuard {
    streams_inflight: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

impl WorkerPool {
    pub fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
            shutdown_timeout,
            draining: AtomicBool::new(false),
            streams_inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Token cancelled once in-flight streams had their chance to drain.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.draining.load(Ordering::Acquire) || self.shutdown_token.is_cancelled()
    }

    pub fn streams_inflight(&self) -> usize {
        self.streams_inflight.load(Ordering::Acquire)
    }

    /// Registers a new gRPC stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn track_stream(&self) -> Result<StreamGuard, Error> {
        if self.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }

        self.streams_inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();

        Ok(StreamGuard {
            streams_inflight: Arc::clone(&self.streams_inflight),
        })
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends an accepted task of `session` to the next worker in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down.
    /// - The worker's channel is closed.
    pub async fn send_to_next_worker(&self, session: &str, item: WorkItem) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let request = WorkRequest::Execute {
            session: session.to_string(),
            item,
        };

        self.workers[worker_idx]
            .send(request)
            .await
            .map_err(|_| Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            })
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// 1. Refuses new streams.
    /// 2. Waits up to the shutdown timeout for open streams to finish.
    /// 3. Cancels the shared [`CancellationToken`], interrupting whatever is
    ///    still streaming.
    /// 4. Sends a [`WorkRequest::Shutdown`] to each worker and waits for the
    ///    acknowledgements.
    ///
    /// Tasks queued ahead of the shutdown request are still executed.
    pub async fn shutdown(&self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.draining.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drained = timeout(self.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            );
        }

        self.shutdown_token.cancel();

        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                acks.push((i, rx));
            }
        }

        let shutdown_timeout = self.shutdown_timeout;
        let waits = acks.into_iter().map(|(_i, rx)| async move {
            match timeout(shutdown_timeout, rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} returned error: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });
        futures::future::join_all(waits).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}
