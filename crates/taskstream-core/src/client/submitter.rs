//! gRPC client for chunked task submission and result retrieval.
//!
//! [`Submitter`] wraps the generated [`SubmitterClient`] and drives the two
//! streaming calls of the protocol:
//!
//! - [`Submitter::submit`] fetches the service's chunk limit, writes a whole
//!   batch through one `CreateLargeTasks` stream and returns the single
//!   aggregate reply.
//! - [`Submitter::fetch_result`] opens a `TryGetResultStream` call and
//!   reassembles the streamed result.
//!
//! Every suspension point observes a [`CancellationToken`]. Cancelling a
//! submission does not retract messages that were already written; the
//! server-side effect of an aborted submission is indeterminate.

use super::config::SubmitterConfig;
use crate::{
    AggregateReply, ChunkLimit, Error, Result, SubmissionOptions, WorkItem,
    proto::{self, CreateLargeTaskRequest, ResultRequest, submitter_client::SubmitterClient},
    protocol::{decode, sequence},
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    codegen::StdError,
    transport::{Channel, Endpoint},
};

/// Client for the `Submitter` gRPC service.
///
/// Cloning is cheap: clones share the underlying [`Channel`]. Each call works
/// on its own clone of the generated client, so one `Submitter` can drive
/// several submissions concurrently.
#[derive(Clone, Debug)]
pub struct Submitter {
    client: SubmitterClient<Channel>,
    config: SubmitterConfig,
}

impl Submitter {
    /// Connects to `dst` with the default [`SubmitterConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the endpoint is invalid or unreachable.
    pub async fn connect<D>(dst: D) -> Result<Self>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<StdError>,
    {
        let client = SubmitterClient::connect(dst)
            .await
            .map_err(|e| Error::Transport {
                code: tonic::Code::Unavailable,
                message: e.to_string(),
            })?;
        Ok(Self::from_client(client))
    }

    pub fn new(channel: Channel) -> Self {
        Self::from_client(SubmitterClient::new(channel))
    }

    pub fn from_client(client: SubmitterClient<Channel>) -> Self {
        Self {
            client,
            config: SubmitterConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_config(mut self, config: SubmitterConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Queries the service configuration for the maximum fragment size.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigUnavailable`] if the query fails.
    /// - [`Error::InvalidChunkLimit`] if the advertised size is not positive.
    /// - [`Error::OperationCancelled`] if `cancel` fires first.
    pub async fn chunk_limit(&self, cancel: &CancellationToken) -> Result<ChunkLimit> {
        let mut client = self.client.clone();

        let configuration = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::OperationCancelled),
            response = client.get_service_configuration(proto::Empty {}) => {
                response.map_err(|status| Error::ConfigUnavailable {
                    reason: format!("{:?}: {}", status.code(), status.message()),
                })?
            }
        };

        ChunkLimit::try_from(configuration.into_inner().data_chunk_max_size)
    }

    /// Submits a batch of work items under `session` and returns the
    /// service's aggregate reply for the whole batch.
    ///
    /// `items` is pulled lazily, one message ahead of the transport: a
    /// payload is only sliced into fragments as the stream drains, and the
    /// next item is only taken once the previous one has been written.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigUnavailable`] / [`Error::InvalidChunkLimit`] if the
    ///   chunk limit cannot be established; nothing has been written then.
    /// - [`Error::OperationCancelled`] if `cancel` fires while writing or
    ///   waiting for the reply.
    /// - The mapped gRPC status if the service rejects the stream.
    /// - [`Error::ChannelError`] if the request stream closed before every
    ///   message was written and the service still answered successfully.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(session = session)))]
    pub async fn submit<I>(
        &self,
        session: &str,
        options: Option<SubmissionOptions>,
        items: I,
        cancel: &CancellationToken,
    ) -> Result<AggregateReply>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let limit = self.chunk_limit(cancel).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Submitting with chunk limit {}", limit.get());

        let messages = sequence(items, session, options, limit, self.config.empty_batch);
        let (tx, rx) = mpsc::channel::<CreateLargeTaskRequest>(self.config.write_buffer);

        // Dropping `tx` at the end of the loop closes the write side.
        let feed = async move {
            for message in messages {
                if tx.send(message.into()).await.is_err() {
                    return Err(Error::ChannelError {
                        context: "submission stream closed before the batch was written"
                            .to_string(),
                    });
                }
            }
            Ok(())
        };

        let mut client = self.client.clone();
        let call = client.create_large_tasks(ReceiverStream::new(rx));

        let mut feed = core::pin::pin!(feed);
        let mut call = core::pin::pin!(call);
        let mut fed: Option<Result<()>> = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Submission cancelled");
                    return Err(Error::OperationCancelled);
                }
                reply = &mut call => {
                    // The service's own verdict takes precedence over a write
                    // failure caused by it closing the stream.
                    let reply = reply?.into_inner();
                    return match fed {
                        Some(Err(e)) => Err(e),
                        _ => Ok(reply),
                    };
                }
                result = &mut feed, if fed.is_none() => {
                    #[cfg(feature = "tracing")]
                    {
                        if let Err(e) = &result {
                            tracing::warn!("Failed to write submission: {e}");
                        }
                    }
                    fed = Some(result);
                }
            }
        }
    }

    /// Streams the result identified by `request` and returns its bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::TaskFailed`] / [`Error::TaskIncomplete`] as reported by the
    ///   service.
    /// - [`Error::ProtocolViolation`] for an undefined reply.
    /// - [`Error::OperationCancelled`] if `cancel` fires first.
    /// - The mapped gRPC status if the call fails.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(session = %request.session, result_id = %request.result_id))
    )]
    pub async fn fetch_result(
        &self,
        request: ResultRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let mut client = self.client.clone();

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::OperationCancelled),
            response = client.try_get_result_stream(request) => response?.into_inner(),
        };

        decode(stream, cancel).await
    }
}
