use crate::server::telemetry::increment_result_bytes;
use bytes::Bytes;
use taskstream_core::{ChunkLimit, Error, ProtocolMessage, ResultReply, proto, protocol::chunk};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Streams a ready result back to the client.
///
/// `data` is split into fragments of at most `limit` bytes, each sent as a
/// `result.data` reply, followed by a single `result.data_complete`. An
/// empty result is sent as one empty fragment and the completion marker.
///
/// # Errors
///
/// - [`Error::ChannelError`] if the client went away mid-stream.
/// - [`Error::ServiceShutdown`] if `shutdown` fires before the stream is
///   fully written; the client is told with an `Unavailable` status on a
///   best-effort basis.
pub async fn feed_result(
    data: Bytes,
    limit: ChunkLimit,
    resp_tx: mpsc::Sender<Result<proto::ResultReply, Status>>,
    shutdown: CancellationToken,
) -> taskstream_core::Result<()> {
    for message in chunk(data, limit) {
        let reply = match message {
            ProtocolMessage::PayloadFragment { bytes } => {
                increment_result_bytes(bytes.len() as u64);
                ResultReply::Partial { bytes }
            }
            ProtocolMessage::PayloadComplete => ResultReply::Complete,
            ProtocolMessage::SessionInit { .. }
            | ProtocolMessage::ItemHeader { .. }
            | ProtocolMessage::BatchClose => {
                return Err(Error::violation("chunker produced a non-payload message"));
            }
        };

        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                let err = Error::ServiceShutdown;
                if let Err(_e) = resp_tx.send(Err(err.clone().into())).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to forward err: {}", _e);
                }
                return Err(err);
            }
            sent = resp_tx.send(Ok(reply.into())) => {
                if let Err(e) = sent {
                    return Err(Error::ChannelError {
                        context: format!("Failed to forward result chunk: {e}"),
                    });
                }
            }
        }
    }

    Ok(())
}
