use crate::{Error, Result, ResultReply, proto};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Lifecycle of a [`ResultDecoder`].
///
/// `Reading` moves to `Done` when the stream ends cleanly and to `Failed` on
/// the first error reply. Both are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Reading,
    Done,
    Failed,
}

/// Reassembles a result from the replies of a result stream.
///
/// Data fragments are appended in arrival order. The completion marker
/// appends nothing; data arriving after it is a protocol violation. Task
/// errors and undefined replies fail the decoder and discard whatever was
/// accumulated.
#[derive(Debug)]
pub struct ResultDecoder {
    buf: BytesMut,
    completed: bool,
    state: DecoderState,
    failure: Option<Error>,
}

impl Default for ResultDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            completed: false,
            state: DecoderState::Reading,
            failure: None,
        }
    }

    pub const fn state(&self) -> DecoderState {
        self.state
    }

    /// Whether the completion marker has been received.
    pub const fn is_complete(&self) -> bool {
        self.completed
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feeds one reply into the decoder.
    ///
    /// # Errors
    ///
    /// Returns the error carried by a failure reply, or
    /// [`Error::ProtocolViolation`] for an undefined reply or data after the
    /// completion marker. Once failed, every further call returns the same
    /// error; once done, every further call is a violation. Neither changes
    /// the state.
    pub fn push(&mut self, reply: ResultReply) -> Result<()> {
        match self.state {
            DecoderState::Reading => {}
            DecoderState::Failed => return Err(self.failed_with()),
            DecoderState::Done => {
                return Err(Error::violation("reply received after end of stream"));
            }
        }

        match reply {
            ResultReply::Partial { bytes } if !self.completed => {
                self.buf.extend_from_slice(&bytes);
                Ok(())
            }
            ResultReply::Partial { .. } => {
                Err(self.fail(Error::violation("data received after completion marker")))
            }
            ResultReply::Complete => {
                self.completed = true;
                Ok(())
            }
            ResultReply::TaskFailed { task_id, message } => {
                Err(self.fail(Error::TaskFailed { task_id, message }))
            }
            ResultReply::TaskIncomplete { task_id } => {
                Err(self.fail(Error::TaskIncomplete { task_id }))
            }
            ResultReply::Undefined => Err(self.fail(Error::violation("undefined result reply"))),
        }
    }

    /// Marks the failure of the underlying stream itself.
    pub fn abort(&mut self, err: Error) -> Error {
        match self.state {
            DecoderState::Reading => self.fail(err),
            DecoderState::Failed => self.failed_with(),
            DecoderState::Done => err,
        }
    }

    /// Ends decoding after the stream closed cleanly and returns the result.
    ///
    /// # Errors
    ///
    /// Returns the recorded error if the decoder failed, or
    /// [`Error::ProtocolViolation`] if the result was already taken.
    pub fn finish(&mut self) -> Result<Bytes> {
        match self.state {
            DecoderState::Reading => {
                self.state = DecoderState::Done;
                Ok(self.buf.split().freeze())
            }
            DecoderState::Failed => Err(self.failed_with()),
            DecoderState::Done => Err(Error::violation("result already taken")),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = DecoderState::Failed;
        self.buf = BytesMut::new();
        self.failure = Some(err.clone());
        err
    }

    fn failed_with(&self) -> Error {
        self.failure
            .clone()
            .unwrap_or_else(|| Error::violation("decoder failed"))
    }
}

/// Drains a result stream and returns the reassembled bytes.
///
/// A data fragment arriving after the completion marker fails the whole
/// fetch with [`Error::ProtocolViolation`] instead of being appended. A
/// completion flag set to `false` counts as an empty fragment.
///
/// The cancellation token is checked whenever the loop waits for the next
/// reply. On cancellation or error the stream is dropped and the partial
/// result is discarded.
///
/// # Errors
///
/// - [`Error::OperationCancelled`] if `cancel` fires first.
/// - [`Error::TaskFailed`] / [`Error::TaskIncomplete`] for the matching
///   replies.
/// - [`Error::ProtocolViolation`] for an undefined reply or data after the
///   completion marker.
/// - The mapped [`Status`] if the stream itself fails.
pub async fn decode<S>(stream: S, cancel: &CancellationToken) -> Result<Bytes>
where
    S: Stream<Item = core::result::Result<proto::ResultReply, Status>>,
{
    let mut stream = core::pin::pin!(stream);
    let mut decoder = ResultDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Result stream cancelled after {} bytes", decoder.len());
                return Err(decoder.abort(Error::OperationCancelled));
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(reply)) => decoder.push(reply.into())?,
            Some(Err(status)) => return Err(decoder.abort(status.into())),
            None => return decoder.finish(),
        }
    }
}
