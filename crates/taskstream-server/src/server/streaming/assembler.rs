use bytes::BytesMut;
use taskstream_core::{ChunkLimit, Error, ProtocolMessage, Result, SubmissionOptions, WorkItem};

/// A fully received submission.
#[derive(Debug, Default, PartialEq)]
pub struct Batch {
    pub session: String,
    pub options: Option<SubmissionOptions>,
    pub items: Vec<WorkItem>,
}

#[derive(Debug)]
enum AssemblerState {
    AwaitingSession,
    AwaitingHeader,
    ReadingPayload { item: WorkItem, buf: BytesMut },
    Closed,
}

/// Rebuilds a [`Batch`] from the messages of a `CreateLargeTasks` stream.
///
/// The accepted grammar is
///
/// ```text
/// SessionInit (ItemHeader PayloadFragment* PayloadComplete)* BatchClose?
/// ```
///
/// where `BatchClose` may only be left out when the batch is empty. Every
/// fragment must fit in the advertised [`ChunkLimit`], and a reassembled
/// payload may not exceed `max_payload_bytes`.
#[derive(Debug)]
pub struct SubmissionAssembler {
    limit: ChunkLimit,
    max_payload_bytes: usize,
    state: AssemblerState,
    batch: Batch,
}

impl SubmissionAssembler {
    pub fn new(limit: ChunkLimit, max_payload_bytes: usize) -> Self {
        Self {
            limit,
            max_payload_bytes,
            state: AssemblerState::AwaitingSession,
            batch: Batch::default(),
        }
    }

    /// Consumes the next message of the stream.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] if the message is out of order or a
    ///   fragment exceeds the chunk limit.
    /// - [`Error::InvalidRequest`] if a payload grows beyond the size cap.
    pub fn push(&mut self, message: ProtocolMessage) -> Result<()> {
        let state = core::mem::replace(&mut self.state, AssemblerState::Closed);

        self.state = match (state, message) {
            (AssemblerState::AwaitingSession, ProtocolMessage::SessionInit { session, options }) => {
                self.batch.session = session;
                self.batch.options = options;
                AssemblerState::AwaitingHeader
            }
            (AssemblerState::AwaitingSession, _) => {
                return Err(Error::violation("stream must start with a session message"));
            }
            (
                AssemblerState::AwaitingHeader,
                ProtocolMessage::ItemHeader {
                    id,
                    data_dependencies,
                    expected_output_keys,
                },
            ) => AssemblerState::ReadingPayload {
                item: WorkItem {
                    id,
                    data_dependencies,
                    expected_output_keys,
                    ..WorkItem::default()
                },
                buf: BytesMut::new(),
            },
            (AssemblerState::AwaitingHeader, ProtocolMessage::BatchClose) => AssemblerState::Closed,
            (AssemblerState::AwaitingHeader, ProtocolMessage::SessionInit { .. }) => {
                return Err(Error::violation("session message sent twice"));
            }
            (
                AssemblerState::AwaitingHeader,
                ProtocolMessage::PayloadFragment { .. } | ProtocolMessage::PayloadComplete,
            ) => {
                return Err(Error::violation("payload received before its header"));
            }
            (
                AssemblerState::ReadingPayload { item, mut buf },
                ProtocolMessage::PayloadFragment { bytes },
            ) => {
                if bytes.len() > self.limit.get() {
                    return Err(Error::violation(format!(
                        "fragment of {} bytes exceeds the chunk limit of {}",
                        bytes.len(),
                        self.limit.get()
                    )));
                }
                if buf.len() + bytes.len() > self.max_payload_bytes {
                    return Err(Error::InvalidRequest {
                        reason: format!(
                            "payload of task {} exceeds {} bytes",
                            item.id, self.max_payload_bytes
                        ),
                    });
                }
                buf.extend_from_slice(&bytes);
                AssemblerState::ReadingPayload { item, buf }
            }
            (AssemblerState::ReadingPayload { mut item, buf }, ProtocolMessage::PayloadComplete) => {
                item.payload = buf.freeze();
                self.batch.items.push(item);
                AssemblerState::AwaitingHeader
            }
            (
                AssemblerState::ReadingPayload { item, .. },
                ProtocolMessage::SessionInit { .. }
                | ProtocolMessage::ItemHeader { .. }
                | ProtocolMessage::BatchClose,
            ) => {
                return Err(Error::violation(format!(
                    "payload of task {} was not completed",
                    item.id
                )));
            }
            (AssemblerState::Closed, _) => {
                return Err(Error::violation("message received after the last task"));
            }
        };

        Ok(())
    }

    /// Ends the stream and returns the batch it carried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the stream ended before the
    /// session message, in the middle of an item, or after at least one item
    /// without the closing marker.
    pub fn finish(self) -> Result<Batch> {
        match self.state {
            AssemblerState::AwaitingSession => {
                Err(Error::violation("stream ended before the session message"))
            }
            AssemblerState::AwaitingHeader if !self.batch.items.is_empty() => {
                Err(Error::violation("stream ended without the last task marker"))
            }
            AssemblerState::ReadingPayload { item, .. } => Err(Error::violation(format!(
                "stream ended inside the payload of task {}",
                item.id
            ))),
            AssemblerState::AwaitingHeader | AssemblerState::Closed => Ok(self.batch),
        }
    }
}
