//! # Domain Types and Wire Conversions
//!
//! This module defines the types the protocol works with, independent of the
//! generated protobuf structs, and the conversions between the two.
//!
//! ## Overview
//!
//! - [`WorkItem`] - one unit of work: identifier, payload, dependencies and
//!   the result keys it is expected to produce
//! - [`ChunkLimit`] - the validated maximum number of payload bytes per
//!   fragment
//! - [`ProtocolMessage`] - one message of a submission stream
//! - [`ResultReply`] - one message of a result stream
//!
//! The generated messages model every variant as an optional `oneof`. The
//! domain enums are closed sum types instead: a `oneof` with no case set
//! becomes [`ResultReply::Undefined`] on the result side and a
//! [`Error::ProtocolViolation`] on the submission side, so every caller has to
//! handle it explicitly.

use crate::{
    Error, Result,
    proto::{
        self, CreateLargeTaskRequest, DataChunk, InitTaskRequest, TaskError, TaskRequestHeader,
        create_large_task_request, data_chunk, init_task_request, result_reply,
    },
};
use bytes::Bytes;
use core::num::NonZeroUsize;

/// Options attached once to a whole submission batch.
pub type SubmissionOptions = proto::TaskOptions;

/// The single acknowledgement answering for a whole submitted batch.
pub type AggregateReply = proto::CreateTaskReply;

/// A unit of work submitted as part of a batch.
///
/// The payload may be arbitrarily large; it is split into fragments no larger
/// than the service's [`ChunkLimit`] when it is written to the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub payload: Bytes,
    pub data_dependencies: Vec<String>,
    pub expected_output_keys: Vec<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_data_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_expected_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_output_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Maximum number of payload bytes carried by a single fragment.
///
/// A `ChunkLimit` is always positive. It is built from the raw value the
/// service advertises, which is rejected with [`Error::InvalidChunkLimit`]
/// when it is zero or negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkLimit(NonZeroUsize);

impl ChunkLimit {
    pub const fn new(bytes: NonZeroUsize) -> Self {
        Self(bytes)
    }

    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl TryFrom<i32> for ChunkLimit {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(Error::InvalidChunkLimit {
                value: i64::from(value),
            })
    }
}

impl TryFrom<usize> for ChunkLimit {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        NonZeroUsize::new(value)
            .map(Self)
            .ok_or(Error::InvalidChunkLimit { value: 0 })
    }
}

/// One message of a submission stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolMessage {
    /// Opens the batch. Always the first message.
    SessionInit {
        session: String,
        options: Option<SubmissionOptions>,
    },
    /// Announces the next item; its payload fragments follow.
    ItemHeader {
        id: String,
        data_dependencies: Vec<String>,
        expected_output_keys: Vec<String>,
    },
    /// A bounded slice of the current item's payload.
    PayloadFragment { bytes: Bytes },
    /// Closes the current item's payload.
    PayloadComplete,
    /// Closes the batch, after the last item's payload.
    BatchClose,
}

impl From<ProtocolMessage> for CreateLargeTaskRequest {
    fn from(message: ProtocolMessage) -> Self {
        use create_large_task_request::Type;

        let r#type = match message {
            ProtocolMessage::SessionInit { session, options } => {
                Type::InitRequest(create_large_task_request::InitRequest {
                    session_id: session,
                    task_options: options,
                })
            }
            ProtocolMessage::ItemHeader {
                id,
                data_dependencies,
                expected_output_keys,
            } => Type::InitTask(InitTaskRequest {
                r#type: Some(init_task_request::Type::Header(TaskRequestHeader {
                    id,
                    data_dependencies,
                    expected_output_keys,
                })),
            }),
            ProtocolMessage::PayloadFragment { bytes } => Type::TaskPayload(DataChunk {
                r#type: Some(data_chunk::Type::Data(bytes)),
            }),
            ProtocolMessage::PayloadComplete => Type::TaskPayload(DataChunk {
                r#type: Some(data_chunk::Type::DataComplete(true)),
            }),
            ProtocolMessage::BatchClose => Type::InitTask(InitTaskRequest {
                r#type: Some(init_task_request::Type::LastTask(true)),
            }),
        };

        Self {
            r#type: Some(r#type),
        }
    }
}

impl TryFrom<CreateLargeTaskRequest> for ProtocolMessage {
    type Error = Error;

    fn try_from(request: CreateLargeTaskRequest) -> Result<Self> {
        use create_large_task_request::Type;

        match request.r#type {
            Some(Type::InitRequest(init)) => Ok(Self::SessionInit {
                session: init.session_id,
                options: init.task_options,
            }),
            Some(Type::InitTask(InitTaskRequest { r#type })) => match r#type {
                Some(init_task_request::Type::Header(header)) => Ok(Self::ItemHeader {
                    id: header.id,
                    data_dependencies: header.data_dependencies,
                    expected_output_keys: header.expected_output_keys,
                }),
                Some(init_task_request::Type::LastTask(true)) => Ok(Self::BatchClose),
                Some(init_task_request::Type::LastTask(false)) => {
                    Err(Error::violation("last_task marker set to false"))
                }
                None => Err(Error::violation("init_task without header or marker")),
            },
            Some(Type::TaskPayload(DataChunk { r#type })) => match r#type {
                Some(data_chunk::Type::Data(bytes)) => Ok(Self::PayloadFragment { bytes }),
                Some(data_chunk::Type::DataComplete(true)) => Ok(Self::PayloadComplete),
                Some(data_chunk::Type::DataComplete(false)) => {
                    Err(Error::violation("data_complete marker set to false"))
                }
                None => Err(Error::violation("task_payload without data or marker")),
            },
            None => Err(Error::violation("submission message without content")),
        }
    }
}

/// One message of a result stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultReply {
    /// A fragment of the result's bytes.
    Partial { bytes: Bytes },
    /// The server has sent every fragment. Carries no data.
    Complete,
    /// The task producing the result failed.
    TaskFailed { task_id: String, message: String },
    /// The task producing the result has not completed.
    TaskIncomplete { task_id: String },
    /// No variant was set. A conformant server never sends this.
    Undefined,
}

impl From<proto::ResultReply> for ResultReply {
    fn from(reply: proto::ResultReply) -> Self {
        match reply.r#type {
            Some(result_reply::Type::Result(DataChunk { r#type })) => match r#type {
                Some(data_chunk::Type::Data(bytes)) => Self::Partial { bytes },
                Some(data_chunk::Type::DataComplete(true)) => Self::Complete,
                // A cleared completion flag is an empty data fragment.
                Some(data_chunk::Type::DataComplete(false)) => Self::Partial {
                    bytes: Bytes::new(),
                },
                None => Self::Undefined,
            },
            Some(result_reply::Type::Error(TaskError { task_id, message })) => {
                Self::TaskFailed { task_id, message }
            }
            Some(result_reply::Type::NotCompletedTask(task_id)) => {
                Self::TaskIncomplete { task_id }
            }
            None => Self::Undefined,
        }
    }
}

impl From<ResultReply> for proto::ResultReply {
    fn from(reply: ResultReply) -> Self {
        let r#type = match reply {
            ResultReply::Partial { bytes } => Some(result_reply::Type::Result(DataChunk {
                r#type: Some(data_chunk::Type::Data(bytes)),
            })),
            ResultReply::Complete => Some(result_reply::Type::Result(DataChunk {
                r#type: Some(data_chunk::Type::DataComplete(true)),
            })),
            ResultReply::TaskFailed { task_id, message } => {
                Some(result_reply::Type::Error(TaskError { task_id, message }))
            }
            ResultReply::TaskIncomplete { task_id } => {
                Some(result_reply::Type::NotCompletedTask(task_id))
            }
            ResultReply::Undefined => None,
        };

        Self { r#type }
    }
}
