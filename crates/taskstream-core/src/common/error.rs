//! Error types for chunked submission and result streaming.
//!
//! This module defines the central `Error` enum shared by the client and the
//! reference server. Every failure surfaces to the immediate caller as its own
//! variant; nothing is retried internally. `From<Error>` for `tonic::Status`
//! lets the server propagate errors to clients with matching status codes,
//! and `From<Status>` turns a status received by the client back into an
//! `Error`.
//!
//! ## Error Cases
//! - `InvalidChunkLimit`: The configured chunk size is zero or negative.
//! - `ConfigUnavailable`: The service configuration could not be fetched
//!   before submission began.
//! - `OperationCancelled`: The caller cancelled the operation.
//! - `TaskFailed`: The server reported that a task failed.
//! - `TaskIncomplete`: A result was requested before its task completed.
//! - `ProtocolViolation`: An unexpected or undefined wire variant was seen.
//! - `Transport`: A gRPC status was returned once the call was under way.
//! - `ChannelError`: An internal channel between tasks closed.
//! - `InvalidRequest`: A request was well formed but exceeded a limit.
//! - `ServiceShutdown`: A request arrived while the service was shutting
//!   down.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for submission and result retrieval.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The chunk size limit is not a positive integer.
    #[error("Invalid chunk limit: {value}")]
    InvalidChunkLimit { value: i64 },

    /// The service configuration could not be retrieved.
    #[error("Service configuration unavailable: {reason}")]
    ConfigUnavailable { reason: String },

    /// The caller aborted the operation.
    #[error("Operation cancelled")]
    OperationCancelled,

    /// The task producing the requested result failed.
    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    /// The task producing the requested result has not completed yet.
    #[error("Task {task_id} not completed")]
    TaskIncomplete { task_id: String },

    /// The peer sent a message that the protocol does not allow at this
    /// point, or a variant that is not defined at all.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// The call failed with a gRPC status.
    #[error("Transport error ({code:?}): {message}")]
    Transport { code: Code, message: String },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request was rejected because it exceeded a limit.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Shorthand for [`Error::ProtocolViolation`].
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidChunkLimit { value } => {
                Status::failed_precondition(format!("Invalid chunk limit: {value}"))
            }
            Error::ConfigUnavailable { reason } => Status::unavailable(reason),
            Error::OperationCancelled => Status::cancelled("Operation was cancelled"),
            Error::TaskFailed { task_id, message } => {
                Status::aborted(format!("Task {task_id} failed: {message}"))
            }
            Error::TaskIncomplete { task_id } => {
                Status::failed_precondition(format!("Task {task_id} not completed"))
            }
            Error::ProtocolViolation { reason } => Status::invalid_argument(reason),
            Error::Transport { code, message } => Status::new(code, message),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => Self::OperationCancelled,
            code => Self::Transport {
                code,
                message: status.message().to_string(),
            },
        }
    }
}
