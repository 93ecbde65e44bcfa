pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    AggregateReply, ChunkLimit, ProtocolMessage, ResultReply, SubmissionOptions, WorkItem,
};

/// Generated gRPC bindings for the `taskstream` package.
pub mod proto {
    tonic::include_proto!("taskstream");

    /// Encoded file descriptor set, registered with the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("taskstream_descriptor");
}
