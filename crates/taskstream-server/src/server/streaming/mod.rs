//! Streaming logic on both sides of the service.
//!
//! - [`assembler`] - Validates an incoming submission stream and rebuilds the
//!   batch of work items it carries.
//! - [`coordinator`] - Streams a stored result back to the client in chunks.
//! - [`processor`] - Executes a single task inside a worker.
//! - [`request`] - Messages sent from the pool to its workers.

pub mod assembler;
pub mod coordinator;
pub mod processor;
pub mod request;
