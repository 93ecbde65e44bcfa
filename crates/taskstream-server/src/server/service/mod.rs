//! gRPC service implementation.
//!
//! - [`handler`] - gRPC service entry point (`SubmitterService`).

pub mod handler;
