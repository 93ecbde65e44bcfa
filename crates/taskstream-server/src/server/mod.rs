//! Server-side components of the `taskstream` loopback service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI and environment configuration.
//! - [`pool`] - Round-robin worker pool executing accepted tasks.
//! - [`service`] - The `Submitter` gRPC service implementation.
//! - [`store`] - Per-session task and result bookkeeping.
//! - [`streaming`] - Submission reassembly and result streaming.
//! - [`telemetry`] - Tracing and metrics initialization (optional).

pub mod config;
pub mod pool;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
