//! Client side of the submission and result protocols.
//!
//! - [`config`] - tunables for a [`Submitter`].
//! - [`submitter`] - the gRPC client driving submissions and result fetches.

pub mod config;
pub mod submitter;

pub use config::SubmitterConfig;
pub use submitter::Submitter;
