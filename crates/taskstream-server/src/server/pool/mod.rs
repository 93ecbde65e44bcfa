//! Worker pool for executing accepted tasks.
//!
//! - [`manager`] - Routing, stream tracking and shutdown.
//! - [`worker`] - The worker event loop.

pub mod manager;
pub mod worker;
