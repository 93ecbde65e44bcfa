//! Framing of submissions and reassembly of results.
//!
//! These pieces are transport-agnostic: they turn work items into the ordered
//! message sequence written to a `CreateLargeTasks` stream, and turn the
//! replies of a `TryGetResultStream` call back into bytes.
//!
//! ## Structure
//!
//! - [`chunker`] - splits one payload into bounded fragments.
//! - [`sequencer`] - lays out a whole batch as one message stream.
//! - [`decoder`] - reassembles a streamed result and maps error replies.

pub mod chunker;
pub mod decoder;
pub mod sequencer;

pub use chunker::{Chunks, chunk, fragment_count};
pub use decoder::{DecoderState, ResultDecoder, decode};
pub use sequencer::{EmptyBatchPolicy, Sequence, sequence};
