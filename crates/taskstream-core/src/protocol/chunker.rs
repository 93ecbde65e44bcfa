use crate::{ChunkLimit, ProtocolMessage};
use bytes::Bytes;
use core::iter::FusedIterator;

/// Splits `payload` into fragments of at most `limit` bytes, followed by a
/// single [`ProtocolMessage::PayloadComplete`].
///
/// An empty payload still produces one (empty) fragment, so the receiver
/// always sees at least one fragment per item. Fragments are zero-copy views
/// into `payload`.
///
/// The returned iterator is lazy and single-pass: chunking the same payload
/// again requires another call.
pub fn chunk(payload: Bytes, limit: ChunkLimit) -> Chunks {
    Chunks::new(payload, limit)
}

/// Number of fragments [`chunk`] emits for a payload of `len` bytes.
pub const fn fragment_count(len: usize, limit: ChunkLimit) -> usize {
    if len == 0 { 1 } else { len.div_ceil(limit.get()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    EmptyFragment,
    Fragments,
    Complete,
    Exhausted,
}

/// Iterator returned by [`chunk`].
#[derive(Debug)]
pub struct Chunks {
    remaining: Bytes,
    limit: ChunkLimit,
    state: ChunkState,
}

impl Chunks {
    pub fn new(payload: Bytes, limit: ChunkLimit) -> Self {
        let state = if payload.is_empty() {
            ChunkState::EmptyFragment
        } else {
            ChunkState::Fragments
        };

        Self {
            remaining: payload,
            limit,
            state,
        }
    }
}

impl Iterator for Chunks {
    type Item = ProtocolMessage;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ChunkState::EmptyFragment => {
                self.state = ChunkState::Complete;
                Some(ProtocolMessage::PayloadFragment {
                    bytes: Bytes::new(),
                })
            }
            ChunkState::Fragments => {
                let size = self.limit.get().min(self.remaining.len());
                let bytes = self.remaining.split_to(size);
                if self.remaining.is_empty() {
                    self.state = ChunkState::Complete;
                }
                Some(ProtocolMessage::PayloadFragment { bytes })
            }
            ChunkState::Complete => {
                self.state = ChunkState::Exhausted;
                Some(ProtocolMessage::PayloadComplete)
            }
            ChunkState::Exhausted => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = match self.state {
            ChunkState::EmptyFragment => 2,
            ChunkState::Fragments => fragment_count(self.remaining.len(), self.limit) + 1,
            ChunkState::Complete => 1,
            ChunkState::Exhausted => 0,
        };
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}

impl FusedIterator for Chunks {}
