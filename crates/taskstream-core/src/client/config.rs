use crate::protocol::EmptyBatchPolicy;

/// Default number of submission messages buffered ahead of the transport.
///
/// With a single slot, the next message is produced only once the transport
/// has taken the previous one.
pub const DEFAULT_WRITE_BUFFER: usize = 1;

/// Client-side settings for a [`Submitter`](super::Submitter).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// Whether an empty batch is closed with an explicit marker.
    pub empty_batch: EmptyBatchPolicy,
    /// Capacity of the queue between the message producer and the request
    /// stream. Always at least 1.
    pub write_buffer: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            empty_batch: EmptyBatchPolicy::default(),
            write_buffer: DEFAULT_WRITE_BUFFER,
        }
    }
}

impl SubmitterConfig {
    #[must_use]
    pub const fn with_empty_batch(mut self, policy: EmptyBatchPolicy) -> Self {
        self.empty_batch = policy;
        self
    }

    /// Sets the producer queue capacity; zero is raised to one.
    #[must_use]
    pub const fn with_write_buffer(mut self, messages: usize) -> Self {
        self.write_buffer = if messages == 0 { 1 } else { messages };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffer_is_never_zero() {
        assert_eq!(SubmitterConfig::default().with_write_buffer(0).write_buffer, 1);
        assert_eq!(SubmitterConfig::default().with_write_buffer(16).write_buffer, 16);
    }

    #[test]
    fn empty_batches_omit_the_marker_by_default() {
        assert_eq!(SubmitterConfig::default().empty_batch, EmptyBatchPolicy::Omit);
    }
}
