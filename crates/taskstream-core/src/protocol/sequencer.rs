use super::chunker::Chunks;
use crate::{ChunkLimit, ProtocolMessage, SubmissionOptions, WorkItem};
use core::iter::FusedIterator;

/// What to send after [`ProtocolMessage::SessionInit`] when a batch holds no
/// items.
///
/// The closing marker is always sent after a non-empty batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyBatchPolicy {
    /// Send only the session message.
    #[default]
    Omit,
    /// Send the session message followed by [`ProtocolMessage::BatchClose`].
    Close,
}

/// Lays out a batch of work items as one linear submission stream.
///
/// The stream is, in order:
///
/// 1. [`ProtocolMessage::SessionInit`], even when `items` is empty.
/// 2. For each item, a [`ProtocolMessage::ItemHeader`] followed by its payload
///    as produced by [`chunk`](super::chunker::chunk).
/// 3. A single [`ProtocolMessage::BatchClose`] after the last item's
///    [`ProtocolMessage::PayloadComplete`] (see [`EmptyBatchPolicy`] for empty
///    batches).
///
/// `items` is consumed lazily: the next item is pulled only once the current
/// item's payload has been fully emitted, so at most one item is held at a
/// time.
pub fn sequence<I>(
    items: I,
    session: impl Into<String>,
    options: Option<SubmissionOptions>,
    limit: ChunkLimit,
    empty_batch: EmptyBatchPolicy,
) -> Sequence<I::IntoIter>
where
    I: IntoIterator<Item = WorkItem>,
{
    Sequence {
        items: items.into_iter(),
        limit,
        empty_batch,
        state: SequenceState::Init {
            session: session.into(),
            options,
        },
    }
}

#[derive(Debug)]
enum SequenceState {
    Init {
        session: String,
        options: Option<SubmissionOptions>,
    },
    Header(WorkItem),
    Payload(Chunks),
    Close,
    Done,
}

/// Iterator returned by [`sequence`].
#[derive(Debug)]
pub struct Sequence<I> {
    items: I,
    limit: ChunkLimit,
    empty_batch: EmptyBatchPolicy,
    state: SequenceState,
}

impl<I> Sequence<I>
where
    I: Iterator<Item = WorkItem>,
{
    /// State following the end of an item, or of the session message when
    /// `first` is set.
    fn advance(&mut self, first: bool) -> SequenceState {
        match self.items.next() {
            Some(item) => SequenceState::Header(item),
            None if first && self.empty_batch == EmptyBatchPolicy::Omit => SequenceState::Done,
            None => SequenceState::Close,
        }
    }
}

impl<I> Iterator for Sequence<I>
where
    I: Iterator<Item = WorkItem>,
{
    type Item = ProtocolMessage;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match core::mem::replace(&mut self.state, SequenceState::Done) {
                SequenceState::Init { session, options } => {
                    self.state = self.advance(true);
                    return Some(ProtocolMessage::SessionInit { session, options });
                }
                SequenceState::Header(item) => {
                    let WorkItem {
                        id,
                        payload,
                        data_dependencies,
                        expected_output_keys,
                    } = item;
                    self.state = SequenceState::Payload(Chunks::new(payload, self.limit));
                    return Some(ProtocolMessage::ItemHeader {
                        id,
                        data_dependencies,
                        expected_output_keys,
                    });
                }
                SequenceState::Payload(mut chunks) => {
                    if let Some(message) = chunks.next() {
                        self.state = SequenceState::Payload(chunks);
                        return Some(message);
                    }
                    self.state = self.advance(false);
                }
                SequenceState::Close => return Some(ProtocolMessage::BatchClose),
                SequenceState::Done => return None,
            }
        }
    }
}

impl<I> FusedIterator for Sequence<I> where I: Iterator<Item = WorkItem> {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::cell::Cell;
    use std::rc::Rc;

    fn limit(bytes: usize) -> ChunkLimit {
        ChunkLimit::try_from(bytes).unwrap()
    }

    fn item(id: &str, payload: &'static [u8]) -> WorkItem {
        WorkItem::new(id, Bytes::from_static(payload)).with_expected_output_keys([id])
    }

    /// Compact label for each message so orderings read like the wire.
    fn labels(messages: impl IntoIterator<Item = ProtocolMessage>) -> Vec<String> {
        messages
            .into_iter()
            .map(|message| match message {
                ProtocolMessage::SessionInit { session, .. } => format!("init:{session}"),
                ProtocolMessage::ItemHeader { id, .. } => format!("header:{id}"),
                ProtocolMessage::PayloadFragment { bytes } => {
                    format!("frag:{}", String::from_utf8_lossy(&bytes))
                }
                ProtocolMessage::PayloadComplete => "complete".to_string(),
                ProtocolMessage::BatchClose => "close".to_string(),
            })
            .collect()
    }

    #[test]
    fn three_items_are_framed_in_order() {
        let items = vec![item("t1", b"abc"), item("t2", b""), item("t3", b"defgh")];
        let messages = sequence(items, "s", None, limit(2), EmptyBatchPolicy::Omit);

        assert_eq!(
            labels(messages),
            vec![
                "init:s", "header:t1", "frag:ab", "frag:c", "complete", "header:t2", "frag:",
                "complete", "header:t3", "frag:de", "frag:fg", "frag:h", "complete", "close",
            ]
        );
    }

    #[test]
    fn single_item_ends_with_one_close_marker() {
        let messages: Vec<_> =
            sequence([item("t1", b"x")], "s", None, limit(8), EmptyBatchPolicy::Omit).collect();

        let closes = messages
            .iter()
            .filter(|message| **message == ProtocolMessage::BatchClose)
            .count();
        assert_eq!(closes, 1);
        assert_eq!(
            &messages[messages.len() - 2..],
            &[ProtocolMessage::PayloadComplete, ProtocolMessage::BatchClose]
        );
    }

    #[test]
    fn headers_carry_item_metadata() {
        let work = WorkItem::new("t1", Bytes::from_static(b"x"))
            .with_data_dependencies(["d1", "d2"])
            .with_expected_output_keys(["o1"]);
        let mut messages = sequence([work], "s", None, limit(8), EmptyBatchPolicy::Omit).skip(1);

        assert_eq!(
            messages.next(),
            Some(ProtocolMessage::ItemHeader {
                id: "t1".to_string(),
                data_dependencies: vec!["d1".to_string(), "d2".to_string()],
                expected_output_keys: vec!["o1".to_string()],
            })
        );
    }

    #[test]
    fn session_options_are_sent_once() {
        let options = SubmissionOptions {
            max_retries: 3,
            ..SubmissionOptions::default()
        };
        let items = [item("t1", b"a"), item("t2", b"b")];
        let messages: Vec<_> = sequence(
            items,
            "s",
            Some(options.clone()),
            limit(8),
            EmptyBatchPolicy::Omit,
        )
        .collect();

        assert_eq!(
            messages[0],
            ProtocolMessage::SessionInit {
                session: "s".to_string(),
                options: Some(options),
            }
        );
        assert_eq!(
            messages
                .iter()
                .filter(|message| matches!(message, ProtocolMessage::SessionInit { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn empty_batch_follows_policy() {
        let omitted = sequence(Vec::<WorkItem>::new(), "s", None, limit(8), EmptyBatchPolicy::Omit);
        assert_eq!(labels(omitted), vec!["init:s"]);

        let closed = sequence(Vec::<WorkItem>::new(), "s", None, limit(8), EmptyBatchPolicy::Close);
        assert_eq!(labels(closed), vec!["init:s", "close"]);
    }

    #[test]
    fn every_header_is_followed_by_its_own_payload() {
        let items = (0..5).map(|i| {
            WorkItem::new(format!("t{i}"), vec![b'a' + i as u8; i * 3])
                .with_expected_output_keys([format!("o{i}")])
        });
        let messages: Vec<_> = sequence(items, "s", None, limit(4), EmptyBatchPolicy::Omit).collect();

        let mut headers = 0;
        let mut current: Option<(u8, Vec<u8>)> = None;
        for message in messages {
            match message {
                ProtocolMessage::ItemHeader { id, .. } => {
                    assert!(current.is_none(), "header before previous payload completed");
                    let index: u8 = id[1..].parse().unwrap();
                    current = Some((index, Vec::new()));
                    headers += 1;
                }
                ProtocolMessage::PayloadFragment { bytes } => {
                    current.as_mut().unwrap().1.extend_from_slice(&bytes);
                }
                ProtocolMessage::PayloadComplete => {
                    let (index, payload) = current.take().unwrap();
                    assert_eq!(payload, vec![b'a' + index; usize::from(index) * 3]);
                }
                ProtocolMessage::SessionInit { .. } | ProtocolMessage::BatchClose => {}
            }
        }
        assert_eq!(headers, 5);
    }

    #[test]
    fn items_are_pulled_one_at_a_time() {
        let pulled = Rc::new(Cell::new(0_usize));
        let counter = Rc::clone(&pulled);
        let items = (0..3).map(move |i| {
            counter.set(counter.get() + 1);
            item(["t0", "t1", "t2"][i], b"abcd")
        });
        let mut messages = sequence(items, "s", None, limit(2), EmptyBatchPolicy::Omit);

        messages.next(); // init
        assert_eq!(pulled.get(), 1);
        messages.next(); // header t0
        messages.next(); // frag
        messages.next(); // frag
        messages.next(); // complete
        assert_eq!(pulled.get(), 1);
        messages.next(); // header t1
        assert_eq!(pulled.get(), 2);

        messages.by_ref().for_each(drop);
        assert_eq!(pulled.get(), 3);
        assert_eq!(messages.next(), None);
    }
}
