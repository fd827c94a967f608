use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use chrono::{DateTime, Utc};
use futures_core::Stream;

use tally_core::{LedgerError, TopicId, TopicMessage};

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

/// Build a no-op waker for synchronously driving streams in tests.
pub fn noop_waker() -> Waker {
    Arc::new(NoopWake).into()
}

/// Observes a [`ScriptedStream`] after it has been handed away.
#[derive(Clone, Default)]
pub struct TeardownProbe {
    dropped: Arc<AtomicBool>,
    polled: Arc<AtomicUsize>,
}

impl TeardownProbe {
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Number of items handed out, pending polls included.
    pub fn polled(&self) -> usize {
        self.polled.load(Ordering::SeqCst)
    }
}

/// A generic stream backed by a scripted sequence of poll results.
///
/// Each call to `poll_next` pops the front item from the internal queue.
/// When the queue is empty, returns `Ready(None)`. A scripted `Pending`
/// doesn't register the waker, so the stream stays silent until something
/// else wakes the task.
pub struct ScriptedStream<T> {
    items: VecDeque<Poll<Option<T>>>,
    probe: TeardownProbe,
}

impl<T> ScriptedStream<T> {
    pub fn new(items: Vec<Poll<Option<T>>>) -> Self {
        Self {
            items: VecDeque::from(items),
            probe: TeardownProbe::default(),
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![])
    }

    pub fn probe(&self) -> TeardownProbe {
        self.probe.clone()
    }
}

// Safety: ScriptedStream only contains a VecDeque (heap-allocated) and
// shared counters, so it is always safe to move even after pinning.
impl<T> Unpin for ScriptedStream<T> {}

impl<T> Stream for ScriptedStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.items.pop_front() {
            Some(item) => {
                self.probe.polled.fetch_add(1, Ordering::SeqCst);
                item
            }
            None => Poll::Ready(None),
        }
    }
}

impl<T> Drop for ScriptedStream<T> {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}

/// A topic message with the given sequence number and text, for scripting
/// subscriptions.
pub fn topic_message(topic: TopicId, seq: u64, text: &str) -> TopicMessage {
    TopicMessage {
        topic,
        sequence_number: seq,
        consensus_at: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(seq as i64),
        contents: text.as_bytes().to_vec(),
    }
}

/// A scripted subscription emitting the given texts in order, then ending.
pub fn scripted_topic(
    topic: TopicId,
    texts: &[&str],
) -> ScriptedStream<Result<TopicMessage, LedgerError>> {
    let items = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Poll::Ready(Some(Ok(topic_message(topic, i as u64 + 1, text)))))
        .collect();

    ScriptedStream::new(items)
}
