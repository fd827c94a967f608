//! Bounded waits on topic subscriptions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{LedgerClient, LedgerError, TopicId, TopicMessage};

/// How a wait ended without a match. Every variant carries the messages
/// observed up to that point, in arrival order.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no matching message within {after:?} ({} seen)", .seen.len())]
    Timeout {
        after: Duration,
        seen: Vec<TopicMessage>,
    },

    #[error("subscription failed after {} messages: {source}", .seen.len())]
    Stream {
        source: LedgerError,
        seen: Vec<TopicMessage>,
    },

    #[error("subscription ended before a match ({} seen)", .seen.len())]
    Closed { seen: Vec<TopicMessage> },

    #[error("wait cancelled ({} seen)", .seen.len())]
    Cancelled { seen: Vec<TopicMessage> },
}

impl WatchError {
    pub fn seen(&self) -> &[TopicMessage] {
        match self {
            Self::Timeout { seen, .. } => seen,
            Self::Stream { seen, .. } => seen,
            Self::Closed { seen } => seen,
            Self::Cancelled { seen } => seen,
        }
    }
}

/// A successful wait: the first matching message and everything seen up
/// to and including it.
#[derive(Debug, Clone)]
pub struct Matched {
    pub message: TopicMessage,
    pub seen: Vec<TopicMessage>,
}

/// Drains `stream` until `predicate` matches, the deadline passes, the
/// stream fails or ends, or `cancel` fires, whichever happens first.
///
/// The stream is consumed; it's dropped before this returns, so nothing
/// arriving after the outcome is ever observed.
pub async fn watch_stream<S, P>(
    mut stream: S,
    mut predicate: P,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Matched, WatchError>
where
    S: Stream<Item = Result<TopicMessage, LedgerError>> + Unpin,
    P: FnMut(&TopicMessage) -> bool,
{
    let mut seen = Vec::new();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("wait cancelled");
                return Err(WatchError::Cancelled { seen });
            }

            _ = &mut deadline => {
                warn!(?timeout, seen = seen.len(), "no matching message before deadline");
                return Err(WatchError::Timeout { after: timeout, seen });
            }

            next = stream.next() => match next {
                Some(Ok(message)) => {
                    info!(
                        sequence = message.sequence_number,
                        contents = %message.contents_utf8(),
                        "topic message"
                    );

                    let hit = predicate(&message);
                    seen.push(message.clone());

                    if hit {
                        return Ok(Matched { message, seen });
                    }
                }
                Some(Err(source)) => {
                    warn!(%source, "subscription failed");
                    return Err(WatchError::Stream { source, seen });
                }
                None => return Err(WatchError::Closed { seen }),
            },
        }
    }
}

/// Waits for topic messages through a ledger client subscription.
pub struct SubscriptionWatcher<'a, C> {
    client: &'a C,
}

impl<'a, C: LedgerClient> SubscriptionWatcher<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub async fn wait_for<P>(
        &self,
        topic: &TopicId,
        since: DateTime<Utc>,
        predicate: P,
        timeout: Duration,
    ) -> Result<Matched, WatchError>
    where
        P: FnMut(&TopicMessage) -> bool,
    {
        let cancel = CancellationToken::new();

        self.wait_for_with_cancel(topic, since, predicate, timeout, &cancel)
            .await
    }

    #[instrument(skip_all, fields(topic = %topic, since = %since))]
    pub async fn wait_for_with_cancel<P>(
        &self,
        topic: &TopicId,
        since: DateTime<Utc>,
        predicate: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Matched, WatchError>
    where
        P: FnMut(&TopicMessage) -> bool,
    {
        let stream = self
            .client
            .subscribe(topic, since)
            .map_err(|source| WatchError::Stream {
                source,
                seen: vec![],
            })?;

        debug!("subscribed");

        watch_stream(stream, predicate, timeout, cancel).await
    }
}
