//! The boundary to the external watch layer.
//!
//! The controller consumes a [`ChangeFeed`]: an ordered stream of quota
//! notifications interleaved with a single [`FeedEvent::Synced`] marker once
//! the watch layer's cache has converged. How the feed is filled (a real
//! informer, a test harness, JSON lines on stdin) is not the controller's
//! concern.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::types::QuotaSnapshot;

use super::events::{FeedEvent, Notification, UnknownVerb, Verb};

/// A source of quota change notifications.
pub trait ChangeFeed: Send {
    /// Waits for the next event. `None` means the feed is closed for good.
    fn next(&mut self) -> impl Future<Output = Option<FeedEvent>> + Send;
}

/// Errors that can occur when sending into or decoding for a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The receiving controller has gone away.
    #[error("change feed closed")]
    Closed,

    /// The line was not valid JSON or did not match the wire format.
    #[error("invalid feed line: {0}")]
    Json(#[from] serde_json::Error),

    /// The notification named a verb other than Add, Update or Delete.
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] UnknownVerb),

    #[error("failed to read feed input: {0}")]
    Io(String),

    /// A notification line without a quota object.
    #[error("notification of kind {0} carries no quota")]
    MissingQuota(Verb),
}

/// Creates a bounded channel-backed feed.
pub fn channel_feed(capacity: usize) -> (FeedSender, ChannelFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSender { tx }, ChannelFeed { rx })
}

/// Receiving half of a channel-backed feed.
#[derive(Debug)]
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedEvent>,
}

impl ChangeFeed for ChannelFeed {
    async fn next(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}

/// Sending half of a channel-backed feed.
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedEvent>,
}

impl FeedSender {
    pub async fn send(&self, notification: Notification) -> Result<(), FeedError> {
        self.send_event(FeedEvent::Notification(notification)).await
    }

    /// Signals that the initial listing is complete.
    pub async fn mark_synced(&self) -> Result<(), FeedError> {
        self.send_event(FeedEvent::Synced).await
    }

    pub async fn send_event(&self, event: FeedEvent) -> Result<(), FeedError> {
        self.tx.send(event).await.map_err(|_| FeedError::Closed)
    }
}

/// One line of the JSON-lines wire format.
///
/// ```text
/// {"kind":"Add","quota":{"name":"team-a100","namespace":"ml","hard":{"limits.cpu":"4"}}}
/// {"kind":"Synced"}
/// ```
#[derive(Debug, Deserialize)]
struct WireLine {
    kind: String,
    #[serde(default)]
    quota: Option<QuotaSnapshot>,
}

/// Decodes one JSON line into a feed event.
pub fn decode_line(line: &str) -> Result<FeedEvent, FeedError> {
    let wire: WireLine = serde_json::from_str(line)?;
    if wire.kind == "Synced" {
        return Ok(FeedEvent::Synced);
    }
    let kind: Verb = wire.kind.parse()?;
    let quota = wire.quota.ok_or(FeedError::MissingQuota(kind))?;
    Ok(FeedEvent::Notification(Notification { kind, quota }))
}

/// Feeds JSON lines from `reader` into `sender` until end of input.
///
/// Blank lines are skipped. Lines that fail to decode are logged and skipped.
/// If the input never carried a sync marker, one is sent at end of input:
/// everything there is to list has been listed. Returns the number of
/// notifications forwarded.
pub async fn forward_lines<R>(reader: R, sender: &FeedSender) -> Result<usize, FeedError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    let mut synced = false;

    while let Some(line) = lines.next_line().await.map_err(|e| FeedError::Io(e.to_string()))? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_line(line) {
            Ok(FeedEvent::Synced) => {
                synced = true;
                sender.mark_synced().await?;
            }
            Ok(event) => {
                forwarded += 1;
                sender.send_event(event).await?;
            }
            Err(e) => error!(error = %e, line, "Skipping undecodable feed line"),
        }
    }

    if !synced {
        debug!("Input ended without a sync marker, marking synced");
        sender.mark_synced().await?;
    }
    info!(forwarded, "Feed input exhausted");
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quantity;

    #[tokio::test]
    async fn channel_feed_preserves_order() {
        let (tx, mut feed) = channel_feed(4);
        let quota = QuotaSnapshot::new("q-a100", "ns");

        tx.send(Notification::added(quota.clone())).await.unwrap();
        tx.mark_synced().await.unwrap();
        tx.send(Notification::deleted(quota.clone())).await.unwrap();
        drop(tx);

        assert_eq!(
            feed.next().await,
            Some(FeedEvent::Notification(Notification::added(quota.clone())))
        );
        assert_eq!(feed.next().await, Some(FeedEvent::Synced));
        assert_eq!(
            feed.next().await,
            Some(FeedEvent::Notification(Notification::deleted(quota)))
        );
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_fails() {
        let (tx, feed) = channel_feed(1);
        drop(feed);
        assert!(matches!(tx.mark_synced().await, Err(FeedError::Closed)));
    }

    #[test]
    fn decodes_notification_line() {
        let event = decode_line(
            r#"{"kind":"Update","quota":{"name":"q-3090","namespace":"ns","hard":{"limits.cpu":"4"}}}"#,
        )
        .unwrap();
        match event {
            FeedEvent::Notification(n) => {
                assert_eq!(n.kind, Verb::Update);
                assert_eq!(n.quota.hard_limit("limits.cpu"), Quantity::parse("4").unwrap());
            }
            FeedEvent::Synced => panic!("expected notification"),
        }
    }

    #[test]
    fn decodes_synced_marker() {
        assert_eq!(decode_line(r#"{"kind":"Synced"}"#).unwrap(), FeedEvent::Synced);
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = decode_line(r#"{"kind":"Patch","quota":{"name":"q","namespace":"n"}}"#)
            .unwrap_err();
        assert!(matches!(err, FeedError::MalformedRequest(UnknownVerb(ref v)) if v == "Patch"));
    }

    #[test]
    fn missing_quota_is_rejected() {
        assert!(matches!(
            decode_line(r#"{"kind":"Add"}"#),
            Err(FeedError::MissingQuota(Verb::Add))
        ));
    }

    #[tokio::test]
    async fn forward_lines_skips_bad_lines_and_marks_synced_at_eof() {
        let input = concat!(
            r#"{"kind":"Add","quota":{"name":"q-a100","namespace":"ns"}}"#,
            "\n\n",
            "garbage\n",
            r#"{"kind":"Patch","quota":{"name":"q-a100","namespace":"ns"}}"#,
            "\n",
            r#"{"kind":"Delete","quota":{"name":"q-a100","namespace":"ns"}}"#,
            "\n",
        );
        let (tx, mut feed) = channel_feed(8);

        let forwarded = forward_lines(input.as_bytes(), &tx).await.unwrap();
        assert_eq!(forwarded, 2);
        drop(tx);

        let quota = QuotaSnapshot::new("q-a100", "ns");
        assert_eq!(
            feed.next().await,
            Some(FeedEvent::Notification(Notification::added(quota.clone())))
        );
        assert_eq!(
            feed.next().await,
            Some(FeedEvent::Notification(Notification::deleted(quota)))
        );
        assert_eq!(feed.next().await, Some(FeedEvent::Synced));
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn forward_lines_does_not_repeat_sync_marker() {
        let (tx, mut feed) = channel_feed(8);
        forward_lines("{\"kind\":\"Synced\"}\n".as_bytes(), &tx).await.unwrap();
        drop(tx);

        assert_eq!(feed.next().await, Some(FeedEvent::Synced));
        assert_eq!(feed.next().await, None);
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(decode_line("not json"), Err(FeedError::Json(_))));
    }
}
