//! Change-feed transport.
//!
//! A feed delivers one event per committed mutation of a subscriber's
//! ledger. The client never applies the change itself: any event means
//! "refetch", so a `Resync` and a `Changed` are handled the same way.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use creditgate_core::{BalanceChange, SubscriberId};

use crate::client::CreditGateClient;
use crate::error::ClientError;

/// One event from a change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A mutation committed.
    Changed(BalanceChange),
    /// Changes may have been missed; refetch.
    Resync,
}

/// A live feed connection. Ends when the connection closes.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedEvent, ClientError>> + Send>>;

/// Opens per-subscriber change feeds.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Connect to `subscriber_id`'s feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, subscriber_id: &SubscriberId) -> Result<FeedStream, ClientError>;
}

/// Change feed over the service's server-sent event stream.
#[derive(Debug, Clone)]
pub struct SseChangeFeed {
    client: CreditGateClient,
}

impl SseChangeFeed {
    /// Create a feed using `client`'s credentials.
    #[must_use]
    pub fn new(client: CreditGateClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChangeFeed for SseChangeFeed {
    async fn connect(&self, subscriber_id: &SubscriberId) -> Result<FeedStream, ClientError> {
        let response = self.client.open_balance_stream(subscriber_id).await?;
        tracing::debug!(subscriber_id = %subscriber_id, "Change feed connected");

        let events = futures::stream::unfold(
            (response.bytes_stream(), SseBuffer::default()),
            |(mut bytes, mut buffer)| async move {
                loop {
                    if let Some(frame) = buffer.next_frame() {
                        if let Some(event) = frame.into_event() {
                            return Some((Ok(event), (bytes, buffer)));
                        }
                        continue;
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => buffer.push(&chunk),
                        Some(Err(e)) => return Some((Err(ClientError::Http(e)), (bytes, buffer))),
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }
}

/// Accumulates stream bytes and splits them into SSE frames.
#[derive(Debug, Default)]
struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    fn next_frame(&mut self) -> Option<SseFrame> {
        let (end, separator) = find_frame_end(&self.bytes)?;
        let raw: Vec<u8> = self.bytes.drain(..end + separator).collect();
        Some(SseFrame::parse(&String::from_utf8_lossy(&raw[..end])))
    }
}

/// Position and length of the first blank-line separator.
fn find_frame_end(bytes: &[u8]) -> Option<(usize, usize)> {
    let lf = bytes.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SseFrame {
    event: Option<String>,
    data: String,
}

impl SseFrame {
    fn parse(text: &str) -> Self {
        let mut frame = Self::default();
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                frame.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                if !frame.data.is_empty() {
                    frame.data.push('\n');
                }
                frame.data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
            // Comments (":") and unknown fields are ignored.
        }
        frame
    }

    /// Comments and keep-alives carry no event.
    fn into_event(self) -> Option<FeedEvent> {
        match self.event.as_deref() {
            Some("balance_changed") => match serde_json::from_str(&self.data) {
                Ok(change) => Some(FeedEvent::Changed(change)),
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable balance change, resyncing");
                    Some(FeedEvent::Resync)
                }
            },
            Some("resync") => Some(FeedEvent::Resync),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditgate_core::ChangeKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn change_json(id: &SubscriberId, purchased: i64) -> String {
        json!({
            "subscriber_id": id.to_string(),
            "kind": "deduct",
            "purchased_balance": purchased
        })
        .to_string()
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut buffer = SseBuffer::default();
        buffer.push(b"event: resy");
        assert_eq!(buffer.next_frame(), None);

        buffer.push(b"nc\ndata: lagged\n\n: keep-alive\n\n");
        assert_eq!(
            buffer.next_frame(),
            Some(SseFrame {
                event: Some("resync".into()),
                data: "lagged".into()
            })
        );
        assert_eq!(buffer.next_frame().and_then(SseFrame::into_event), None);
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn crlf_separated_frames() {
        let mut buffer = SseBuffer::default();
        buffer.push(b"event: resync\r\ndata: x\r\n\r\n");
        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.into_event(), Some(FeedEvent::Resync));
    }

    #[test]
    fn balance_changed_frame_decodes() {
        let id = SubscriberId::generate();
        let frame = SseFrame::parse(&format!(
            "event: balance_changed\ndata: {}",
            change_json(&id, 100)
        ));

        match frame.into_event() {
            Some(FeedEvent::Changed(change)) => {
                assert_eq!(change.subscriber_id, id);
                assert_eq!(change.kind, ChangeKind::Deduct);
                assert_eq!(change.purchased_balance, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn garbled_change_becomes_resync() {
        let frame = SseFrame::parse("event: balance_changed\ndata: {not json");
        assert_eq!(frame.into_event(), Some(FeedEvent::Resync));
    }

    #[tokio::test]
    async fn sse_feed_yields_events_until_stream_ends() {
        let server = MockServer::start().await;
        let id = SubscriberId::generate();
        let body = format!(
            ": keep-alive\n\nevent: balance_changed\ndata: {}\n\nevent: resync\ndata: lagged\n\n",
            change_json(&id, 250)
        );
        Mock::given(method("GET"))
            .and(path("/v1/balance/stream"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let feed = SseChangeFeed::new(client);
        let events: Vec<_> = feed.connect(&id).await.unwrap().collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(FeedEvent::Changed(c)) if c.purchased_balance == 250));
        assert!(matches!(&events[1], Ok(FeedEvent::Resync)));
    }

    #[tokio::test]
    async fn sse_feed_connect_fails_for_unknown_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "account_not_found", "message": "account not found", "class": "internal" }
            })))
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let result = SseChangeFeed::new(client)
            .connect(&SubscriberId::generate())
            .await;
        assert!(matches!(result, Err(ClientError::AccountNotFound)));
    }
}
