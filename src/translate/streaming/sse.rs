//! Anthropic SSE framing and the channel-backed writer for streamed replies.

use std::convert::Infallible;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::translate::anthropic_types::{Delta, StreamEvent};

/// One SSE event: an `event:` name and a JSON `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn from_stream_event(event: &StreamEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.event_name().to_string(),
            data: serde_json::to_string(event)?,
        })
    }

    /// Encode an event, re-escaping a tool-argument fragment once if the
    /// first attempt fails. Returns `None` when the event has to be dropped.
    pub fn encode(event: &StreamEvent) -> Option<Self> {
        let err = match Self::from_stream_event(event) {
            Ok(sse) => return Some(sse),
            Err(e) => e,
        };

        let StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta { partial_json },
        } = event
        else {
            tracing::warn!(event = event.event_name(), error = %err, "Dropping unserializable event");
            return None;
        };

        let retry = StreamEvent::ContentBlockDelta {
            index: *index,
            delta: Delta::InputJsonDelta {
                partial_json: sanitize_partial_json(partial_json),
            },
        };
        match Self::from_stream_event(&retry) {
            Ok(sse) => Some(sse),
            Err(e) => {
                tracing::warn!(index, error = %e, "Dropping tool argument delta");
                None
            }
        }
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Strip control bytes and escape backslashes and quotes.
pub fn sanitize_partial_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Writes Anthropic events into the response body channel.
///
/// Once the client has gone away every write is a no-op and the call's
/// cancellation token is triggered so the upstream read stops too.
pub struct SseWriter {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    cancel: CancellationToken,
    closed: bool,
}

impl SseWriter {
    pub fn new(tx: mpsc::Sender<Result<Bytes, Infallible>>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send(&mut self, event: &StreamEvent) {
        if self.closed {
            return;
        }
        let Some(sse) = SseEvent::encode(event) else {
            return;
        };
        if self.tx.send(Ok(Bytes::from(sse.to_frame()))).await.is_err() {
            tracing::debug!("Client went away, dropping remaining events");
            self.closed = true;
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::StreamEvent;

    #[test]
    fn test_frame_format() {
        let sse = SseEvent::from_stream_event(&StreamEvent::ContentBlockStop { index: 2 }).unwrap();
        assert_eq!(
            sse.to_frame(),
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":2}\n\n"
        );
    }

    #[test]
    fn test_control_characters_stay_escaped() {
        let event = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::InputJsonDelta {
                partial_json: "{\"a\":\"\u{1}\n\"}".to_string(),
            },
        };
        let sse = SseEvent::encode(&event).unwrap();
        assert!(!sse.data.contains('\n'));
        let back: serde_json::Value = serde_json::from_str(&sse.data).unwrap();
        assert_eq!(back["delta"]["partial_json"], "{\"a\":\"\u{1}\n\"}");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_partial_json("a\"b\\c\u{0}\td"), "a\\\"b\\\\cd");
    }

    #[tokio::test]
    async fn test_writer_closes_and_cancels() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut writer = SseWriter::new(tx, cancel.clone());

        writer.send(&StreamEvent::Ping).await;
        let frame = rx.recv().await.unwrap().unwrap();
        assert!(frame.starts_with(b"event: ping\n"));

        drop(rx);
        writer.send(&StreamEvent::MessageStop).await;
        assert!(writer.is_closed());
        assert!(cancel.is_cancelled());

        // Further writes are silent no-ops.
        writer.send(&StreamEvent::MessageStop).await;
    }
}
