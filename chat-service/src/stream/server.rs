//! Server side of the event protocol.
//!
//! An `EventSink` is created per request and owned by the handler task.
//! Events go out in emission order; once the sink is closed (terminal
//! event sent, consumer gone, or internal failure) every further emit is
//! a silent no-op.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::events::StreamEvent;

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_SECS: u64 = 15;

/// Outbound event stream for one request.
pub struct EventSink {
    tx: mpsc::Sender<String>,
    closed: AtomicBool,
}

impl EventSink {
    /// Open a sink and the receiver feeding the response body.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Serialize one event as a `data: <json>` frame and send it.
    ///
    /// A send failure means the consumer disconnected: the sink marks
    /// itself closed and swallows the failure. Never panics, never errors.
    pub async fn emit(&self, event: &StreamEvent) {
        if self.is_closed() {
            return;
        }

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize stream event: {}", e);
                return;
            }
        };

        if self.tx.send(payload).await.is_err() {
            tracing::debug!("stream consumer gone, closing sink");
            self.closed.store(true, Ordering::Release);
        }
    }

    /// Mark the sink closed. Idempotent; emits after this are no-ops.
    pub fn close(&self) {
        self.closed.swap(true, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Wrap the sink's receiver as an SSE response.
///
/// Each payload becomes one `data: <json>\n\n` frame; keep-alive comments
/// cover idle gaps between events.
pub fn sse_response(
    rx: mpsc::Receiver<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|payload| Ok(Event::default().data(payload)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{FinalTokensEvent, StreamEvent};

    fn token_event(delta: &str) -> StreamEvent {
        StreamEvent::FinalTokens(FinalTokensEvent {
            delta: delta.to_string(),
            done: false,
        })
    }

    #[tokio::test]
    async fn emits_events_in_order() {
        let (sink, mut rx) = EventSink::channel(8);

        sink.emit(&token_event("a")).await;
        sink.emit(&token_event("b")).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.contains(r#""delta":"a""#));
        assert!(second.contains(r#""delta":"b""#));
    }

    #[tokio::test]
    async fn emit_after_close_is_a_silent_no_op() {
        let (sink, mut rx) = EventSink::channel(8);

        sink.emit(&token_event("a")).await;
        sink.close();
        sink.emit(&token_event("b")).await;
        drop(sink);

        assert!(rx.recv().await.unwrap().contains(r#""delta":"a""#));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (sink, _rx) = EventSink::channel(8);
        sink.close();
        sink.close();
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn consumer_disconnect_marks_closed() {
        let (sink, rx) = EventSink::channel(8);
        drop(rx);

        sink.emit(&token_event("a")).await;
        assert!(sink.is_closed());

        // still a no-op, not a panic
        sink.emit(&token_event("b")).await;
    }
}
