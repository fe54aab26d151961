//! Server-sent-event streaming for subscribers.

use nestdb_core::ChangeEvent;
use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Response head opening an event stream.
const STREAM_HEAD: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
Access-Control-Allow-Origin: *\r\n\
\r\n";

/// Comment line sent to keep an idle connection open.
const KEEPALIVE_COMMENT: &str = ": keepalive\n\n";

/// Formats one change event in SSE framing.
pub fn format_event(event: &ChangeEvent) -> String {
    format!(
        "event: {}\ndata: {}\nid: {}\n\n",
        event.kind.as_str(),
        event.path,
        event.at_millis
    )
}

/// Streams events to the subscriber until the client disconnects.
///
/// Blocks on the receiver with the keepalive interval as the timeout,
/// writing a comment on every silent interval. A failed write means the
/// client went away; returning drops the receiver, which unsubscribes it
/// from the event bus on the next publish.
pub fn serve(mut stream: TcpStream, rx: Receiver<ChangeEvent>, keepalive: Duration) {
    if stream.write_all(STREAM_HEAD.as_bytes()).is_err() || stream.flush().is_err() {
        return;
    }
    loop {
        let frame = match rx.recv_timeout(keepalive) {
            Ok(event) => format_event(&event),
            Err(RecvTimeoutError::Timeout) => KEEPALIVE_COMMENT.to_string(),
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if stream.write_all(frame.as_bytes()).is_err() || stream.flush().is_err() {
            break;
        }
    }
    tracing::debug!("subscriber stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestdb_core::EventKind;

    #[test]
    fn event_framing() {
        let event = ChangeEvent {
            kind: EventKind::Update,
            path: "/v1/db1/doc1".to_string(),
            at_millis: 1234,
        };
        assert_eq!(
            format_event(&event),
            "event: update\ndata: /v1/db1/doc1\nid: 1234\n\n"
        );
    }

    #[test]
    fn delete_framing() {
        let event = ChangeEvent {
            kind: EventKind::Delete,
            path: "/v1/db1".to_string(),
            at_millis: 99,
        };
        assert!(format_event(&event).starts_with("event: delete\n"));
    }

    #[test]
    fn stream_head_declares_an_event_stream() {
        assert!(STREAM_HEAD.contains("Content-Type: text/event-stream\r\n"));
        assert!(STREAM_HEAD.contains("Cache-Control: no-cache\r\n"));
        assert!(STREAM_HEAD.contains("Connection: keep-alive\r\n"));
    }
}
