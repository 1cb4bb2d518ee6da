use std::convert::Infallible;

use axum::{
    http::header,
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use crate::errors::StreamError;

/// Write side of one long-lived push connection.
///
/// Frames go through a bounded channel that feeds the response body. When
/// the client disconnects hyper drops the body, the receiver goes with it,
/// and the connection cancels its own token.
#[derive(Debug)]
pub struct PushConnection {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl PushConnection {
    /// Create a connection and the receiving half that becomes the body.
    pub fn open(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, cancel }, rx)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Write one frame.
    ///
    /// Once the token is cancelled nothing more is written. A failed write
    /// means the client is gone; it cancels the token so every other wait
    /// on this connection unblocks too.
    pub async fn send(&self, frame: Frame) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            res = self.tx.send(frame) => match res {
                Ok(()) => Ok(()),
                Err(_) => {
                    self.cancel.cancel();
                    Err(StreamError::TransportClosed)
                }
            },
        }
    }

    /// Resolves when the connection is cancelled or the client goes away,
    /// reporting which of the two happened.
    pub async fn closed(&self) -> StreamError {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => StreamError::Cancelled,
            _ = self.tx.closed() => {
                self.cancel.cancel();
                StreamError::TransportClosed
            }
        }
    }
}

/// Wrap the receiving half in an SSE response. `Sse` sets the content type
/// and disables caching; the connection and CORS headers are added here.
pub fn sse_response(rx: mpsc::Receiver<Frame>) -> Response {
    let stream = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_event()));
    (
        [
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::parse_frames;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_send_delivers_frame() {
        let (conn, mut rx) = PushConnection::open(4, CancellationToken::new());
        conn.send(Frame::new("message", "hi")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Frame::new("message", "hi"));
    }

    #[tokio::test]
    async fn test_send_after_client_gone_cancels() {
        let (conn, rx) = PushConnection::open(4, CancellationToken::new());
        drop(rx);
        let err = conn.send(Frame::new("message", "hi")).await.unwrap_err();
        assert_eq!(err, StreamError::TransportClosed);
        assert!(conn.is_cancelled());
    }

    #[tokio::test]
    async fn test_nothing_written_after_cancellation() {
        let token = CancellationToken::new();
        let (conn, mut rx) = PushConnection::open(4, token.clone());
        conn.send(Frame::new("message", "before")).await.unwrap();
        token.cancel();
        let err = conn.send(Frame::new("message", "after")).await.unwrap_err();
        assert_eq!(err, StreamError::Cancelled);
        drop(conn);

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames, vec![Frame::new("message", "before")]);
    }

    #[tokio::test]
    async fn test_closed_resolves_when_receiver_dropped() {
        let (conn, rx) = PushConnection::open(4, CancellationToken::new());
        drop(rx);
        assert_eq!(conn.closed().await, StreamError::TransportClosed);
        assert!(conn.is_cancelled());
    }

    #[tokio::test]
    async fn test_sse_response_headers() {
        let (_conn, rx) = PushConnection::open(4, CancellationToken::new());
        let resp = sse_response(rx);
        let headers = resp.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_sse_response_body_carries_frames() {
        let (conn, rx) = PushConnection::open(4, CancellationToken::new());
        conn.send(Frame::new("update", "a\nb")).await.unwrap();
        conn.send(Frame::new("complete", "done")).await.unwrap();
        drop(conn);

        let bytes = sse_response(rx).into_body().collect().await.unwrap().to_bytes();
        let raw = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(
            raw,
            "event: update\ndata: a\ndata: b\n\nevent: complete\ndata: done\n\n"
        );
        assert_eq!(
            parse_frames(raw),
            vec![Frame::new("update", "a\nb"), Frame::new("complete", "done")]
        );
    }
}
