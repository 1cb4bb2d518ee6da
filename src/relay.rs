//! Completion relay: forwards a streamed completion into a push connection.
//!
//! A session sends `connecting` right away, then one `update` per delta
//! carrying the whole accumulated text (a full re-render, not a diff), then
//! exactly one terminal frame: `complete` on end-of-stream or finish reason,
//! `error` on an external failure or when the deadline passes. If the client
//! goes away first the delta stream is dropped, which aborts the upstream
//! request, and nothing more is written.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::errors::{RelayError, StreamError};
use crate::render;
use crate::stream::{Frame, PushConnection};

pub const EVENT_CONNECTING: &str = "connecting";
pub const EVENT_UPDATE: &str = "update";
pub const EVENT_COMPLETE: &str = "complete";
pub const EVENT_ERROR: &str = "error";

/// How a relay session ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// `complete` was sent with this text.
    Completed(String),
    /// `error` was sent for this failure.
    Failed(RelayError),
    /// The connection closed before a terminal frame could be sent.
    Cancelled(StreamError),
}

/// Why consumption stopped early.
enum Interrupt {
    Failed(RelayError),
    Transport(StreamError),
}

impl From<RelayError> for Interrupt {
    fn from(err: RelayError) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<StreamError> for Interrupt {
    fn from(err: StreamError) -> Self {
        Interrupt::Transport(err)
    }
}

/// State owned by one relay run.
#[derive(Debug)]
pub struct RelaySession {
    prompt: String,
    buffer: String,
    deadline: Instant,
}

impl RelaySession {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            buffer: String::new(),
            deadline: Instant::now() + timeout,
        }
    }

    async fn consume(
        &mut self,
        client: &dyn CompletionClient,
        conn: &PushConnection,
    ) -> Result<(), Interrupt> {
        let mut deltas = client.stream(&self.prompt).await.map_err(RelayError::from)?;

        while let Some(item) = deltas.next().await {
            let delta = item.map_err(RelayError::from)?;
            if !delta.content.is_empty() {
                self.buffer.push_str(&delta.content);
                conn.send(Frame::new(EVENT_UPDATE, render::relay_update(&self.buffer)))
                    .await?;
            }
            if let Some(reason) = delta.finish_reason {
                debug!(%reason, "completion finished");
                break;
            }
        }
        Ok(())
    }
}

/// Run one relay session over `conn` with a hard `timeout` on the whole
/// upstream operation.
pub async fn relay(
    client: &dyn CompletionClient,
    prompt: &str,
    conn: &PushConnection,
    timeout: Duration,
) -> RelayOutcome {
    let mut session = RelaySession::new(prompt, timeout);

    if let Err(reason) = conn
        .send(Frame::new(EVENT_CONNECTING, render::relay_connecting()))
        .await
    {
        return RelayOutcome::Cancelled(reason);
    }

    let deadline = session.deadline;
    let result = tokio::select! {
        biased;
        reason = conn.closed() => Err(Interrupt::Transport(reason)),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupt::Failed(RelayError::Deadline(timeout))),
        res = session.consume(client, conn) => res,
    };

    match result {
        Ok(()) => {
            let text = std::mem::take(&mut session.buffer);
            let frame = Frame::new(EVENT_COMPLETE, render::relay_complete(&text));
            match conn.send(frame).await {
                Ok(()) => {
                    info!(chars = text.len(), "relay complete");
                    RelayOutcome::Completed(text)
                }
                Err(reason) => RelayOutcome::Cancelled(reason),
            }
        }
        Err(Interrupt::Failed(err)) => {
            warn!(error = %err, deadline = err.is_deadline(), "relay failed");
            let frame = Frame::new(EVENT_ERROR, render::relay_error(&err.to_string()));
            match conn.send(frame).await {
                Ok(()) => RelayOutcome::Failed(err),
                Err(reason) => RelayOutcome::Cancelled(reason),
            }
        }
        Err(Interrupt::Transport(reason)) => {
            info!(%reason, "relay abandoned");
            RelayOutcome::Cancelled(reason)
        }
    }
}
