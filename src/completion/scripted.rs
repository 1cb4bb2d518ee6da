//! A deterministic [`CompletionClient`] that plays back a fixed script.
//!
//! Used by the test suites to drive the relay and the poll worker without a
//! network, including slow, failing and abandoned streams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{CompletionClient, CompletionError, Delta, DeltaStream};

/// One step of a streamed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Yield a text delta.
    Delta(String),
    /// Yield an empty delta carrying a finish reason.
    Finish(String),
    /// Yield a stream error.
    Fail(String),
    /// Sleep before the next step.
    Wait(Duration),
}

impl Step {
    pub fn delta(text: impl Into<String>) -> Self {
        Step::Delta(text.into())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedClient {
    script: Vec<Step>,
    open_error: Option<String>,
    reply: Result<String, String>,
    reply_delay: Duration,
    prompts: Arc<Mutex<Vec<String>>>,
    abandoned: Arc<AtomicUsize>,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            open_error: None,
            reply: Ok(String::new()),
            reply_delay: Duration::ZERO,
            prompts: Arc::new(Mutex::new(Vec::new())),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ScriptedClient {
    /// A client whose streams play `steps` and then end.
    pub fn streaming(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A client whose non-streaming call answers `reply` after `delay`.
    pub fn replying(reply: Result<&str, &str>, delay: Duration) -> Self {
        Self {
            reply: reply.map(str::to_string).map_err(str::to_string),
            reply_delay: delay,
            ..Self::default()
        }
    }

    /// Make `stream()` fail before any delta is produced.
    pub fn failing_to_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// Every prompt submitted so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Streams dropped before their script ran out.
    pub fn abandoned_streams(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn record(&self, prompt: &str) {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
    }
}

struct Playback {
    steps: VecDeque<Step>,
    abandoned: Arc<AtomicUsize>,
}

impl Drop for Playback {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.record(prompt);
        tokio::time::sleep(self.reply_delay).await;
        self.reply.clone().map_err(|body| CompletionError::Status { status: 500, body })
    }

    async fn stream(&self, prompt: &str) -> Result<DeltaStream, CompletionError> {
        self.record(prompt);
        if let Some(message) = &self.open_error {
            return Err(CompletionError::Status {
                status: 500,
                body: message.clone(),
            });
        }

        let playback = Playback {
            steps: self.script.iter().cloned().collect(),
            abandoned: Arc::clone(&self.abandoned),
        };
        let stream = futures::stream::unfold(playback, |mut playback| async move {
            loop {
                let item = match playback.steps.pop_front()? {
                    Step::Wait(pause) => {
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    Step::Delta(text) => Ok(Delta::text(text)),
                    Step::Finish(reason) => Ok(Delta::finished(reason)),
                    Step::Fail(message) => Err(CompletionError::Stream(message)),
                };
                return Some((item, playback));
            }
        });
        Ok(stream.boxed())
    }
}
