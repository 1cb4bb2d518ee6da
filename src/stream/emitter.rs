use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::connection::PushConnection;
use super::frame::Frame;
use crate::errors::StreamError;

/// Floor for emitter intervals; a zero interval would spin the loop.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

type PayloadFn = Box<dyn FnMut(u64) -> String + Send>;

/// A periodic source of frames with its own interval and counter.
///
/// The counter is local to the emitter, starts at 1 on the first firing and
/// is never reset while the connection lives.
pub struct PeriodicEmitter {
    event: String,
    interval: Duration,
    generator: PayloadFn,
    counter: u64,
}

impl PeriodicEmitter {
    pub fn new(
        event: impl Into<String>,
        interval: Duration,
        generator: impl FnMut(u64) -> String + Send + 'static,
    ) -> Self {
        Self {
            event: event.into(),
            interval: interval.max(MIN_INTERVAL),
            generator: Box::new(generator),
            counter: 0,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn fire(&mut self) -> Frame {
        self.counter += 1;
        Frame::new(self.event.clone(), (self.generator)(self.counter))
    }
}

impl std::fmt::Debug for PeriodicEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicEmitter")
            .field("event", &self.event)
            .field("interval", &self.interval)
            .field("counter", &self.counter)
            .finish()
    }
}

/// Drive a push connection: send the greeting, then multiplex every
/// emitter's timer and the connection's cancellation in one select loop.
///
/// Runs until the connection is cancelled or a write fails, and returns the
/// reason. Timers stop with the loop; no closing frame is sent.
///
/// When deadlines coincide the emitter registered first fires first. Each
/// emitter's next deadline is measured from its previous one, so a slow
/// write does not shift the schedule.
pub async fn run_emitters(
    conn: &PushConnection,
    greeting: Frame,
    mut emitters: Vec<PeriodicEmitter>,
) -> StreamError {
    if let Err(reason) = conn.send(greeting).await {
        return reason;
    }

    let start = Instant::now();
    let mut deadlines: Vec<Instant> = emitters.iter().map(|e| start + e.interval).collect();

    loop {
        let next = deadlines
            .iter()
            .enumerate()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(idx, deadline)| (idx, *deadline));

        let Some((idx, deadline)) = next else {
            // Nothing to emit; hold the connection until it goes away.
            return conn.closed().await;
        };

        tokio::select! {
            biased;
            reason = conn.closed() => return reason,
            _ = tokio::time::sleep_until(deadline) => {
                let emitter = &mut emitters[idx];
                let frame = emitter.fire();
                debug!(event = %frame.event, count = emitter.counter, "emitter fired");
                if let Err(reason) = conn.send(frame).await {
                    return reason;
                }

                let mut upcoming = deadline + emitter.interval;
                let now = Instant::now();
                if upcoming <= now {
                    upcoming = now + emitter.interval;
                }
                deadlines[idx] = upcoming;
            }
        }
    }
}
