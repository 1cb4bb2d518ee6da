//! Poll state machine: background jobs whose progress clients re-check.
//!
//! A job record moves `Idle → Processing → {Completed, Error} → Idle`. The
//! last step happens on the status read that observes the terminal state:
//! that read takes the result and resets the record under the same lock, so
//! exactly one reader consumes it and any concurrent reader sees `Idle`.
//!
//! Submitting while a job is processing overwrites it. Each submission bumps
//! a generation number and a worker only writes back if its generation is
//! still current, so the newest submission always wins and stale workers
//! are discarded.
//!
//! A result nobody reads is swept once it is older than the retention
//! window. The sweep runs on every submission, so per-session records for
//! clients that went away do not accumulate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::config::PollMode;
use crate::errors::RelayError;

/// Key of the record used in single-slot mode and for requests without a
/// session.
pub const DEFAULT_SLOT: &str = "default";

/// Progress messages by elapsed time, ordered by exclusive upper bound.
pub const PHASES: &[(Duration, &str)] = &[
    (Duration::from_secs(2), "🔄 Connecting to OpenAI..."),
    (Duration::from_secs(5), "⚡ Processing your request..."),
    (Duration::from_secs(10), "🧠 Generating response..."),
    (Duration::from_secs(15), "✨ Finalizing response..."),
];

/// Default retention for unread results.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Message once every threshold in [`PHASES`] has passed.
pub const FINAL_PHASE: &str = "⏳ Almost ready...";

/// Cosmetic progress text for a job that has been running for `elapsed`.
pub fn phase_for(elapsed: Duration) -> &'static str {
    PHASES
        .iter()
        .find(|(threshold, _)| elapsed < *threshold)
        .map(|(_, message)| *message)
        .unwrap_or(FINAL_PHASE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct JobRecord {
    pub status: JobStatus,
    pub result: String,
    pub error: String,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub generation: u64,
}

impl JobRecord {
    fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Error)
    }
}

/// What a status check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusView {
    Idle,
    Processing {
        elapsed: Duration,
        phase: &'static str,
    },
    Completed(String),
    Failed(String),
}

/// Handle returned by [`JobStore::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub key: String,
    pub generation: u64,
}

/// Job records, guarded by one mutex.
#[derive(Debug)]
pub struct JobStore {
    mode: PollMode,
    retention: Duration,
    records: Mutex<HashMap<String, JobRecord>>,
    generations: AtomicU64,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(PollMode::default())
    }
}

impl JobStore {
    pub fn new(mode: PollMode) -> Self {
        Self {
            mode,
            retention: DEFAULT_RETENTION,
            records: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    /// The record key a request with this `session` maps to.
    pub fn key_for(&self, session: Option<&str>) -> String {
        match (self.mode, session.map(str::trim)) {
            (PollMode::PerSession, Some(session)) if !session.is_empty() => session.to_string(),
            _ => DEFAULT_SLOT.to_string(),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop terminal records that have gone unread for longer than the
    /// retention window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut records = self.records();
        Self::sweep_locked(&mut records, self.retention)
    }

    fn sweep_locked(records: &mut HashMap<String, JobRecord>, retention: Duration) -> usize {
        let before = records.len();
        records.retain(|_, record| {
            !record.is_terminal()
                || record
                    .finished_at
                    .is_none_or(|finished| finished.elapsed() < retention)
        });
        let swept = before - records.len();
        if swept > 0 {
            debug!(swept, remaining = records.len(), "unread job results swept");
        }
        swept
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Move the record for `key` to `Processing` and return the generation
    /// the worker must present to [`JobStore::finish`]. Expired results are
    /// swept first.
    pub fn begin(&self, key: &str) -> u64 {
        let generation = self.next_generation();
        let mut records = self.records();
        Self::sweep_locked(&mut records, self.retention);
        let record = records.entry(key.to_string()).or_default();
        if record.status == JobStatus::Processing {
            info!(key, superseded = record.generation, "job overwritten by new submission");
        }
        *record = JobRecord {
            status: JobStatus::Processing,
            result: String::new(),
            error: String::new(),
            started_at: Some(Instant::now()),
            finished_at: None,
            generation,
        };
        generation
    }

    /// Record a worker's result. Returns `false` if the job was superseded
    /// (or already consumed) and the result was dropped.
    pub fn finish(&self, key: &str, generation: u64, outcome: Result<String, RelayError>) -> bool {
        let mut records = self.records();
        let Some(record) = records.get_mut(key) else {
            debug!(key, generation, "job record gone; dropping result");
            return false;
        };
        if record.generation != generation || record.status != JobStatus::Processing {
            debug!(key, generation, current = record.generation, "stale job result dropped");
            return false;
        }
        record.finished_at = Some(Instant::now());
        match outcome {
            Ok(text) => {
                record.status = JobStatus::Completed;
                record.result = text;
            }
            Err(err) => {
                record.status = JobStatus::Error;
                record.error = err.to_string();
            }
        }
        true
    }

    /// Observe the record for `key`. A terminal record is consumed and
    /// reset to idle by this call.
    pub fn check(&self, key: &str) -> StatusView {
        let mut records = self.records();
        let Some(record) = records.get(key) else {
            return StatusView::Idle;
        };
        let status = record.status;
        match status {
            JobStatus::Idle => StatusView::Idle,
            JobStatus::Processing => {
                let elapsed = record
                    .started_at
                    .map(|started| started.elapsed())
                    .unwrap_or_default();
                StatusView::Processing {
                    elapsed,
                    phase: phase_for(elapsed),
                }
            }
            JobStatus::Completed | JobStatus::Error => {
                let record = records.remove(key).unwrap_or_default();
                if record.status == JobStatus::Completed {
                    StatusView::Completed(record.result)
                } else {
                    StatusView::Failed(record.error)
                }
            }
        }
    }

    /// Current status for `key` without consuming anything.
    pub fn status(&self, key: &str) -> JobStatus {
        self.records().get(key).map(|r| r.status).unwrap_or_default()
    }

    /// Start a job for `prompt` and hand it to a detached worker that calls
    /// the completion API under `timeout`. Returns immediately.
    pub fn submit(
        self: &Arc<Self>,
        client: Arc<dyn CompletionClient>,
        key: String,
        prompt: String,
        timeout: Duration,
    ) -> Submission {
        let generation = self.begin(&key);
        let submission = Submission {
            key: key.clone(),
            generation,
        };
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, client.complete(&prompt)).await {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(err)) => Err(RelayError::from(err)),
                Err(_) => Err(RelayError::Deadline(timeout)),
            };
            match &outcome {
                Ok(text) => info!(key, generation, chars = text.len(), "poll job completed"),
                Err(err) => warn!(key, generation, error = %err, "poll job failed"),
            }
            store.finish(&key, generation, outcome);
        });
        submission
    }
}
