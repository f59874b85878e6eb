//! In-flight job registry.
//!
//! Every accepted completion owns one entry here from admission until its
//! result is retrieved. The registry is the single authority on job state:
//! transitions are strictly `Queued → Running → {Completed|Cancelled|Failed}`
//! and only the first terminal transition ever takes effect — a cancel racing
//! natural completion resolves to whichever lands first, the loser is a no-op.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::error::ServerError;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Point-in-time copy of a job, handed out to result/cancel handlers so they
/// never hold the registry lock while encoding payloads.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: String,
    pub state: JobState,
    pub output: String,
    pub error: Option<ServerError>,
    pub partial_on_cancel: bool,
}

struct JobEntry {
    state: JobState,
    output: String,
    error: Option<ServerError>,
    cancel: watch::Sender<bool>,
    partial_on_cancel: bool,
}

impl JobEntry {
    fn snapshot(&self, id: &str) -> JobSnapshot {
        JobSnapshot {
            id: id.to_string(),
            state: self.state,
            output: self.output.clone(),
            error: self.error.clone(),
            partial_on_cancel: self.partial_on_cancel,
        }
    }
}

/// Registry of in-flight and unretrieved-terminal jobs.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<HashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly admitted job in `Queued` state. Returns the watch
    /// receiver the pipeline's run loop selects on for cancellation.
    pub async fn create(&self, id: &str, partial_on_cancel: bool) -> watch::Receiver<bool> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let entry = JobEntry {
            state: JobState::Queued,
            output: String::new(),
            error: None,
            cancel: cancel_tx,
            partial_on_cancel,
        };
        self.inner.lock().await.insert(id.to_string(), entry);
        cancel_rx
    }

    /// `Queued → Running`. No-op if the job was already force-cancelled.
    pub async fn set_running(&self, id: &str) {
        if let Some(entry) = self.inner.lock().await.get_mut(id) {
            if entry.state == JobState::Queued {
                entry.state = JobState::Running;
            }
        }
    }

    /// Append an output chunk. Ignored once the job is terminal.
    pub async fn append_chunk(&self, id: &str, chunk: &str) {
        if let Some(entry) = self.inner.lock().await.get_mut(id) {
            if !entry.state.is_terminal() {
                entry.output.push_str(chunk);
            }
        }
    }

    /// Terminal transition to `Completed`. Returns false if another terminal
    /// transition already won.
    pub async fn complete(&self, id: &str) -> bool {
        self.transition(id, JobState::Completed, None).await
    }

    /// Terminal transition to `Failed`.
    pub async fn fail(&self, id: &str, err: ServerError) -> bool {
        self.transition(id, JobState::Failed, Some(err)).await
    }

    /// Terminal transition to `Cancelled`.
    pub async fn mark_cancelled(&self, id: &str) -> bool {
        self.transition(id, JobState::Cancelled, None).await
    }

    async fn transition(&self, id: &str, next: JobState, err: Option<ServerError>) -> bool {
        if let Some(entry) = self.inner.lock().await.get_mut(id) {
            if entry.state.is_terminal() {
                return false;
            }
            entry.state = next;
            entry.error = err;
            return true;
        }
        false
    }

    /// Signal cooperative cancellation. Idempotent; a terminal job is left
    /// untouched and its current state is reported back.
    pub async fn request_cancel(&self, id: &str) -> Result<JobState, ServerError> {
        let guard = self.inner.lock().await;
        let entry = guard
            .get(id)
            .ok_or_else(|| ServerError::NotFound(format!("no job {}", id)))?;
        if !entry.state.is_terminal() {
            let _ = entry.cancel.send(true);
        }
        Ok(entry.state)
    }

    /// Look up a job for result retrieval. A terminal job is removed on the
    /// way out — results are retrievable exactly once; a second lookup for
    /// the same id reports `not_found`.
    pub async fn take_result(&self, id: &str) -> Result<JobSnapshot, ServerError> {
        let mut guard = self.inner.lock().await;
        let snap = guard
            .get(id)
            .map(|entry| entry.snapshot(id))
            .ok_or_else(|| ServerError::NotFound(format!("no job {}", id)))?;
        if snap.state.is_terminal() {
            guard.remove(id);
        }
        Ok(snap)
    }

    /// Drop a job without retrieval (synchronous path cleanup).
    pub async fn remove(&self, id: &str) -> Option<JobSnapshot> {
        self.inner
            .lock()
            .await
            .remove(id)
            .map(|entry| entry.snapshot(id))
    }

    /// Jobs not yet in a terminal state.
    pub async fn non_terminal_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|e| !e.state.is_terminal())
            .count()
    }

    /// All registered jobs, terminal or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Force-cancel everything still in flight: signal each job and mark it
    /// `Cancelled` without waiting for acknowledgment. Used by drain timeout.
    pub async fn force_cancel_all(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let mut cancelled = 0;
        for entry in guard.values_mut() {
            if !entry.state.is_terminal() {
                let _ = entry.cancel.send(true);
                entry.state = JobState::Cancelled;
                entry.error = None;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop all entries (teardown).
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}
