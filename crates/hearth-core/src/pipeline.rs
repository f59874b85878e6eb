//! Completion pipeline — validation, admission, execution, cancellation.
//!
//! Reconciles the synchronous call surface with long-running generation:
//! every accepted request becomes a [`jobs::JobRegistry`] entry and a chunk
//! stream from the opaque engine. Synchronous entry points drive the stream
//! to completion on the calling task; `POST /jobs` spawns the same run loop
//! and returns an accepted envelope with the job id.
//!
//! Ordering rules enforced here:
//! - validation failures short-circuit before any job exists
//! - a timed-out admission never creates a job
//! - cancellation racing natural completion resolves to whichever terminal
//!   transition the registry records first; the loser is a no-op

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::time::timeout;

use crate::config::AdmissionPolicy;
use crate::engine::{EngineEvent, EngineRequest};
use crate::error::ServerError;
use crate::jobs::JobState;
use crate::state::Context;

/// Hard ceiling on the `max_tokens` option.
pub const MAX_TOKENS_LIMIT: i64 = 65_536;
/// Generation length when the request leaves `max_tokens` unset.
pub const DEFAULT_MAX_TOKENS: u32 = 256;

// ─── Request / payload types ───────────────────────────────────────────────

/// A completion request, parsed from a request body. Unrecognized options
/// are rejected outright (`deny_unknown_fields`) rather than ignored, so a
/// misspelled option never silently changes behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Streaming flag. The call surface has no incremental channel, so this
    /// only affects internal accounting; chunks are always accumulated.
    #[serde(default)]
    pub stream: bool,
    /// Keep accumulated output when the job is cancelled instead of
    /// discarding it.
    #[serde(default)]
    pub partial_on_cancel: bool,
}

impl CompletionRequest {
    /// Parse and validate a request body. Never touches the registry.
    pub fn parse(body: &str) -> Result<Self, ServerError> {
        let req: CompletionRequest = serde_json::from_str(body).map_err(|e| {
            ServerError::InvalidRequest(format!("malformed completion request: {}", e))
        })?;
        req.validate()?;
        Ok(req)
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.prompt.is_empty() {
            return Err(ServerError::InvalidRequest("prompt must not be empty".into()));
        }
        if let Some(n) = self.max_tokens {
            if !(0..=MAX_TOKENS_LIMIT).contains(&n) {
                return Err(ServerError::InvalidRequest(format!(
                    "max_tokens must be in 0..={}, got {}",
                    MAX_TOKENS_LIMIT, n
                )));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ServerError::InvalidRequest(format!(
                    "temperature must be in 0.0..=2.0, got {}",
                    t
                )));
            }
        }
        Ok(())
    }

    fn to_engine_request(&self, model: &str) -> EngineRequest {
        EngineRequest {
            model: model.to_string(),
            prompt: self.prompt.clone(),
            max_tokens: self
                .max_tokens
                .map(|n| n as u32)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature.unwrap_or(1.0),
        }
    }
}

/// Payload for a finished synchronous completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub model: String,
    pub text: String,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
}

/// Payload returned by `POST /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobAccepted {
    pub accepted: bool,
    pub job_id: String,
}

/// Payload returned by the cancel route.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
}

// ─── Pipeline ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CompletionPipeline {
    ctx: Context,
}

impl CompletionPipeline {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Synchronous completion: validate, admit, run to a terminal state, and
    /// return the final accumulated result. Used by both `get_completion`
    /// and `POST /completion`.
    pub async fn complete_sync(&self, body: &str) -> Result<CompletionResult, ServerError> {
        let req = CompletionRequest::parse(body)?;
        let permit = self.admit().await?;

        let id = uuid::Uuid::new_v4().to_string();
        // The pool may have been saturated long enough for a drain to start.
        // The recheck and the registry insert stay under one read lock so
        // the insert cannot interleave with shutdown's final sweep.
        let cancel_rx = {
            let lifecycle = self.ctx.lifecycle.read().await;
            lifecycle.check_ready()?;
            self.ctx.jobs.create(&id, req.partial_on_cancel).await
        };
        tracing::debug!("[Pipeline] job {} admitted (sync)", id);

        let outcome = run_generation(&self.ctx, &id, &req, cancel_rx).await;
        drop(permit);

        match outcome {
            Ok((text, chunks)) => {
                // A force-cancel may have landed between the engine's Done
                // and here; the registry records the winning transition.
                let won = self.ctx.jobs.complete(&id).await;
                let snapshot = self.ctx.jobs.remove(&id).await;
                if won {
                    Ok(CompletionResult {
                        model: self.ctx.config.model.clone(),
                        text,
                        chunks,
                        partial: None,
                    })
                } else if req.partial_on_cancel {
                    Ok(CompletionResult {
                        model: self.ctx.config.model.clone(),
                        text: snapshot.map(|s| s.output).unwrap_or(text),
                        chunks,
                        partial: Some(true),
                    })
                } else {
                    Err(ServerError::Cancelled("generation cancelled".into()))
                }
            }
            Err(err) => {
                match &err {
                    ServerError::Cancelled(_) => self.ctx.jobs.mark_cancelled(&id).await,
                    _ => self.ctx.jobs.fail(&id, err.clone()).await,
                };
                let snapshot = self.ctx.jobs.remove(&id).await;
                if matches!(err, ServerError::Cancelled(_)) && req.partial_on_cancel {
                    let output = snapshot.map(|s| s.output).unwrap_or_default();
                    let chunks = output.split_whitespace().count();
                    return Ok(CompletionResult {
                        model: self.ctx.config.model.clone(),
                        text: output,
                        chunks,
                        partial: Some(true),
                    });
                }
                Err(err)
            }
        }
    }

    /// Asynchronous submission: validate, admit, register the job, spawn the
    /// run loop, and return immediately with the job id.
    pub async fn submit_job(&self, body: &str) -> Result<JobAccepted, ServerError> {
        let req = CompletionRequest::parse(body)?;
        let permit = self.admit().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let cancel_rx = {
            let lifecycle = self.ctx.lifecycle.read().await;
            lifecycle.check_ready()?;
            self.ctx.jobs.create(&id, req.partial_on_cancel).await
        };
        tracing::debug!("[Pipeline] job {} admitted (async)", id);

        let ctx = Arc::clone(&self.ctx);
        let job_id = id.clone();
        tokio::spawn(async move {
            drive_job(ctx, job_id, req, cancel_rx, permit).await;
        });

        Ok(JobAccepted {
            accepted: true,
            job_id: id,
        })
    }

    /// Poll or retrieve a job. Non-terminal jobs report their state and stay
    /// registered; terminal jobs yield their result exactly once.
    pub async fn job_result(&self, id: &str) -> Result<serde_json::Value, ServerError> {
        let snap = self.ctx.jobs.take_result(id).await?;
        match snap.state {
            JobState::Queued | JobState::Running => Ok(serde_json::json!({
                "job_id": snap.id,
                "state": snap.state,
            })),
            JobState::Completed => Ok(serde_json::json!({
                "job_id": snap.id,
                "state": snap.state,
                "model": self.ctx.config.model,
                "text": snap.output,
            })),
            JobState::Failed => Err(snap
                .error
                .unwrap_or_else(|| ServerError::Internal("job failed".into()))),
            JobState::Cancelled => {
                if snap.partial_on_cancel {
                    Ok(serde_json::json!({
                        "job_id": snap.id,
                        "state": snap.state,
                        "text": snap.output,
                        "partial": true,
                    }))
                } else {
                    Err(ServerError::Cancelled(format!("job {} was cancelled", id)))
                }
            }
        }
    }

    /// Request cooperative cancellation. Idempotent: cancelling a terminal
    /// or already-cancelling job reports its state without changing it.
    pub async fn cancel_job(&self, id: &str) -> Result<JobStatus, ServerError> {
        let state = self.ctx.jobs.request_cancel(id).await?;
        tracing::debug!("[Pipeline] cancel requested for job {} ({:?})", id, state);
        Ok(JobStatus {
            job_id: id.to_string(),
            state,
        })
    }

    /// Acquire a worker-pool slot per the configured admission policy.
    async fn admit(&self) -> Result<OwnedSemaphorePermit, ServerError> {
        let semaphore = Arc::clone(&self.ctx.admission);
        match self.ctx.config.admission {
            AdmissionPolicy::Reject => semaphore
                .try_acquire_owned()
                .map_err(|_| ServerError::Busy("worker pool is saturated".into())),
            AdmissionPolicy::Block => {
                match timeout(self.ctx.config.admission_timeout, semaphore.acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(ServerError::Internal("admission pool closed".into())),
                    Err(_) => Err(ServerError::Busy("admission timed out".into())),
                }
            }
        }
    }
}

// ─── Run loop ──────────────────────────────────────────────────────────────

/// Drive one generation to a terminal outcome. Accumulates chunks into both
/// the registry (for progress/partial visibility) and a local buffer (the
/// synchronous return value). Returns the accumulated text and chunk count,
/// or the terminal error.
async fn run_generation(
    ctx: &Context,
    id: &str,
    req: &CompletionRequest,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<(String, usize), ServerError> {
    let engine_req = req.to_engine_request(&ctx.config.model);
    let mut stream = ctx.engine.submit(engine_req)?;
    ctx.jobs.set_running(id).await;

    let mut text = String::new();
    let mut received = 0usize;
    let mut cancel_requested = *cancel_rx.borrow();
    if cancel_requested {
        ctx.engine.cancel(&stream.handle);
    }

    loop {
        tokio::select! {
            changed = cancel_rx.changed(), if !cancel_requested => {
                // An Err means the registry entry is gone (teardown); treat
                // it the same as a cancel signal.
                if changed.is_err() || *cancel_rx.borrow() {
                    cancel_requested = true;
                    ctx.engine.cancel(&stream.handle);
                }
            }
            event = stream.events.recv() => match event {
                Some(EngineEvent::Chunk(chunk)) => {
                    ctx.jobs.append_chunk(id, &chunk).await;
                    text.push_str(&chunk);
                    received += 1;
                }
                Some(EngineEvent::Done { chunks }) => {
                    tracing::debug!("[Pipeline] job {} completed ({} chunks)", id, chunks);
                    return Ok((text, chunks));
                }
                Some(EngineEvent::Error(msg)) => {
                    tracing::warn!("[Pipeline] job {} engine failure: {}", id, msg);
                    return Err(ServerError::Internal(format!("engine failure: {}", msg)));
                }
                None => {
                    return if cancel_requested {
                        Err(ServerError::Cancelled("generation cancelled".into()))
                    } else {
                        tracing::warn!(
                            "[Pipeline] job {} stream closed after {} chunks without a terminal event",
                            id, received
                        );
                        Err(ServerError::Internal(
                            "engine stream closed without completing".into(),
                        ))
                    };
                }
            }
        }
    }
}

/// Background variant of the run loop for `POST /jobs`: records the terminal
/// outcome in the registry instead of returning it, and holds the admission
/// permit for the full duration.
async fn drive_job(
    ctx: Context,
    id: String,
    req: CompletionRequest,
    cancel_rx: watch::Receiver<bool>,
    permit: OwnedSemaphorePermit,
) {
    let outcome = run_generation(&ctx, &id, &req, cancel_rx).await;
    match outcome {
        Ok(_) => {
            ctx.jobs.complete(&id).await;
        }
        Err(ServerError::Cancelled(_)) => {
            ctx.jobs.mark_cancelled(&id).await;
        }
        Err(err) => {
            ctx.jobs.fail(&id, err).await;
        }
    }
    drop(permit);
}
