//! Opaque inference capability behind the completion pipeline.
//!
//! The pipeline only ever sees this trait: `submit` starts generation and
//! hands back a chunk stream plus a cancellation handle, `cancel` signals the
//! engine to stop. Production engines are wired in by the embedding host; the
//! builtin [`EchoEngine`] is both the default wiring and the deterministic
//! test double.

use tokio::sync::{mpsc, watch};

use crate::error::ServerError;

pub mod echo;

pub use echo::EchoEngine;

/// What the pipeline asks the engine to generate.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Cancellation handle for one submitted generation.
///
/// Cloneable so the job registry can keep one while the pipeline drives the
/// stream. Signaling is level-triggered: once cancelled, stays cancelled.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    cancel: watch::Sender<bool>,
}

impl EngineHandle {
    pub fn new(cancel: watch::Sender<bool>) -> Self {
        Self { cancel }
    }

    /// Signal cancellation. A no-op if the engine task already finished.
    pub fn signal_cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// One event on a generation stream. A well-behaved engine sends zero or more
/// `Chunk`s followed by exactly one `Done` or `Error`; a stream that closes
/// without a terminal event is treated as cancelled or failed by the caller.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Chunk(String),
    Done { chunks: usize },
    Error(String),
}

/// A running generation: its event stream and its cancellation handle.
pub struct EngineStream {
    pub handle: EngineHandle,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// The opaque inference capability.
pub trait CompletionEngine: Send + Sync {
    /// Start generating for `req`. Must return promptly; actual generation
    /// happens behind the returned stream.
    fn submit(&self, req: EngineRequest) -> Result<EngineStream, ServerError>;

    /// Cooperatively cancel a submitted generation.
    fn cancel(&self, handle: &EngineHandle) {
        handle.signal_cancel();
    }
}
