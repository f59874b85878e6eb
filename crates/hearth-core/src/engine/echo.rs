//! Builtin deterministic engine: echoes the prompt back token by token.
//!
//! Exists so the server is fully exercisable without a real model — the
//! chunking, pacing, and cancellation behavior are real even though the
//! content is an echo. Each whitespace token of the prompt becomes one chunk,
//! capped at `max_tokens`, with a configurable inter-chunk delay.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::ServerError;

use super::{CompletionEngine, EngineEvent, EngineHandle, EngineRequest, EngineStream};

/// Channel depth for one generation stream; the pipeline drains eagerly so a
/// small buffer is enough to decouple producer pacing from the consumer.
const STREAM_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct EchoEngine {
    chunk_delay: Duration,
}

impl EchoEngine {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(2))
    }
}

impl CompletionEngine for EchoEngine {
    fn submit(&self, req: EngineRequest) -> Result<EngineStream, ServerError> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(STREAM_BUFFER);
        let delay = self.chunk_delay;

        tokio::spawn(async move {
            let tokens: Vec<String> = req
                .prompt
                .split_whitespace()
                .take(req.max_tokens as usize)
                .map(|t| t.to_string())
                .collect();

            let mut sent = 0usize;
            for (i, token) in tokens.iter().enumerate() {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                tracing::debug!("[EchoEngine] cancelled after {} chunks", sent);
                                return;
                            }
                        }
                    }
                } else if *cancel_rx.borrow() {
                    tracing::debug!("[EchoEngine] cancelled after {} chunks", sent);
                    return;
                }

                let chunk = if i == 0 {
                    token.clone()
                } else {
                    format!(" {}", token)
                };
                if event_tx.send(EngineEvent::Chunk(chunk)).await.is_err() {
                    // Consumer went away; nothing left to do.
                    return;
                }
                sent += 1;
            }

            let _ = event_tx.send(EngineEvent::Done { chunks: sent }).await;
        });

        Ok(EngineStream {
            handle: EngineHandle::new(cancel_tx),
            events: event_rx,
        })
    }
}
