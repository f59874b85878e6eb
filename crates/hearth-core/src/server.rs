//! Top-level server object: the single owner of a `ServerContext`.
//!
//! `Server::new` is the Rust-level `init` (Uninitialized → Ready); `shutdown`
//! is `deinit` (Ready → Draining → Stopped). Both call-level entry points —
//! the generic `json_rpc` dispatch and the `get_completion` fast path — hand
//! back a serialized envelope string, never an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::{CompletionEngine, EchoEngine};
use crate::envelope::ResponseEnvelope;
use crate::error::ServerError;
use crate::lifecycle::Lifecycle;
use crate::pipeline::CompletionResult;
use crate::state::{Context, ServerContext};

/// Poll interval while draining in-flight jobs.
const DRAIN_POLL: Duration = Duration::from_millis(10);

pub struct Server {
    ctx: Context,
    dispatcher: Dispatcher,
}

impl Server {
    /// Build a server from an `init` command string with the builtin engine.
    pub fn new(cmd: &str) -> Result<Self, ServerError> {
        let config = ServerConfig::parse(cmd)?;
        Ok(Self::with_engine(config, Arc::new(EchoEngine::default())))
    }

    /// Build a server around a host-provided engine. This is how a real
    /// inference backend (or a test double) is wired in.
    pub fn with_engine(config: ServerConfig, engine: Arc<dyn CompletionEngine>) -> Self {
        tracing::info!(
            "[Server] ready: model={} max_concurrency={}",
            config.model,
            config.max_concurrency
        );
        let ctx = Arc::new(ServerContext::new(config, engine));
        let dispatcher = Dispatcher::new(ctx.clone());
        Self { ctx, dispatcher }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The generic dispatch call: route the request and return the envelope
    /// as a JSON string.
    pub async fn json_rpc(&self, method: &str, path: &str, headers: &str, body: &str) -> String {
        self.dispatcher
            .dispatch(method, path, headers, body)
            .await
            .to_json()
    }

    /// The completion fast path: bypasses route matching and goes straight
    /// into the pipeline, still gated on lifecycle.
    pub async fn get_completion(&self, req_json: &str) -> String {
        let result: Result<CompletionResult, ServerError> = async {
            self.ctx.lifecycle().await.check_ready()?;
            self.dispatcher.pipeline().complete_sync(req_json).await
        }
        .await;
        ResponseEnvelope::from(result).to_json()
    }

    /// Graceful shutdown: Ready → Draining → Stopped. Waits up to the drain
    /// timeout for in-flight jobs, then force-cancels the remainder and
    /// proceeds regardless of acknowledgment. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.ctx.lifecycle.write().await;
            if *lifecycle != Lifecycle::Ready {
                return;
            }
            *lifecycle = Lifecycle::Draining;
        }
        let in_flight = self.ctx.jobs.non_terminal_count().await;
        tracing::info!("[Server] draining, {} jobs in flight", in_flight);

        let drained = timeout(self.ctx.config.drain_timeout, async {
            while self.ctx.jobs.non_terminal_count().await > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            let cancelled = self.ctx.jobs.force_cancel_all().await;
            tracing::warn!(
                "[Server] drain timed out after {:?}, force-cancelled {} jobs",
                self.ctx.config.drain_timeout,
                cancelled
            );
        }

        {
            // Admitted requests insert their job under the lifecycle read
            // lock, so holding the write lock across this sweep means no
            // entry can land between it and the Stopped transition.
            let mut lifecycle = self.ctx.lifecycle.write().await;
            self.ctx.jobs.force_cancel_all().await;
            self.ctx.jobs.clear().await;
            *lifecycle = Lifecycle::Stopped;
        }
        tracing::info!("[Server] stopped");
    }
}
