//! Shared server context, passed to every internal call.
//!
//! There are no implicit globals in this crate: `init` builds exactly one
//! `ServerContext`, hands an `Arc` of it to the dispatcher and pipeline, and
//! `deinit` tears it down. The FFI adapter owns the single process-wide
//! instance.

use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};

use crate::config::ServerConfig;
use crate::engine::CompletionEngine;
use crate::jobs::JobRegistry;
use crate::lifecycle::Lifecycle;
use crate::routes::RouteTable;

/// Everything a handler needs: config, lifecycle gate, routes, the job
/// registry, the opaque engine, and the admission semaphore bounding the
/// worker pool.
pub struct ServerContext {
    pub config: ServerConfig,
    pub lifecycle: RwLock<Lifecycle>,
    pub routes: RouteTable,
    pub jobs: JobRegistry,
    pub engine: Arc<dyn CompletionEngine>,
    pub admission: Arc<Semaphore>,
}

pub type Context = Arc<ServerContext>;

impl ServerContext {
    pub fn new(config: ServerConfig, engine: Arc<dyn CompletionEngine>) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            lifecycle: RwLock::new(Lifecycle::Ready),
            routes: RouteTable::standard(),
            jobs: JobRegistry::new(),
            engine,
            admission,
            config,
        }
    }

    /// Current lifecycle state (read-only; transitions are the owner's job).
    pub async fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().await
    }
}
