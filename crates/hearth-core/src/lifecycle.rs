//! Lifecycle state machine gating every entry point.
//!
//! `init` moves Uninitialized → Ready; `deinit` walks Ready → Draining →
//! Stopped. Dispatch only ever reads the current state; transitions go
//! through the coarse lifecycle lock held by the owner (`Server`).

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Draining,
    Stopped,
}

impl Lifecycle {
    /// Check that a request may proceed. Draining reports `stopping` so
    /// callers can tell a shutdown in progress from a server that never
    /// started (or already stopped), which reports `not_initialized`.
    pub fn check_ready(&self) -> Result<(), ServerError> {
        match self {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Draining => Err(ServerError::Stopping(
                "server is draining in-flight work".into(),
            )),
            Lifecycle::Uninitialized | Lifecycle::Stopped => Err(ServerError::NotInitialized(
                "server is not initialized".into(),
            )),
        }
    }
}
