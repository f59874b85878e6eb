//! Server configuration, parsed from the `init` command string.
//!
//! The command string is whitespace-separated `key=value` pairs, e.g.
//! `"model=test max_concurrency=2 admission=reject"`. Recognized keys:
//!
//! - `model`                — engine model identifier (default `"default"`)
//! - `max_concurrency`      — worker-pool width, >= 1 (default `4`)
//! - `admission`            — `block` or `reject` on pool saturation
//! - `admission_timeout_ms` — wait budget for the `block` policy (default `5000`)
//! - `drain_timeout_ms`     — shutdown wait before force-cancel (default `10000`)
//!
//! Unknown keys and malformed pairs are rejected with `bad_command`, so a
//! typo in the host's configuration fails `init` loudly instead of being
//! silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// What to do with a new completion request when the worker pool is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Block the calling thread up to the admission timeout.
    Block,
    /// Fail immediately with a `busy` error.
    Reject,
}

/// Parsed server configuration, immutable after `init`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub model: String,
    pub max_concurrency: usize,
    pub admission: AdmissionPolicy,
    pub admission_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_concurrency: 4,
            admission: AdmissionPolicy::Block,
            admission_timeout: Duration::from_millis(5000),
            drain_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ServerConfig {
    /// Parse an `init` command string. An empty string yields the defaults.
    pub fn parse(cmd: &str) -> Result<Self, ServerError> {
        let mut config = Self::default();

        for token in cmd.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                ServerError::BadCommand(format!("expected key=value, got '{}'", token))
            })?;

            match key {
                "model" => {
                    if value.is_empty() {
                        return Err(ServerError::BadCommand("model must not be empty".into()));
                    }
                    config.model = value.to_string();
                }
                "max_concurrency" => {
                    let n = parse_number(key, value)? as usize;
                    if n == 0 {
                        return Err(ServerError::BadCommand(
                            "max_concurrency must be >= 1".into(),
                        ));
                    }
                    config.max_concurrency = n;
                }
                "admission" => {
                    config.admission = match value {
                        "block" => AdmissionPolicy::Block,
                        "reject" => AdmissionPolicy::Reject,
                        other => {
                            return Err(ServerError::BadCommand(format!(
                                "admission must be 'block' or 'reject', got '{}'",
                                other
                            )))
                        }
                    };
                }
                "admission_timeout_ms" => {
                    config.admission_timeout = Duration::from_millis(parse_number(key, value)?);
                }
                "drain_timeout_ms" => {
                    config.drain_timeout = Duration::from_millis(parse_number(key, value)?);
                }
                other => {
                    return Err(ServerError::BadCommand(format!(
                        "unknown option '{}'",
                        other
                    )));
                }
            }
        }

        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ServerError> {
    value.parse::<u64>().map_err(|_| {
        ServerError::BadCommand(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}
