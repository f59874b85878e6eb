//! Response envelope — the canonical JSON shape for every outcome.
//!
//! Success and error results are both encoded into a single tagged object so
//! callers on the far side of the ABI can branch on one discriminator field:
//!
//! ```json
//! {"status":"success","payload":{...}}
//! {"status":"error","error_kind":"not_found","error_message":"..."}
//! ```
//!
//! Serialization of the envelope itself must never fail observably; if
//! `serde_json` refuses the payload we degrade to a hand-built
//! `internal_error` literal rather than returning malformed output.

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Canonical wrapper returned for every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Success {
        payload: serde_json::Value,
    },
    Error {
        error_kind: String,
        error_message: String,
    },
}

/// Last-resort envelope, used when serializing a real one fails.
const FALLBACK_ENVELOPE: &str =
    r#"{"status":"error","error_kind":"internal_error","error_message":"failed to serialize response"}"#;

impl ResponseEnvelope {
    /// Build a success envelope around an already-constructed payload.
    pub fn success(payload: serde_json::Value) -> Self {
        ResponseEnvelope::Success { payload }
    }

    /// Build an error envelope from a domain error.
    pub fn error(err: &ServerError) -> Self {
        ResponseEnvelope::Error {
            error_kind: err.kind().to_string(),
            error_message: err.to_string(),
        }
    }

    /// Serialize to the wire string. Infallible from the caller's view.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("[Encoder] envelope serialization failed: {}", e);
            FALLBACK_ENVELOPE.to_string()
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }
}

impl From<ServerError> for ResponseEnvelope {
    fn from(err: ServerError) -> Self {
        ResponseEnvelope::error(&err)
    }
}

impl<T: Serialize> From<Result<T, ServerError>> for ResponseEnvelope {
    fn from(result: Result<T, ServerError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(payload) => ResponseEnvelope::success(payload),
                Err(e) => ResponseEnvelope::error(&ServerError::Internal(format!(
                    "payload serialization failed: {}",
                    e
                ))),
            },
            Err(err) => ResponseEnvelope::error(&err),
        }
    }
}
