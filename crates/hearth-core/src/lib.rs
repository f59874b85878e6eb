//! Hearth Core — Transport-agnostic domain logic for the hearth embedded server.
//!
//! This crate contains the lifecycle state machine, route table, request
//! dispatcher, and completion pipeline. It has **no FFI or HTTP framework
//! dependency**, making it suitable for use from:
//!
//! - The C ABI adapter (`hearth-ffi`)
//! - In-process Rust embedding (call `Server` directly)
//! - Test harnesses with a scripted engine
//!
//! The only shape that ever leaves this crate toward a caller is a serialized
//! [`ResponseEnvelope`] — success or error, never a panic, never a partial
//! JSON fragment.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod pipeline;
pub mod request;
pub mod routes;
pub mod server;
pub mod state;

// Convenience re-exports
pub use config::{AdmissionPolicy, ServerConfig};
pub use engine::{CompletionEngine, EchoEngine};
pub use envelope::ResponseEnvelope;
pub use error::ServerError;
pub use lifecycle::Lifecycle;
pub use server::Server;
pub use state::{Context, ServerContext};
