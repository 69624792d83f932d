//! Error types for the worker bridge

use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// Worker process could not be launched. Fatal to the current start()
    /// attempt; carries the OS error text verbatim.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Worker stdin is closed or broken.
    #[error("Failed to write to worker stdin: {0}")]
    Write(String),

    /// No response arrived within the per-call bound. Fails only the one
    /// pending call it was armed for.
    #[error("Request timeout: '{method}' got no response within {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// The worker explicitly reported failure for a method. The diagnostic
    /// payload is carried unmodified.
    #[error("Worker error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<JsonValue>,
    },

    /// Call attempted while the bridge is not in the Connected state.
    #[error("Bridge is not connected")]
    NotConnected,

    /// Pending call dropped by stop() or by an unexpected worker exit.
    #[error("Bridge closed: {reason}")]
    Closed { reason: String },

    /// A request id was already registered. Guarded against even though the
    /// id generator makes collisions within a session implausible.
    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    /// Worker terminated outside of stop() while the bridge was live.
    #[error("Worker exited unexpectedly ({exit})")]
    UnexpectedExit {
        exit: String,
        stderr_tail: Vec<String>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;
