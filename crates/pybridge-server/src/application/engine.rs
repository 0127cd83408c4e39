//! Call contract for the embedded execution engine.
//!
//! The engine performs the actual work behind every command: running Python
//! code, inspecting the visualization pipeline, capturing screenshots, and
//! keeping the command history with its restorable snapshots. The bridge only
//! routes requests to it and relays the results.
//!
//! All calls are synchronous. At most one connection exists, so at most one
//! command is ever in flight, and the bridge adds no locking of its own; if
//! the engine blocks, the session stalls with it.

use serde_json::Value;
use thiserror::Error;

/// Failure reported by an engine operation.
///
/// The message text is engine-supplied and passed through to clients
/// verbatim. It may be empty, in which case the router substitutes a fixed
/// per-command fallback string.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// An error carrying no engine-supplied text.
    pub fn empty() -> Self {
        Self {
            message: String::new(),
        }
    }
}

/// The execution engine seam.
///
/// `initialize` must be idempotent: the router calls it on every handshake to
/// bring an engine up if it is not ready yet. Payloads are JSON objects and
/// the history is a JSON array; both are relayed opaquely, never interpreted
/// by the bridge.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionEngine: Send {
    fn initialize(&mut self) -> Result<(), EngineError>;

    fn shutdown(&mut self);

    fn is_ready(&self) -> bool;

    fn reset_session(&mut self) -> Result<(), EngineError>;

    fn execute_python(&mut self, code: &str) -> Result<Value, EngineError>;

    fn inspect_pipeline(&mut self) -> Result<Value, EngineError>;

    fn capture_screenshot(&mut self, width: i64, height: i64) -> Result<Value, EngineError>;

    fn get_history(&mut self) -> Result<Value, EngineError>;

    fn restore_snapshot(&mut self, entry_id: i64) -> Result<Value, EngineError>;
}

// ── Detached engine ───────────────────────────────────────────────────────────

/// Engine stub used when the server runs without an embedding host.
///
/// Reports not-ready and fails every operation with a fixed message. The
/// protocol surface stays fully usable: the handshake succeeds with
/// `python_ready = false` and `ping` works, which is exactly the degraded
/// mode a broken embedded engine produces.
#[derive(Debug, Default)]
pub struct DetachedEngine;

impl DetachedEngine {
    fn unavailable() -> EngineError {
        EngineError::new("no execution engine is embedded in this build")
    }
}

impl ExecutionEngine for DetachedEngine {
    fn initialize(&mut self) -> Result<(), EngineError> {
        Err(Self::unavailable())
    }

    fn shutdown(&mut self) {}

    fn is_ready(&self) -> bool {
        false
    }

    fn reset_session(&mut self) -> Result<(), EngineError> {
        Err(Self::unavailable())
    }

    fn execute_python(&mut self, _code: &str) -> Result<Value, EngineError> {
        Err(Self::unavailable())
    }

    fn inspect_pipeline(&mut self) -> Result<Value, EngineError> {
        Err(Self::unavailable())
    }

    fn capture_screenshot(&mut self, _width: i64, _height: i64) -> Result<Value, EngineError> {
        Err(Self::unavailable())
    }

    fn get_history(&mut self) -> Result<Value, EngineError> {
        Err(Self::unavailable())
    }

    fn restore_snapshot(&mut self, _entry_id: i64) -> Result<Value, EngineError> {
        Err(Self::unavailable())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
