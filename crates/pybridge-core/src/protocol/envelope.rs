//! Response envelopes, error codes, and protocol constants.
//!
//! Every response on the control channel is one of two envelope shapes:
//!
//! ```json
//! {"request_id":"…","status":"success","result":{…}}
//! {"request_id":"…","status":"error","error":{"code":"…","message":"…","details":{…}}}
//! ```
//!
//! `request_id` always echoes the inbound request verbatim (empty string when
//! the client sent none), and `details` is present only when a code carries
//! structured context (currently only `PROTOCOL_MISMATCH`).

use serde_json::{json, Map, Value};

/// Protocol version negotiated during the `hello` handshake.
pub const PROTOCOL_VERSION: i64 = 2;

/// Default TCP port of the control channel listener.
pub const DEFAULT_PORT: u16 = 9877;

/// Default listen host.
pub fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Returns `true` when `host` is one of the recognized loopback forms.
///
/// Only the literal forms `127.0.0.1`, `localhost`, and `::1` count; anything
/// else is treated as a potentially routable address.
pub fn is_loopback_host(host: &str) -> bool {
    let normalized = host.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "127.0.0.1" | "localhost" | "::1")
}

// ── Error codes ───────────────────────────────────────────────────────────────

/// Error codes carried in the `error.code` field of a response envelope.
///
/// Handshake and framing codes (`HANDSHAKE_REQUIRED`, `PROTOCOL_MISMATCH`,
/// `AUTH_FAILED`, `PROTOCOL_ERROR`) are fatal for the connection; command
/// codes leave the session usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    HandshakeRequired,
    ProtocolMismatch,
    AuthFailed,
    ClientBusy,
    ProtocolError,
    InvalidParams,
    PythonBridgeError,
    PipelineError,
    ScreenshotError,
    HistoryError,
    RestoreError,
    UnknownCommand,
}

impl ErrorCode {
    /// The wire string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::HandshakeRequired => "HANDSHAKE_REQUIRED",
            ErrorCode::ProtocolMismatch => "PROTOCOL_MISMATCH",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ClientBusy => "CLIENT_BUSY",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::PythonBridgeError => "PYTHON_BRIDGE_ERROR",
            ErrorCode::PipelineError => "PIPELINE_ERROR",
            ErrorCode::ScreenshotError => "SCREENSHOT_ERROR",
            ErrorCode::HistoryError => "HISTORY_ERROR",
            ErrorCode::RestoreError => "RESTORE_ERROR",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope builders ─────────────────────────────────────────────────────────

/// Builds a success envelope echoing `request_id`.
pub fn success_response(request_id: &str, result: Value) -> Value {
    json!({
        "request_id": request_id,
        "status": "success",
        "result": result,
    })
}

/// Builds an error envelope. `details` is omitted entirely when `None`.
pub fn error_response(
    request_id: &str,
    code: ErrorCode,
    message: &str,
    details: Option<Value>,
) -> Value {
    let mut error = Map::new();
    error.insert("code".to_string(), Value::String(code.as_str().to_string()));
    error.insert("message".to_string(), Value::String(message.to_string()));
    if let Some(details) = details {
        error.insert("details".to_string(), details);
    }

    json!({
        "request_id": request_id,
        "status": "error",
        "error": Value::Object(error),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
