//! Request routing: validates inbound messages and dispatches them to the
//! execution engine.
//!
//! The router owns no mutable state and is reused across connections. Each
//! call takes one parsed message, the session's current handshake flag, and
//! the configured auth token, and returns a [`RouterOutcome`] describing
//! everything the bridge must apply: the response to send, side-channel
//! events, and whether the connection must be closed and the engine session
//! reset.
//!
//! # Failure classification
//!
//! - Handshake failures (`HANDSHAKE_REQUIRED`, `PROTOCOL_MISMATCH`,
//!   `AUTH_FAILED`) are fatal: close + reset.
//! - Command failures (bad params, unknown command, engine errors) are
//!   recoverable: the session stays attached and handshaken.
//! - A broken engine does not fail the handshake; it degrades the success
//!   payload to `python_ready = false` so basic protocol interaction such as
//!   `ping` keeps working.

use serde_json::{json, Map, Value};

use pybridge_core::protocol::{error_response, success_response, ErrorCode, PROTOCOL_VERSION};

use crate::application::engine::{EngineError, ExecutionEngine};

/// Capabilities advertised in the handshake response.
const CAPABILITIES: [&str; 4] = [
    "ping",
    "execute_python",
    "inspect_pipeline",
    "capture_screenshot",
];

/// Everything the bridge must apply after routing one message.
///
/// Produced once per inbound message and consumed once; the application order
/// is log, history event, response, handshake flag, close.
#[derive(Debug, Default)]
pub struct RouterOutcome {
    /// Response to frame and send, if any.
    pub response: Option<Value>,
    /// Close the connection after this outcome is applied.
    pub close_connection: bool,
    /// Reset the engine session as part of closing.
    pub reset_session: bool,
    /// The handshake finished; mark the session handshaken.
    pub handshake_completed: bool,
    /// Log line for the operator console.
    pub log_message: Option<String>,
    /// Compact JSON array for the operator history view.
    pub history_json: Option<String>,
}

/// Stateless dispatcher for the control channel.
#[derive(Debug, Default)]
pub struct RequestRouter;

impl RequestRouter {
    pub fn new() -> Self {
        Self
    }

    /// Routes one decoded message.
    ///
    /// Until the handshake completes the only acceptable message type is
    /// `hello`; everything else is a fatal protocol error.
    pub fn handle_message(
        &self,
        message: &Value,
        handshake_complete: bool,
        auth_token: &str,
        engine: &mut dyn ExecutionEngine,
    ) -> RouterOutcome {
        if !handshake_complete {
            if string_field(message, "type") != "hello" {
                return Self::protocol_error(
                    ErrorCode::HandshakeRequired,
                    "The first request on a new connection must be 'hello'",
                );
            }
            return self.handle_hello(message, auth_token, engine);
        }

        self.handle_command(message, engine)
    }

    /// Rejection sent to a connection that lost the single-client slot.
    ///
    /// Carries a placeholder (empty) request id and no close flags: the
    /// listener closes the rejected socket itself, and the rejected
    /// connection never becomes a session.
    pub fn busy_result() -> RouterOutcome {
        RouterOutcome {
            response: Some(error_response(
                "",
                ErrorCode::ClientBusy,
                "Another client is already connected",
                None,
            )),
            ..RouterOutcome::default()
        }
    }

    /// Fatal protocol failure: respond, then close the connection and reset
    /// the engine session.
    pub fn protocol_error(code: ErrorCode, message: &str) -> RouterOutcome {
        RouterOutcome {
            response: Some(error_response("", code, message, None)),
            close_connection: true,
            reset_session: true,
            ..RouterOutcome::default()
        }
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    fn handle_hello(
        &self,
        message: &Value,
        auth_token: &str,
        engine: &mut dyn ExecutionEngine,
    ) -> RouterOutcome {
        let request_id = string_field(message, "request_id");

        let submitted_version = message
            .get("protocol_version")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if submitted_version != PROTOCOL_VERSION {
            return RouterOutcome {
                response: Some(error_response(
                    request_id,
                    ErrorCode::ProtocolMismatch,
                    "The requested protocol version is not supported",
                    Some(json!({
                        "expected": PROTOCOL_VERSION,
                        "received": submitted_version,
                    })),
                )),
                close_connection: true,
                reset_session: true,
                ..RouterOutcome::default()
            };
        }

        if string_field(message, "auth_token") != auth_token {
            return RouterOutcome {
                response: Some(error_response(
                    request_id,
                    ErrorCode::AuthFailed,
                    "The authentication token was rejected",
                    None,
                )),
                close_connection: true,
                reset_session: true,
                ..RouterOutcome::default()
            };
        }

        // Bring the engine up and give the client a fresh session. A failure
        // here does not fail the handshake: the channel stays open with
        // python_ready = false so the client can still ping and reconnect
        // once the engine recovers.
        let mut log_message = None;
        let mut python_ready = match engine.initialize() {
            Ok(()) => true,
            Err(e) => {
                log_message = Some(e.message);
                false
            }
        };
        if python_ready {
            if let Err(e) = engine.reset_session() {
                python_ready = false;
                log_message = Some(e.message);
            }
        }

        RouterOutcome {
            response: Some(success_response(
                request_id,
                json!({
                    "protocol_version": PROTOCOL_VERSION,
                    "plugin_version": env!("CARGO_PKG_VERSION"),
                    "python_ready": python_ready,
                    "capabilities": CAPABILITIES,
                }),
            )),
            handshake_completed: true,
            log_message,
            ..RouterOutcome::default()
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn handle_command(&self, message: &Value, engine: &mut dyn ExecutionEngine) -> RouterOutcome {
        let request_id = string_field(message, "request_id");
        let params = message.get("params").and_then(Value::as_object);

        match string_field(message, "type") {
            "ping" => Self::success(request_id, json!({"ok": true})),
            "execute_python" => Self::execute_python(request_id, params, engine),
            "inspect_pipeline" => Self::inspect_pipeline(request_id, engine),
            "capture_screenshot" => Self::capture_screenshot(request_id, params, engine),
            "get_history" => Self::get_history(request_id, engine),
            "restore_snapshot" => Self::restore_snapshot(request_id, params, engine),
            _ => Self::error(
                request_id,
                ErrorCode::UnknownCommand,
                "The requested command is not supported",
                None,
            ),
        }
    }

    fn execute_python(
        request_id: &str,
        params: Option<&Map<String, Value>>,
        engine: &mut dyn ExecutionEngine,
    ) -> RouterOutcome {
        let code = param_str(params, "code");
        if code.is_empty() {
            return Self::error(
                request_id,
                ErrorCode::InvalidParams,
                "execute_python requires a non-empty 'code' string",
                None,
            );
        }

        match engine.execute_python(code) {
            Ok(result) => {
                let mut outcome = Self::success(request_id, result);
                outcome.history_json = fetch_history_best_effort(engine);
                outcome
            }
            Err(e) => Self::error(
                request_id,
                ErrorCode::PythonBridgeError,
                &fallback(e, "Python execution failed"),
                None,
            ),
        }
    }

    fn inspect_pipeline(request_id: &str, engine: &mut dyn ExecutionEngine) -> RouterOutcome {
        match engine.inspect_pipeline() {
            Ok(result) => {
                let mut outcome = Self::success(request_id, result);
                outcome.history_json = fetch_history_best_effort(engine);
                outcome
            }
            Err(e) => Self::error(
                request_id,
                ErrorCode::PipelineError,
                &fallback(e, "Unable to inspect the pipeline"),
                None,
            ),
        }
    }

    fn capture_screenshot(
        request_id: &str,
        params: Option<&Map<String, Value>>,
        engine: &mut dyn ExecutionEngine,
    ) -> RouterOutcome {
        let width = param_i64(params, "width", 1600);
        let height = param_i64(params, "height", 900);

        match engine.capture_screenshot(width, height) {
            Ok(result) => {
                let mut outcome = Self::success(request_id, result);
                outcome.history_json = fetch_history_best_effort(engine);
                outcome
            }
            Err(e) => Self::error(
                request_id,
                ErrorCode::ScreenshotError,
                &fallback(e, "Unable to capture a screenshot"),
                None,
            ),
        }
    }

    fn get_history(request_id: &str, engine: &mut dyn ExecutionEngine) -> RouterOutcome {
        match engine.get_history() {
            Ok(history) => {
                let mut outcome =
                    Self::success(request_id, json!({"history": history.clone()}));
                outcome.history_json = Some(compact(&history));
                outcome
            }
            Err(e) => Self::error(
                request_id,
                ErrorCode::HistoryError,
                &fallback(e, "Unable to retrieve history"),
                None,
            ),
        }
    }

    fn restore_snapshot(
        request_id: &str,
        params: Option<&Map<String, Value>>,
        engine: &mut dyn ExecutionEngine,
    ) -> RouterOutcome {
        let entry_id = param_i64(params, "entry_id", -1);
        if entry_id < 1 {
            return Self::error(
                request_id,
                ErrorCode::InvalidParams,
                "restore_snapshot requires a positive 'entry_id' integer",
                None,
            );
        }

        match engine.restore_snapshot(entry_id) {
            Ok(result) => {
                let mut outcome = Self::success(request_id, result);
                // A restore truncates the history, so the console view is
                // refreshed right away. The restore itself already succeeded;
                // a failed refresh only costs the event.
                match engine.get_history() {
                    Ok(history) => outcome.history_json = Some(compact(&history)),
                    Err(e) => {
                        outcome.log_message = Some(fallback(e, "Unable to retrieve history"));
                    }
                }
                outcome
            }
            Err(e) => Self::error(
                request_id,
                ErrorCode::RestoreError,
                &fallback(e, "Unable to restore snapshot"),
                None,
            ),
        }
    }

    // ── Outcome constructors ──────────────────────────────────────────────────

    fn success(request_id: &str, result: Value) -> RouterOutcome {
        RouterOutcome {
            response: Some(success_response(request_id, result)),
            ..RouterOutcome::default()
        }
    }

    fn error(
        request_id: &str,
        code: ErrorCode,
        message: &str,
        details: Option<Value>,
    ) -> RouterOutcome {
        RouterOutcome {
            response: Some(error_response(request_id, code, message, details)),
            ..RouterOutcome::default()
        }
    }
}

// ── Field access helpers ──────────────────────────────────────────────────────

fn string_field<'a>(message: &'a Value, key: &str) -> &'a str {
    message.get(key).and_then(Value::as_str).unwrap_or("")
}

fn param_str<'a>(params: Option<&'a Map<String, Value>>, key: &str) -> &'a str {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn param_i64(params: Option<&Map<String, Value>>, key: &str, default: i64) -> i64 {
    params
        .and_then(|p| p.get(key))
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

/// Substitutes the per-command fallback when the engine supplied no text.
fn fallback(e: EngineError, default: &str) -> String {
    if e.message.is_empty() {
        default.to_string()
    } else {
        e.message
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// History side-channel for commands where a stale console view is harmless.
fn fetch_history_best_effort(engine: &mut dyn ExecutionEngine) -> Option<String> {
    engine.get_history().ok().map(|history| compact(&history))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
