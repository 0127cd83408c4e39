//! Operator console events emitted by the bridge.
//!
//! The console (status line, log pane, history view) subscribes once, at
//! bridge construction, and receives events in emission order over an
//! unbounded channel. Sending never blocks the bridge task.

use tokio::sync::mpsc;

/// Events surfaced to the operator console.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Short status text: `Listening`, `Client connected`, `Stopped`, `Error`.
    StatusChanged(String),
    /// Free-form log line.
    LogChanged(String),
    /// Compact JSON array of command history entries, relayed opaquely.
    HistoryChanged(String),
}

/// Sending half of the bridge event channel.
///
/// A dropped receiver is tolerated: the bridge keeps serving clients without
/// an attached console.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl EventSink {
    /// Creates a sink together with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn status(&self, status: impl Into<String>) {
        let _ = self.tx.send(BridgeEvent::StatusChanged(status.into()));
    }

    pub fn log(&self, message: impl Into<String>) {
        let _ = self.tx.send(BridgeEvent::LogChanged(message.into()));
    }

    pub fn history(&self, history_json: impl Into<String>) {
        let _ = self.tx.send(BridgeEvent::HistoryChanged(history_json.into()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
