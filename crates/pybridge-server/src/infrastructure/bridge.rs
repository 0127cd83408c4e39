//! TCP listener, single-client admission, and the bridge run loop.
//!
//! The [`Bridge`] owns everything with connection lifetime: the listener, the
//! single [`Session`], the active [`ServerConfig`], the router, and the
//! engine. All of it runs on one task: [`Bridge::run`] `select!`s over
//! operator commands, `accept`, and session reads, and a full
//! append→decode→dispatch→respond cycle completes before the next event is
//! examined. That single wakeup source is what preserves strict per-session
//! request ordering without any locking.
//!
//! Embedding hosts either drive a `Bridge` directly (`start`/`stop` plus
//! their own event pump) or spawn [`Bridge::run`] and talk to it through the
//! cloneable [`BridgeHandle`].

use std::net::SocketAddr;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use pybridge_core::protocol::{encode_message, extract_messages, ErrorCode};

use crate::application::engine::ExecutionEngine;
use crate::application::router::{RequestRouter, RouterOutcome};
use crate::domain::config::{ConfigError, ServerConfig};
use crate::domain::events::{BridgeEvent, EventSink};
use crate::infrastructure::session::Session;

/// Errors returned by a start attempt.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The requested configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The bridge task has already exited.
    #[error("the bridge task is no longer running")]
    BridgeGone,
}

// ── Operator handle ───────────────────────────────────────────────────────────

enum BridgeCommand {
    Start {
        config: ServerConfig,
        reply: oneshot::Sender<Result<SocketAddr, StartError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Operator-console handle to a running bridge task.
///
/// Dropping every handle shuts the bridge down.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    /// Starts listening with `config`, implicitly stopping a running listener
    /// first. Returns the bound local address (useful with port 0).
    pub async fn start(&self, config: ServerConfig) -> Result<SocketAddr, StartError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCommand::Start { config, reply })
            .map_err(|_| StartError::BridgeGone)?;
        rx.await.map_err(|_| StartError::BridgeGone)?
    }

    /// Stops the listener and force-closes any attached client. Idempotent;
    /// a bridge that already exited counts as stopped.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(BridgeCommand::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ── The bridge ────────────────────────────────────────────────────────────────

/// One wakeup of the run loop.
enum Wake {
    Command(Option<BridgeCommand>),
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Inbound(std::io::Result<Vec<u8>>),
}

/// The control-channel server: listener, the single session, config, router,
/// and the execution engine.
pub struct Bridge {
    listener: Option<TcpListener>,
    session: Session,
    config: ServerConfig,
    router: RequestRouter,
    engine: Box<dyn ExecutionEngine>,
    events: EventSink,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
}

impl Bridge {
    /// Creates an idle bridge together with its operator handle and event
    /// stream.
    pub fn new(
        engine: Box<dyn ExecutionEngine>,
    ) -> (Self, BridgeHandle, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, event_rx) = EventSink::channel();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let bridge = Self {
            listener: None,
            session: Session::default(),
            config: ServerConfig::default(),
            router: RequestRouter::new(),
            engine,
            events,
            commands,
        };
        (bridge, BridgeHandle { tx: command_tx }, event_rx)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn has_client(&self) -> bool {
        self.session.has_client()
    }

    pub fn handshake_complete(&self) -> bool {
        self.session.handshake_complete()
    }

    /// Validates `config`, binds the listener, and starts accepting.
    ///
    /// A running listener is stopped first, but only after the new
    /// configuration validated; a rejected start leaves the old listener
    /// untouched. The stored config is replaced only on a successful bind.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Config`] or [`StartError::Bind`]; both are also
    /// surfaced as an `Error` status plus a log event.
    pub async fn start(&mut self, config: ServerConfig) -> Result<SocketAddr, StartError> {
        let address = match config.validate_for_listen() {
            Ok(address) => address,
            Err(e) => {
                self.events.status("Error");
                self.events.log(e.to_string());
                return Err(StartError::Config(e));
            }
        };

        if self.listener.is_some() {
            self.stop();
        }

        let bind_addr = SocketAddr::new(address, config.port);
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.events.status("Error");
                self.events.log(format!("failed to bind {bind_addr}: {source}"));
                return Err(StartError::Bind { addr: bind_addr, source });
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartError::Bind { addr: bind_addr, source })?;

        self.listener = Some(listener);
        self.config = config;
        self.events.status("Listening");
        self.events.log(format!(
            "Listening on {}:{}",
            self.config.host.trim(),
            local_addr.port()
        ));
        info!("listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stops listening and force-closes any attached client.
    ///
    /// The client socket is dropped without a final message, and the engine
    /// session is left alone; a full stop is not a mid-session protocol
    /// reset. Idempotent.
    pub fn stop(&mut self) {
        self.listener = None;
        if let Some(stream) = self.session.clear() {
            drop(stream);
        }
        self.events.status("Stopped");
    }

    /// Runs the bridge until every [`BridgeHandle`] is dropped, then stops
    /// the listener and shuts the engine down.
    pub async fn run(mut self) {
        loop {
            match self.next_wake().await {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => break,
                Wake::Accepted(Ok((stream, peer))) => self.handle_accept(stream, peer).await,
                Wake::Accepted(Err(e)) => warn!("accept error: {e}"),
                Wake::Inbound(Ok(chunk)) if chunk.is_empty() => {
                    // EOF: the client closed the connection.
                    debug!("client disconnected");
                    self.close_client(true, true).await;
                }
                Wake::Inbound(Ok(chunk)) => self.handle_bytes(&chunk).await,
                Wake::Inbound(Err(e)) => {
                    self.events.log(format!("socket error: {e}"));
                    self.close_client(true, true).await;
                }
            }
        }

        self.stop();
        self.engine.shutdown();
    }

    /// Waits for the next event from any of the three sources. Disabled
    /// sources (no listener, no client) park on a pending future and are
    /// re-evaluated on the next loop iteration.
    async fn next_wake(&mut self) -> Wake {
        let Self {
            listener,
            session,
            commands,
            ..
        } = self;

        tokio::select! {
            command = commands.recv() => Wake::Command(command),
            accepted = async {
                match listener.as_ref() {
                    Some(listener) => listener.accept().await,
                    None => std::future::pending().await,
                }
            } => Wake::Accepted(accepted),
            inbound = async {
                match session.stream_mut() {
                    Some(stream) => {
                        let mut chunk = [0u8; 4096];
                        stream.read(&mut chunk).await.map(|n| chunk[..n].to_vec())
                    }
                    None => std::future::pending().await,
                }
            } => Wake::Inbound(inbound),
        }
    }

    async fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Start { config, reply } => {
                let result = self.start(config).await;
                let _ = reply.send(result);
            }
            BridgeCommand::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
        }
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    async fn handle_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.session.has_client() {
            Self::reject_busy(stream, peer).await;
            return;
        }

        self.session.attach(stream);
        self.events.status("Client connected");
        self.events.log(format!("Client connected from {peer}"));
        info!("client connected from {peer}");
    }

    /// Sends a single `CLIENT_BUSY` error to a connection that lost the
    /// admission race, then closes it. The rejected connection never becomes
    /// a session and never reaches the handshake path.
    async fn reject_busy(mut stream: TcpStream, peer: SocketAddr) {
        if let Some(response) = RequestRouter::busy_result().response {
            let frame = encode_message(&response);
            if let Err(e) = stream.write_all(&frame).await {
                debug!("failed to deliver busy rejection to {peer}: {e}");
            }
        }
        let _ = stream.shutdown().await;
        debug!("rejected concurrent connection from {peer}");
    }

    // ── Inbound data ──────────────────────────────────────────────────────────

    async fn handle_bytes(&mut self, chunk: &[u8]) {
        self.session.buffer_mut().extend_from_slice(chunk);

        let messages = match extract_messages(self.session.buffer_mut()) {
            Ok(messages) => messages,
            Err(e) => {
                // Framing failures are unrecoverable on a length-prefixed
                // stream: report, close, reset.
                let outcome =
                    RequestRouter::protocol_error(ErrorCode::ProtocolError, &e.to_string());
                self.apply_outcome(outcome).await;
                return;
            }
        };

        for message in messages {
            let outcome = self.router.handle_message(
                &message,
                self.session.handshake_complete(),
                &self.config.auth_token,
                self.engine.as_mut(),
            );
            self.apply_outcome(outcome).await;
            if !self.session.has_client() {
                // A fatal outcome detached the session; drop any messages
                // that were decoded behind it.
                return;
            }
        }
    }

    /// Applies one router outcome: log, history event, response, handshake
    /// flag, then the optional close.
    async fn apply_outcome(&mut self, outcome: RouterOutcome) {
        if let Some(log_message) = &outcome.log_message {
            if !log_message.is_empty() {
                self.events.log(log_message.clone());
            }
        }

        if let Some(history_json) = &outcome.history_json {
            if !history_json.is_empty() {
                self.events.history(history_json.clone());
            }
        }

        if let Some(response) = &outcome.response {
            self.send_response(response).await;
        }

        if outcome.handshake_completed {
            self.session.set_handshake_complete(true);
        }

        if outcome.close_connection {
            self.close_client(outcome.reset_session, true).await;
        }
    }

    async fn send_response(&mut self, response: &Value) {
        let frame = encode_message(response);
        if let Some(stream) = self.session.stream_mut() {
            if let Err(e) = stream.write_all(&frame).await {
                warn!("failed to write response: {e}");
            }
        }
    }

    /// Tears the attached session down.
    ///
    /// Used for disconnects, socket errors, and fatal protocol outcomes. The
    /// engine session is reset only when requested and the engine reports
    /// itself ready; a failed reset is logged, never escalated. `emit_state`
    /// is false during a full stop, which reports its own status.
    async fn close_client(&mut self, reset_session: bool, emit_state: bool) {
        let listening = self.listener.is_some();

        if let Some(mut stream) = self.session.clear() {
            // Graceful shutdown so an already-written final response reaches
            // the peer before the FIN.
            let _ = stream.shutdown().await;
        }

        if reset_session && self.engine.is_ready() {
            if let Err(e) = self.engine.reset_session() {
                let detail = if e.message.is_empty() {
                    "engine session reset failed".to_string()
                } else {
                    e.message
                };
                self.events.log(detail.clone());
                warn!("{detail}");
            }
        }

        if emit_state {
            self.events
                .status(if listening { "Listening" } else { "Stopped" });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::MockExecutionEngine;
    use crate::domain::events::BridgeEvent;

    fn quiet_engine() -> Box<MockExecutionEngine> {
        let mut engine = MockExecutionEngine::new();
        engine.expect_is_ready().return_const(false);
        engine.expect_shutdown().return_const(());
        Box::new(engine)
    }

    fn loopback_config(token: &str) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_with_invalid_config_emits_error_status() {
        let (mut bridge, _handle, mut events) = Bridge::new(quiet_engine());

        let result = bridge
            .start(ServerConfig {
                host: String::new(),
                port: 0,
                auth_token: String::new(),
            })
            .await;

        assert!(matches!(
            result,
            Err(StartError::Config(ConfigError::EmptyHost))
        ));
        assert!(!bridge.is_listening());
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::StatusChanged("Error".to_string()))
        );
        assert!(matches!(
            events.recv().await,
            Some(BridgeEvent::LogChanged(_))
        ));
    }

    #[tokio::test]
    async fn test_start_emits_listening_status_and_log() {
        let (mut bridge, _handle, mut events) = Bridge::new(quiet_engine());

        let addr = bridge.start(loopback_config("")).await.expect("start");

        assert!(bridge.is_listening());
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::StatusChanged("Listening".to_string()))
        );
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::LogChanged(format!(
                "Listening on 127.0.0.1:{}",
                addr.port()
            )))
        );
    }

    #[tokio::test]
    async fn test_start_while_listening_replaces_the_listener() {
        let (mut bridge, _handle, _events) = Bridge::new(quiet_engine());

        let first = bridge.start(loopback_config("")).await.expect("first");
        let second = bridge.start(loopback_config("")).await.expect("second");

        assert!(bridge.is_listening());

        // The first port is free again (unless the OS handed it straight back
        // to the second listener).
        if first.port() != second.port() {
            let rebound = TcpListener::bind(first).await;
            assert!(rebound.is_ok(), "old listener must have been closed");
        }
    }

    #[tokio::test]
    async fn test_rejected_start_leaves_existing_listener_running() {
        let (mut bridge, _handle, _events) = Bridge::new(quiet_engine());

        let addr = bridge.start(loopback_config("")).await.expect("start");
        let result = bridge
            .start(ServerConfig {
                host: "example.com".to_string(),
                port: 0,
                auth_token: "secret".to_string(),
            })
            .await;

        assert!(result.is_err());
        assert!(bridge.is_listening());
        assert!(
            TcpStream::connect(addr).await.is_ok(),
            "the existing listener must still accept"
        );
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let (mut bridge, _handle, mut events) = Bridge::new(quiet_engine());
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let result = bridge
            .start(ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
                auth_token: String::new(),
            })
            .await;

        assert!(matches!(result, Err(StartError::Bind { .. })));
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::StatusChanged("Error".to_string()))
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut bridge, _handle, mut events) = Bridge::new(quiet_engine());
        bridge.start(loopback_config("")).await.expect("start");

        bridge.stop();
        bridge.stop();

        assert!(!bridge.is_listening());
        assert!(!bridge.has_client());

        // Drain: Listening, log, Stopped, Stopped.
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BridgeEvent::StatusChanged(s) = event {
                statuses.push(s);
            }
        }
        assert_eq!(statuses, vec!["Listening", "Stopped", "Stopped"]);
    }
}
