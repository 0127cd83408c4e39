//! State for the single attached client connection.

use tokio::net::TcpStream;

/// Per-connection mutable state: the transport handle, the accumulated read
/// buffer, and the handshake flag.
///
/// Exactly one `Session` value exists; the bridge owns it and reuses it
/// across connections via [`attach`](Session::attach) /
/// [`clear`](Session::clear).
#[derive(Debug, Default)]
pub struct Session {
    stream: Option<TcpStream>,
    read_buffer: Vec<u8>,
    handshake_complete: bool,
}

impl Session {
    /// Binds a freshly accepted connection: empty buffer, handshake pending.
    pub fn attach(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
        self.read_buffer.clear();
        self.handshake_complete = false;
    }

    /// Detaches the transport and resets buffer and handshake flag.
    ///
    /// Returns the stream so the caller decides between a graceful shutdown
    /// and an immediate drop.
    pub fn clear(&mut self) -> Option<TcpStream> {
        self.read_buffer.clear();
        self.handshake_complete = false;
        self.stream.take()
    }

    pub fn has_client(&self) -> bool {
        self.stream.is_some()
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn set_handshake_complete(&mut self, value: bool) {
        self.handshake_complete = value;
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.read_buffer
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
