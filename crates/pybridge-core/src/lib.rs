//! # pybridge-core
//!
//! Shared wire-protocol library for the PyBridge control channel.
//!
//! A host application embeds a Python execution engine and exposes it to a
//! single remote client over a TCP stream socket. This crate defines how
//! bytes travel on that socket:
//!
//! - **`protocol::frame`** – the framing codec. Each frame is a 4-byte
//!   big-endian length prefix followed by one compact-encoded JSON object.
//!   The decoder is incremental: it tolerates partial deliveries and
//!   back-to-back frames in a single read.
//!
//! - **`protocol::envelope`** – the response envelopes
//!   (`{request_id, status, result}` / `{request_id, status, error}`), the
//!   error-code vocabulary, and the protocol constants shared by the server
//!   and its clients.
//!
//! The crate has no dependency on sockets, async runtimes, or the execution
//! engine; everything here is pure data transformation.

pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `pybridge_core::encode_message` instead of the full module path.
pub use protocol::envelope::{
    default_host, error_response, is_loopback_host, success_response, ErrorCode, DEFAULT_PORT,
    PROTOCOL_VERSION,
};
pub use protocol::frame::{encode_message, extract_messages, FrameError, MAX_FRAME_BYTES};
