//! Protocol module containing the framing codec and the response envelopes.

pub mod envelope;
pub mod frame;

pub use envelope::{
    default_host, error_response, is_loopback_host, success_response, ErrorCode, DEFAULT_PORT,
    PROTOCOL_VERSION,
};
pub use frame::{encode_message, extract_messages, FrameError, MAX_FRAME_BYTES};
