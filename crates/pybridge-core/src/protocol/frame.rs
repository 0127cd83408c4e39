//! Length-prefixed JSON framing for the control channel.
//!
//! Wire format:
//! ```text
//! [payload_len:4][payload:N]
//! ```
//! `payload_len` is an unsigned big-endian byte count and the payload is
//! exactly one compact-encoded JSON object. Inbound frames declaring more
//! than [`MAX_FRAME_BYTES`] are rejected before any payload is read.
//!
//! TCP is a stream protocol: a single read may deliver less than one frame or
//! several frames at once. [`extract_messages`] therefore works against a
//! caller-owned accumulation buffer and consumes only whole frames, so the
//! decode loop can be re-entered after every read with whatever bytes remain.

use serde_json::Value;
use thiserror::Error;

/// Hard cap on the declared payload length of an inbound frame.
pub const MAX_FRAME_BYTES: u32 = 25 * 1024 * 1024;

/// Errors that can occur while extracting frames from a read buffer.
///
/// Both variants are fatal for the connection that produced them; there is no
/// way to resynchronise a length-prefixed stream after a bad prefix or
/// payload.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The 4-byte prefix declares a payload larger than [`MAX_FRAME_BYTES`].
    ///
    /// The prefix is left unconsumed in the buffer.
    #[error("incoming frame of {declared} bytes exceeds the maximum allowed size")]
    FrameTooLarge { declared: u32 },

    /// The payload was not parseable as a JSON object.
    ///
    /// The offending frame has already been consumed from the buffer.
    #[error("received malformed JSON payload: {0}")]
    MalformedPayload(String),
}

/// Encodes `message` into a single length-prefixed frame.
///
/// The payload is compact JSON with no embedded whitespace. Outbound frames
/// are not size-checked; the [`MAX_FRAME_BYTES`] cap applies to inbound
/// traffic only.
pub fn encode_message(message: &Value) -> Vec<u8> {
    // Serializing a `Value` cannot fail: every variant maps to valid JSON.
    let payload = serde_json::to_vec(message).expect("serialize JSON value");

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Extracts every complete frame currently buffered, consuming them in place.
///
/// Returns the decoded JSON objects in arrival order. A buffer holding less
/// than a full prefix, or a prefix declaring more bytes than are buffered, is
/// not an error: the collected messages are returned and the remaining bytes
/// stay in `buffer` for the next call.
///
/// # Errors
///
/// Returns [`FrameError::FrameTooLarge`] for an oversized prefix (prefix left
/// in place) and [`FrameError::MalformedPayload`] when a complete frame does
/// not hold a JSON object (frame already consumed). Messages decoded before
/// the failure are dropped; callers treat either error as fatal and tear the
/// connection down.
pub fn extract_messages(buffer: &mut Vec<u8>) -> Result<Vec<Value>, FrameError> {
    let mut messages = Vec::new();

    loop {
        if buffer.len() < 4 {
            return Ok(messages);
        }

        // Peek the prefix without consuming it; an oversized declaration must
        // leave the buffer untouched.
        let declared = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        if declared > MAX_FRAME_BYTES {
            return Err(FrameError::FrameTooLarge { declared });
        }

        let total = 4 + declared as usize;
        if buffer.len() < total {
            return Ok(messages);
        }

        let payload: Vec<u8> = buffer[4..total].to_vec();
        buffer.drain(..total);

        let parsed: Value = serde_json::from_slice(&payload)
            .map_err(|e| FrameError::MalformedPayload(e.to_string()))?;
        if !parsed.is_object() {
            return Err(FrameError::MalformedPayload(
                "payload is not a JSON object".to_string(),
            ));
        }

        messages.push(parsed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
