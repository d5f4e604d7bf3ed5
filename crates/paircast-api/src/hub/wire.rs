//! Hub framing: MessagePack-encoded frames with optional LZ4
//! compression.
//!
//! Every frame is one transport message. The first byte is a marker
//! (raw or compressed), the remainder is the MessagePack body.
//! Invocation and push payloads are opaque byte strings encoded by the
//! caller, so the framing layer never needs to know argument types.

use std::fmt;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Protocol revision spoken by this client.
pub const WIRE_VERSION: u16 = 1;

/// Application API level advertised during session setup.
pub const API_VERSION: u16 = 12;

/// Bodies at or above this size are LZ4-compressed.
const COMPRESSION_THRESHOLD: usize = 256;

const MARKER_RAW: u8 = 0x00;
const MARKER_LZ4: u8 = 0x01;

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on every fresh transport.
    Handshake { version: u16 },
    /// Server accepts the handshake.
    HandshakeAck,
    /// Liveness probe; either side replies with another ping.
    Ping,
    /// Client-to-server call expecting a completion.
    Invocation {
        id: u32,
        target: String,
        payload: Vec<u8>,
    },
    /// Reply to an invocation. Exactly one of `result` and `error` is
    /// set.
    Completion {
        id: u32,
        result: Option<Vec<u8>>,
        error: Option<String>,
    },
    /// One-way message with no completion. Used in both directions.
    Push { target: String, payload: Vec<u8> },
    /// Orderly shutdown notice.
    Close {
        reason: String,
        allow_reconnect: bool,
    },
}

/// Encode a frame, compressing large bodies.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, Error> {
    let body = rmp_serde::to_vec_named(frame)?;
    let mut message;
    if body.len() >= COMPRESSION_THRESHOLD {
        let compressed = compress_prepend_size(&body);
        message = Vec::with_capacity(compressed.len() + 1);
        message.push(MARKER_LZ4);
        message.extend_from_slice(&compressed);
    } else {
        message = Vec::with_capacity(body.len() + 1);
        message.push(MARKER_RAW);
        message.extend_from_slice(&body);
    }
    Ok(message)
}

/// Decode one transport message into a frame.
pub fn decode_frame(message: &[u8]) -> Result<Frame, Error> {
    let Some((&marker, body)) = message.split_first() else {
        return Err(Error::MalformedFrame("empty message".to_string()));
    };
    match marker {
        MARKER_RAW => Ok(rmp_serde::from_slice(body)?),
        MARKER_LZ4 => {
            let body = decompress_size_prepended(body)
                .map_err(|e| Error::MalformedFrame(format!("lz4: {e}")))?;
            Ok(rmp_serde::from_slice(&body)?)
        }
        other => Err(Error::MalformedFrame(format!(
            "unknown marker byte {other:#04x}"
        ))),
    }
}

// ── Session types ────────────────────────────────────────────────────

/// A release version in `major.minor.patch` form.
///
/// Ordering is field-wise, so `2.0.0 > 1.9.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ClientVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Server session descriptor returned by the session-info invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// API level the server speaks; must match [`API_VERSION`].
    pub server_version: u16,
    /// Oldest client release the server accepts.
    pub min_client_version: ClientVersion,
    pub server_name: String,
    #[serde(default)]
    pub online_users: u32,
    #[serde(default)]
    pub motd: Option<String>,
}

// ── Tests ────────────────────────────────────────────────────────────
