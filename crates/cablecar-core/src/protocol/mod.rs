//! Protocol modules (envelope + three wire profiles).
//!
//! - JSON: text frames, ActionCable field names.
//! - MessagePack: binary frames with the same field names.
//! - Protobuf: binary frames with enumerated type/command and a MessagePack
//!   payload embedded as bytes.
//!
//! All decoders are panic-free: malformed input is reported as
//! `CableError::Protocol`.

pub mod envelope;
pub mod json;
pub mod msgpack;
pub mod protobuf;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{CableError, Result};

pub use envelope::{Command, Envelope, Kind};

/// Transport-agnostic frame: what a WebSocket text or binary message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    fn opcode(&self) -> &'static str {
        match self {
            WireFrame::Text(_) => "text",
            WireFrame::Binary(_) => "binary",
        }
    }
}

/// Wire profile negotiated through the WebSocket sub-protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    Msgpack,
    Protobuf,
}

impl Codec {
    /// `Sec-WebSocket-Protocol` token announced by the client.
    pub fn subprotocol(self) -> &'static str {
        match self {
            Codec::Json => "actioncable-v1-json",
            Codec::Msgpack => "actioncable-v1-msgpack",
            Codec::Protobuf => "actioncable-v1-protobuf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Msgpack => "msgpack",
            Codec::Protobuf => "protobuf",
        }
    }

    pub fn encode(self, env: &Envelope) -> Result<WireFrame> {
        match self {
            Codec::Json => json::encode(env).map(WireFrame::Text),
            Codec::Msgpack => msgpack::encode(env).map(WireFrame::Binary),
            Codec::Protobuf => protobuf::encode(env).map(WireFrame::Binary),
        }
    }

    /// Decode one frame. A frame with the wrong opcode for the profile is a
    /// protocol error, not something to skip.
    pub fn decode(self, frame: WireFrame) -> Result<Envelope> {
        match (self, frame) {
            (Codec::Json, WireFrame::Text(s)) => json::decode(&s),
            (Codec::Msgpack, WireFrame::Binary(b)) => msgpack::decode(&b),
            (Codec::Protobuf, WireFrame::Binary(b)) => protobuf::decode(b),
            (codec, other) => Err(CableError::Protocol(format!(
                "unexpected {} frame for {} codec",
                other.opcode(),
                codec.as_str()
            ))),
        }
    }
}
