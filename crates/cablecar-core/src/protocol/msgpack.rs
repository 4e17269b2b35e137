//! MessagePack binary profile.
//!
//! Encoded as a map (`to_vec_named`) so field names match the JSON profile.
//!
//! Payloads decode into `serde_json::Value`, so only the JSON-representable
//! subset of MessagePack is accepted. `bin` and ext values or non-string map
//! keys make the frame a `Protocol` error, which is fatal to the connection.

use bytes::Bytes;

use crate::error::{CableError, Result};

use super::envelope::{Envelope, WireMessage};

pub fn encode(env: &Envelope) -> Result<Bytes> {
    rmp_serde::to_vec_named(&WireMessage::from(env))
        .map(Bytes::from)
        .map_err(|e| CableError::Send(format!("msgpack encode failed: {e}")))
}

pub fn decode(buf: &[u8]) -> Result<Envelope> {
    let wire: WireMessage = rmp_serde::from_slice(buf)
        .map_err(|e| CableError::Protocol(format!("invalid msgpack frame: {e}")))?;
    Ok(wire.into())
}
