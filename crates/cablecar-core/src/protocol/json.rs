//! JSON text profile.

use crate::error::{CableError, Result};

use super::envelope::{Envelope, WireMessage};

pub fn encode(env: &Envelope) -> Result<String> {
    serde_json::to_string(&WireMessage::from(env))
        .map_err(|e| CableError::Send(format!("json encode failed: {e}")))
}

pub fn decode(s: &str) -> Result<Envelope> {
    let wire: WireMessage = serde_json::from_str(s)
        .map_err(|e| CableError::Protocol(format!("invalid json frame: {e}")))?;
    Ok(wire.into())
}
