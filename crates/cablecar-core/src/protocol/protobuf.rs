//! Protobuf binary profile (panic-free).
//!
//! Layout of the AnyCable `action_cable.Message`:
//!
//! | field | number | wire type |
//! |-------|--------|-----------|
//! | type | 1 | varint (enum) |
//! | command | 2 | varint (enum) |
//! | identifier | 3 | length-delimited string |
//! | data | 4 | length-delimited string |
//! | message | 5 | length-delimited bytes (MessagePack) |
//! | reason | 6 | length-delimited string |
//! | reconnect | 7 | varint (bool) |
//!
//! Parsing rules:
//! - Never index (`buf[0]`); always use `Buf` and `remaining()` checks.
//! - Unknown fields are skipped, proto3 defaults are not written.
//!
//! The `message` payload has the same limits as the MessagePack profile:
//! it must be JSON-representable, otherwise the frame is a `Protocol` error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{CableError, Result};

use super::envelope::{Command, Envelope, Kind};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const FIELD_TYPE: u32 = 1;
const FIELD_COMMAND: u32 = 2;
const FIELD_IDENTIFIER: u32 = 3;
const FIELD_DATA: u32 = 4;
const FIELD_MESSAGE: u32 = 5;
const FIELD_REASON: u32 = 6;
const FIELD_RECONNECT: u32 = 7;

fn kind_to_wire(kind: &Kind) -> Result<u64> {
    Ok(match kind {
        Kind::Welcome => 1,
        Kind::Disconnect => 2,
        Kind::Ping => 3,
        Kind::ConfirmSubscription => 4,
        Kind::RejectSubscription => 5,
        Kind::Other(s) if s == "confirm_history" => 6,
        Kind::Other(s) if s == "reject_history" => 7,
        Kind::Other(s) => {
            return Err(CableError::Send(format!(
                "type `{s}` has no protobuf representation"
            )))
        }
    })
}

fn kind_from_wire(v: u64) -> Option<Kind> {
    match v {
        0 => None,
        1 => Some(Kind::Welcome),
        2 => Some(Kind::Disconnect),
        3 => Some(Kind::Ping),
        4 => Some(Kind::ConfirmSubscription),
        5 => Some(Kind::RejectSubscription),
        6 => Some(Kind::Other("confirm_history".into())),
        7 => Some(Kind::Other("reject_history".into())),
        n => Some(Kind::Other(format!("type_{n}"))),
    }
}

fn command_to_wire(cmd: &Command) -> Result<u64> {
    Ok(match cmd {
        Command::Subscribe => 1,
        Command::Unsubscribe => 2,
        Command::Message => 3,
        Command::Other(s) if s == "history" => 4,
        Command::Other(s) if s == "pong" => 5,
        Command::Other(s) => {
            return Err(CableError::Send(format!(
                "command `{s}` has no protobuf representation"
            )))
        }
    })
}

fn command_from_wire(v: u64) -> Option<Command> {
    match v {
        0 => None,
        1 => Some(Command::Subscribe),
        2 => Some(Command::Unsubscribe),
        3 => Some(Command::Message),
        4 => Some(Command::Other("history".into())),
        5 => Some(Command::Other("pong".into())),
        n => Some(Command::Other(format!("command_{n}"))),
    }
}

/// Encode an envelope. `message` is MessagePack-encoded into field 5.
pub fn encode(env: &Envelope) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);

    if let Some(kind) = &env.kind {
        put_varint_field(&mut buf, FIELD_TYPE, kind_to_wire(kind)?);
    }
    if let Some(cmd) = &env.command {
        put_varint_field(&mut buf, FIELD_COMMAND, command_to_wire(cmd)?);
    }
    if let Some(id) = env.identifier.as_deref().filter(|s| !s.is_empty()) {
        put_len_field(&mut buf, FIELD_IDENTIFIER, id.as_bytes());
    }
    if let Some(data) = env.data.as_deref().filter(|s| !s.is_empty()) {
        put_len_field(&mut buf, FIELD_DATA, data.as_bytes());
    }
    if let Some(message) = &env.message {
        let packed = rmp_serde::to_vec(message)
            .map_err(|e| CableError::Send(format!("msgpack payload encode failed: {e}")))?;
        put_len_field(&mut buf, FIELD_MESSAGE, &packed);
    }
    if let Some(reason) = env.reason.as_deref().filter(|s| !s.is_empty()) {
        put_len_field(&mut buf, FIELD_REASON, reason.as_bytes());
    }
    if let Some(true) = env.reconnect {
        put_varint_field(&mut buf, FIELD_RECONNECT, 1);
    }

    Ok(buf.freeze())
}

/// Decode a protobuf frame, unpacking the embedded MessagePack payload.
pub fn decode(mut buf: Bytes) -> Result<Envelope> {
    let mut env = Envelope::default();

    while buf.has_remaining() {
        let key = get_varint(&mut buf)?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| CableError::Protocol("protobuf field number out of range".into()))?;
        let wire_type = (key & 0x07) as u8;

        match (field, wire_type) {
            (FIELD_TYPE, WIRE_VARINT) => env.kind = kind_from_wire(get_varint(&mut buf)?),
            (FIELD_COMMAND, WIRE_VARINT) => env.command = command_from_wire(get_varint(&mut buf)?),
            (FIELD_IDENTIFIER, WIRE_LEN) => env.identifier = Some(get_string(&mut buf)?),
            (FIELD_DATA, WIRE_LEN) => env.data = Some(get_string(&mut buf)?),
            (FIELD_MESSAGE, WIRE_LEN) => {
                let raw = get_len_delimited(&mut buf)?;
                if !raw.is_empty() {
                    let value: Value = rmp_serde::from_slice(&raw).map_err(|e| {
                        CableError::Protocol(format!("invalid msgpack payload: {e}"))
                    })?;
                    env.message = Some(value);
                }
            }
            (FIELD_REASON, WIRE_LEN) => env.reason = Some(get_string(&mut buf)?),
            (FIELD_RECONNECT, WIRE_VARINT) => env.reconnect = Some(get_varint(&mut buf)? != 0),
            (_, wt) => skip_field(&mut buf, wt)?,
        }
    }

    Ok(env)
}

fn put_varint(buf: &mut BytesMut, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

fn put_key(buf: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

fn put_varint_field(buf: &mut BytesMut, field: u32, v: u64) {
    put_key(buf, field, WIRE_VARINT);
    put_varint(buf, v);
}

fn put_len_field(buf: &mut BytesMut, field: u32, bytes: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(CableError::Protocol("truncated varint".into()));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CableError::Protocol("varint longer than 10 bytes".into()))
}

fn get_len_delimited(buf: &mut Bytes) -> Result<Bytes> {
    let len = usize::try_from(get_varint(buf)?)
        .map_err(|_| CableError::Protocol("length prefix out of range".into()))?;
    if buf.remaining() < len {
        return Err(CableError::Protocol(format!(
            "length prefix {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_len_delimited(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| CableError::Protocol(format!("invalid utf-8 in string field: {e}")))
}

fn skip_field(buf: &mut Bytes, wire_type: u8) -> Result<()> {
    let need = match wire_type {
        WIRE_VARINT => return get_varint(buf).map(|_| ()),
        WIRE_LEN => return get_len_delimited(buf).map(|_| ()),
        WIRE_FIXED64 => 8,
        WIRE_FIXED32 => 4,
        other => {
            return Err(CableError::Protocol(format!(
                "unsupported protobuf wire type {other}"
            )))
        }
    };
    if buf.remaining() < need {
        return Err(CableError::Protocol("truncated fixed-width field".into()));
    }
    buf.advance(need);
    Ok(())
}
