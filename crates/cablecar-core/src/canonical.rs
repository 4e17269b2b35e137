//! Canonical JSON encodings.
//!
//! `serde_json::Map` keeps keys sorted, so serializing a `Value::Object`
//! always yields the same string for the same logical content. Identifiers
//! rely on this: `subscribe("Room", {id: 1})` issued twice produces the same
//! identifier and collapses onto one channel.

use serde_json::{Map, Value};

use crate::error::{CableError, Result};

/// Build the channel identifier for `channel` plus its subscription params.
///
/// `params` must be `null` or an object; a `channel` key inside `params` is
/// overridden by `channel`.
pub fn identifier(channel: &str, params: &Value) -> Result<String> {
    let mut obj = object_or_empty(params, "subscription params")?;
    obj.insert("channel".into(), Value::String(channel.to_owned()));
    serde_json::to_string(&Value::Object(obj))
        .map_err(|e| CableError::Send(format!("identifier encode failed: {e}")))
}

/// Serialize the `data` string of a `message` command: `{action, ...attributes}`.
pub fn action_data(action: &str, attributes: &Value) -> Result<String> {
    let mut obj = object_or_empty(attributes, "action attributes")?;
    obj.insert("action".into(), Value::String(action.to_owned()));
    serde_json::to_string(&Value::Object(obj))
        .map_err(|e| CableError::Send(format!("action encode failed: {e}")))
}

/// Round-trip a value through its JSON encoding.
pub fn canonicalize(value: &Value) -> Result<Value> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| CableError::InvalidCondition(format!("encode failed: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| CableError::InvalidCondition(format!("decode failed: {e}")))
}

fn object_or_empty(value: &Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(obj) => Ok(obj.clone()),
        other => Err(CableError::Send(format!(
            "{what} must be an object, got {}",
            type_name(other)
        ))),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn identifier_is_order_independent() {
        let a = identifier("Room", &json!({"id": 1, "kind": "chat"})).unwrap();
        let b = identifier("Room", &json!({"kind": "chat", "id": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"channel":"Room","id":1,"kind":"chat"}"#);
    }

    #[test]
    fn identifier_without_params() {
        assert_eq!(identifier("Bench", &Value::Null).unwrap(), r#"{"channel":"Bench"}"#);
    }

    #[test]
    fn channel_name_wins_over_param() {
        let id = identifier("Room", &json!({"channel": "Other"})).unwrap();
        assert_eq!(id, r#"{"channel":"Room"}"#);
    }

    #[test]
    fn action_data_merges_action() {
        let data = action_data("speak", &json!({"message": "hi"})).unwrap();
        assert_eq!(data, r#"{"action":"speak","message":"hi"}"#);
    }

    #[test]
    fn scalar_params_are_rejected() {
        let err = identifier("Room", &json!(5)).unwrap_err();
        assert_eq!(err.code().as_str(), "SEND");
    }
}
