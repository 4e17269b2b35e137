//! Canonical envelope shared by every wire profile.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control frame kind (`type` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Welcome,
    Ping,
    ConfirmSubscription,
    RejectSubscription,
    Disconnect,
    /// Any other server type (e.g. `confirm_history`), kept verbatim.
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Welcome => "welcome",
            Kind::Ping => "ping",
            Kind::ConfirmSubscription => "confirm_subscription",
            Kind::RejectSubscription => "reject_subscription",
            Kind::Disconnect => "disconnect",
            Kind::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "welcome" => Kind::Welcome,
            "ping" => Kind::Ping,
            "confirm_subscription" => Kind::ConfirmSubscription,
            "reject_subscription" => Kind::RejectSubscription,
            "disconnect" => Kind::Disconnect,
            other => Kind::Other(other.to_owned()),
        }
    }
}

/// Client command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Subscribe,
    Unsubscribe,
    Message,
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::Message => "message",
            Command::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "subscribe" => Command::Subscribe,
            "unsubscribe" => Command::Unsubscribe,
            "message" => Command::Message,
            other => Command::Other(other.to_owned()),
        }
    }
}

/// Decoded unit of communication, control or data.
///
/// Data frames carry `message` and no `kind`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub kind: Option<Kind>,
    pub command: Option<Command>,
    pub identifier: Option<String>,
    /// Serialized `{action, ...attributes}` of an outbound `message` command.
    pub data: Option<String>,
    /// Inbound payload.
    pub message: Option<Value>,
    /// Disconnect reason sent by the server.
    pub reason: Option<String>,
    pub reconnect: Option<bool>,
    /// Stamped by the transport when the frame is decoded.
    pub received_at: Option<Instant>,
}

impl Envelope {
    pub fn subscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: Some(Command::Subscribe),
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }

    pub fn perform(identifier: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            command: Some(Command::Message),
            identifier: Some(identifier.into()),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn control(kind: Kind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Control frame addressed to a channel (confirm/reject).
    pub fn ack(kind: Kind, identifier: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }

    /// Data frame pushed to a channel.
    pub fn broadcast(identifier: impl Into<String>, message: Value) -> Self {
        Self {
            identifier: Some(identifier.into()),
            message: Some(message),
            ..Self::default()
        }
    }

    pub fn is_kind(&self, kind: &Kind) -> bool {
        self.kind.as_ref() == Some(kind)
    }
}

/// Serde shape shared by the JSON and MessagePack profiles.
///
/// Unknown fields (`sid`, `restored`, ...) are tolerated: servers add
/// extensions the load generator does not care about.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,
}

impl From<&Envelope> for WireMessage {
    fn from(env: &Envelope) -> Self {
        Self {
            kind: env.kind.as_ref().map(|k| k.as_str().to_owned()),
            command: env.command.as_ref().map(|c| c.as_str().to_owned()),
            identifier: env.identifier.clone(),
            data: env.data.clone(),
            message: env.message.clone(),
            reason: env.reason.clone(),
            reconnect: env.reconnect,
        }
    }
}

impl From<WireMessage> for Envelope {
    fn from(wire: WireMessage) -> Self {
        Self {
            kind: wire.kind.as_deref().map(Kind::parse),
            command: wire.command.as_deref().map(Command::parse),
            identifier: wire.identifier,
            data: wire.data,
            message: wire.message,
            reason: wire.reason,
            reconnect: wire.reconnect,
            received_at: None,
        }
    }
}
