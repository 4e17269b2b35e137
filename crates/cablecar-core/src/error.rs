//! Shared error type across cablecar crates.

use std::time::Duration;

use thiserror::Error;

/// Caller-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Dial or handshake failure, including a missing welcome.
    Connect,
    /// Undecodable frame or unexpected wire opcode.
    Protocol,
    /// Server answered a subscribe with `reject_subscription`.
    SubscriptionRejected,
    /// No ack arrived within the subscribe timeout.
    SubscriptionTimeout,
    /// Encode or write failure on an outbound command.
    Send,
    /// A matcher condition could not be canonicalized.
    InvalidCondition,
    /// Invalid connect options or scenario config.
    Config,
    /// The socket was closed.
    Closed,
    /// Non-fatal transport error.
    WebSocket,
}

impl ErrorCode {
    /// String representation used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Connect => "CONNECT",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::SubscriptionRejected => "SUBSCRIPTION_REJECTED",
            ErrorCode::SubscriptionTimeout => "SUBSCRIPTION_TIMEOUT",
            ErrorCode::Send => "SEND",
            ErrorCode::InvalidCondition => "INVALID_CONDITION",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::WebSocket => "WEBSOCKET",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CableError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum CableError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("subscription rejected: {identifier}")]
    SubscriptionRejected { identifier: String },
    #[error("subscription timeout exceeded after {timeout:?}: {identifier}")]
    SubscriptionTimeout { identifier: String, timeout: Duration },
    #[error("send failed: {0}")]
    Send(String),
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error("config: {0}")]
    Config(String),
    #[error("connection closed (code {code})")]
    Closed { code: u16 },
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl CableError {
    /// Map the error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CableError::Connect(_) => ErrorCode::Connect,
            CableError::Protocol(_) => ErrorCode::Protocol,
            CableError::SubscriptionRejected { .. } => ErrorCode::SubscriptionRejected,
            CableError::SubscriptionTimeout { .. } => ErrorCode::SubscriptionTimeout,
            CableError::Send(_) => ErrorCode::Send,
            CableError::InvalidCondition(_) => ErrorCode::InvalidCondition,
            CableError::Config(_) => ErrorCode::Config,
            CableError::Closed { .. } => ErrorCode::Closed,
            CableError::WebSocket(_) => ErrorCode::WebSocket,
        }
    }

    /// Errors that must tear the connection down when seen by the read loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CableError::Protocol(_))
    }
}
