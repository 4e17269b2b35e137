//! Transport layer (WebSocket client side).
//!
//! Exposes the dialer collaborator and the codec adapter that turns
//! tungstenite messages into envelopes exactly once per frame.

pub mod codec;
pub mod dial;

pub use codec::{WsSink, WsSource, WsStream};
pub use dial::{DialRequest, Dialed, Dialer, TungsteniteDialer};
