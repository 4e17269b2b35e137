//! Frame codec for the client socket.
//!
//! - Text/Binary frames => `Envelope` via the negotiated `Codec`
//! - WebSocket Ping/Pong are transparent (tungstenite answers pings itself)
//! - Close frames and stream end surface as `CableError::Closed`

use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use cablecar_core::error::{CableError, Result};
use cablecar_core::protocol::{Codec, Envelope, WireFrame};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
const CLOSE_NO_STATUS: u16 = 1005;
const CLOSE_NORMAL: u16 = 1000;

/// Encode and write one envelope.
///
/// Callers must hold the connection's writer lock; the sink is never shared.
pub async fn send(codec: Codec, sink: &mut WsSink, env: &Envelope) -> Result<()> {
    let msg = match codec.encode(env)? {
        WireFrame::Text(s) => Message::text(s),
        WireFrame::Binary(b) => Message::binary(b),
    };
    sink.send(msg)
        .await
        .map_err(|e| CableError::Send(format!("write failed: {e}")))
}

/// Read frames until one decodes into an envelope.
pub async fn receive(codec: Codec, source: &mut WsSource) -> Result<Envelope> {
    loop {
        let Some(next) = source.next().await else {
            return Err(CableError::Closed { code: CLOSE_ABNORMAL });
        };

        let frame = match next.map_err(map_ws_error)? {
            Message::Text(t) => WireFrame::Text(t.as_str().to_owned()),
            Message::Binary(b) => WireFrame::Binary(b),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(frame) => {
                let code = frame
                    .map(|f| u16::from(f.code))
                    .unwrap_or(CLOSE_NO_STATUS);
                return Err(CableError::Closed { code });
            }
        };

        let mut env = codec.decode(frame)?;
        env.received_at = Some(Instant::now());
        return Ok(env);
    }
}

/// Classify tungstenite errors: anything that leaves the socket unusable is a
/// close, the rest (oversized or non-UTF-8 frames) is reported and skipped.
fn map_ws_error(e: tungstenite::Error) -> CableError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            CableError::Closed { code: CLOSE_NORMAL }
        }
        tungstenite::Error::Io(_) | tungstenite::Error::Protocol(_) => {
            CableError::Closed { code: CLOSE_ABNORMAL }
        }
        other => CableError::WebSocket(other.to_string()),
    }
}
