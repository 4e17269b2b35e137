//! Dialer collaborator.
//!
//! The connection engine only needs "give me an upgraded socket speaking this
//! sub-protocol". TLS and proxy policy live behind the trait so a host can
//! plug in its own network stack.

use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL};

use cablecar_core::error::{CableError, Result};

use super::codec::WsStream;

/// Everything needed to open one upgraded socket.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub subprotocol: &'static str,
    pub timeout: Duration,
}

/// Upgraded socket plus the handshake details reported as sample tags.
pub struct Dialed {
    pub stream: WsStream,
    pub status: u16,
    pub subprotocol: Option<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, req: &DialRequest) -> Result<Dialed>;
}

/// Plain `tokio-tungstenite` dialer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, req: &DialRequest) -> Result<Dialed> {
        let mut request = req
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| CableError::Connect(format!("invalid url {}: {e}", req.url)))?;

        for (name, value) in &req.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CableError::Connect(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CableError::Connect(format!("invalid header value for {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(req.subprotocol));

        let (stream, response) = tokio::time::timeout(req.timeout, connect_async(request))
            .await
            .map_err(|_| {
                CableError::Connect(format!("handshake timed out after {:?}", req.timeout))
            })?
            .map_err(|e| CableError::Connect(e.to_string()))?;

        let subprotocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Ok(Dialed {
            stream,
            status: response.status().as_u16(),
            subprotocol,
        })
    }
}
