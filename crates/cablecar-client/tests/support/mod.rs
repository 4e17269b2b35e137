//! In-process ActionCable server for integration tests.
//!
//! Speaks any of the three codecs, greets with a configurable list of
//! envelopes, answers client commands through a script, records everything
//! it receives and lets tests push frames at any time.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use cablecar_client::config::ConnectOptions;
use cablecar_core::protocol::{Codec, Command, Envelope, Kind, WireFrame};

pub type Script = Arc<dyn Fn(&Envelope) -> Vec<Envelope> + Send + Sync>;

pub const ALL_CODECS: [Codec; 3] = [Codec::Json, Codec::Msgpack, Codec::Protobuf];

/// Something the test wants the server to send right now.
pub enum Push {
    Envelope(Envelope),
    /// Raw text frame, bypassing the codec.
    Text(String),
    Close(u16),
}

struct Shared {
    codec: Codec,
    greeting: Vec<Envelope>,
    script: Script,
    received: Mutex<Vec<Envelope>>,
    close_frames: AtomicUsize,
    headers: Mutex<Option<HeaderMap>>,
    push: Mutex<Option<mpsc::UnboundedSender<Push>>>,
}

pub struct MockCable {
    pub url: String,
    shared: Arc<Shared>,
}

pub struct MockBuilder {
    codec: Codec,
    greeting: Vec<Envelope>,
    script: Script,
}

impl MockBuilder {
    pub fn greeting(mut self, greeting: Vec<Envelope>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn script<F>(mut self, f: F) -> Self
    where
        F: Fn(&Envelope) -> Vec<Envelope> + Send + Sync + 'static,
    {
        self.script = Arc::new(f);
        self
    }

    pub async fn start(self) -> MockCable {
        let shared = Arc::new(Shared {
            codec: self.codec,
            greeting: self.greeting,
            script: self.script,
            received: Mutex::new(Vec::new()),
            close_frames: AtomicUsize::new(0),
            headers: Mutex::new(None),
            push: Mutex::new(None),
        });

        let app = Router::new()
            .route("/cable", get(upgrade))
            .with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockCable {
            url: format!("ws://{addr}/cable"),
            shared,
        }
    }
}

impl MockCable {
    pub fn builder(codec: Codec) -> MockBuilder {
        MockBuilder {
            codec,
            greeting: vec![Envelope::control(Kind::Welcome)],
            script: Arc::new(chat_script),
        }
    }

    /// Chat server speaking `codec` with the default script.
    pub async fn start(codec: Codec) -> MockCable {
        Self::builder(codec).start().await
    }

    pub fn push(&self, push: Push) {
        let guard = self.shared.push.lock().unwrap();
        let sender = guard.as_ref().expect("no client connected");
        assert!(sender.send(push).is_ok(), "session gone");
    }

    pub fn push_envelope(&self, env: Envelope) {
        self.push(Push::Envelope(env));
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.shared.received.lock().unwrap().clone()
    }

    pub fn received_with(&self, command: Command) -> Vec<Envelope> {
        self.received()
            .into_iter()
            .filter(|e| e.command.as_ref() == Some(&command))
            .collect()
    }

    pub fn close_frames(&self) -> usize {
        self.shared.close_frames.load(Ordering::SeqCst)
    }

    pub fn handshake_headers(&self) -> HeaderMap {
        self.shared.headers.lock().unwrap().clone().unwrap_or_default()
    }

    /// Poll until `cond` holds or `within` elapses.
    pub async fn eventually<F>(&self, within: Duration, cond: F) -> bool
    where
        F: Fn(&MockCable) -> bool,
    {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if cond(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Confirms subscriptions (rejects `Forbidden`, ignores `Silent`) and echoes
/// performed actions back as a broadcast without the `action` key. A chat
/// `message` attribute comes back as `text`, like a room broadcast.
pub fn chat_script(env: &Envelope) -> Vec<Envelope> {
    let Some(id) = env.identifier.clone() else {
        return vec![];
    };
    match env.command {
        Some(Command::Subscribe) => {
            let parsed: Value = serde_json::from_str(&id).unwrap_or(Value::Null);
            match parsed["channel"].as_str() {
                Some("Forbidden") => vec![Envelope::ack(Kind::RejectSubscription, id)],
                Some("Silent") => vec![],
                _ => vec![Envelope::ack(Kind::ConfirmSubscription, id)],
            }
        }
        Some(Command::Message) => {
            let mut data: Value = env
                .data
                .as_deref()
                .and_then(|d| serde_json::from_str(d).ok())
                .unwrap_or(Value::Null);
            if let Value::Object(obj) = &mut data {
                obj.remove("action");
                if let Some(message) = obj.remove("message") {
                    obj.insert("text".into(), message);
                }
            }
            vec![Envelope::broadcast(id, data)]
        }
        _ => vec![],
    }
}

/// Options with short timeouts for tests.
pub fn options(codec: Codec) -> ConnectOptions {
    ConnectOptions {
        codec,
        handshake_timeout_s: 5,
        receive_timeout_ms: 500,
        ..ConnectOptions::default()
    }
}

async fn upgrade(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    *shared.headers.lock().unwrap() = Some(headers);
    ws.protocols([shared.codec.subprotocol()])
        .on_upgrade(move |socket| session(socket, shared))
}

fn to_message(codec: Codec, env: &Envelope) -> Message {
    match codec.encode(env).unwrap() {
        WireFrame::Text(s) => Message::Text(s),
        WireFrame::Binary(b) => Message::Binary(b.to_vec()),
    }
}

async fn session(socket: WebSocket, shared: Arc<Shared>) {
    let (mut tx, mut rx) = socket.split();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    *shared.push.lock().unwrap() = Some(push_tx);

    for env in &shared.greeting {
        if tx.send(to_message(shared.codec, env)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = rx.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(s))) => WireFrame::Text(s),
                    Some(Ok(Message::Binary(b))) => WireFrame::Binary(Bytes::from(b)),
                    Some(Ok(Message::Close(_))) => {
                        shared.close_frames.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    _ => break,
                };
                let Ok(env) = shared.codec.decode(frame) else {
                    break;
                };
                let replies = (shared.script)(&env);
                shared.received.lock().unwrap().push(env);
                for reply in replies {
                    if tx.send(to_message(shared.codec, &reply)).await.is_err() {
                        return;
                    }
                }
            }
            Some(push) = push_rx.recv() => {
                let msg = match push {
                    Push::Envelope(env) => to_message(shared.codec, &env),
                    Push::Text(s) => Message::Text(s),
                    Push::Close(code) => Message::Close(Some(CloseFrame {
                        code,
                        reason: "".into(),
                    })),
                };
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
        }
    }
}
