//! Connection manager.
//!
//! One socket, split in two:
//! - the read task owns the source half, drops pings, and forwards envelopes,
//!   errors and close codes over bounded queues
//! - the dispatch task routes envelopes to channels (ack path or data path)
//!   and owns the teardown decisions
//! - writes go through a dedicated writer mutex around the sink
//!
//! Teardown is idempotent: the registry lock guards the `disconnected` flag,
//! and only the caller that flips it closes the socket.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cablecar_core::canonical;
use cablecar_core::error::{CableError, Result};
use cablecar_core::protocol::{Codec, Envelope, Kind};

use super::channel::{Channel, ChannelInner};
use super::lock;
use super::pending::PendingSubscription;
use crate::config::ConnectOptions;
use crate::context::ExecContext;
use crate::obs::metrics::{
    CABLE_SUBSCRIBE_DURATION, WS_CONNECTING, WS_MSGS_RECEIVED, WS_MSGS_SENT, WS_SESSIONS,
};
use crate::obs::{Sample, Tags};
use crate::transport::codec::{self, WsSink, WsSource};
use crate::transport::{DialRequest, Dialer, TungsteniteDialer};

const ERROR_QUEUE: usize = 16;
const CLOSE_NORMAL: u16 = 1000;

/// Lifecycle of a connected [`Client`].
///
/// Dialing and the welcome handshake happen inside [`connect`]; a handle
/// only exists once the connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

pub(crate) struct Registry {
    channels: HashMap<String, Arc<ChannelInner>>,
    disconnected: bool,
}

pub(crate) struct Inner {
    codec: Codec,
    writer: tokio::sync::Mutex<WsSink>,
    registry: Mutex<Registry>,
    phase: AtomicU8,
    close_code: AtomicU16,
    /// Child of the context token; fired once the socket is closed.
    shutdown: CancellationToken,
    receive_timeout: Duration,
    subscribe_timeout: Duration,
    channel_queue_size: usize,
    ctx: ExecContext,
    tags: Tags,
    span: tracing::Span,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn set_phase(&self, state: ConnectionState) {
        self.phase.store(state as u8, Ordering::Release);
    }

    fn count(&self, name: &'static str) {
        self.ctx
            .sink()
            .push(Sample::counter(name, self.tags.clone(), 1.0));
    }

    fn trend(&self, name: &'static str, elapsed: Duration) {
        self.ctx
            .sink()
            .push(Sample::trend(name, self.tags.clone(), millis(elapsed)));
    }

    /// Lock-free view of the `disconnected` flag. The phase leaves `Open`
    /// under the registry lock, in the same step that sets the flag.
    fn is_disconnected(&self) -> bool {
        self.phase.load(Ordering::Acquire) != ConnectionState::Open as u8
    }

    pub(crate) fn close_code(&self) -> u16 {
        match self.close_code.load(Ordering::Acquire) {
            0 => codec::CLOSE_ABNORMAL,
            code => code,
        }
    }

    /// Write one envelope under the writer lock.
    pub(crate) async fn send(&self, env: &Envelope) -> Result<()> {
        let mut sink = self.writer.lock().await;
        // Checked under the writer lock: teardown flips the flag before it
        // takes this lock, so no frame can follow the close frame.
        if self.is_disconnected() {
            return Err(CableError::Send("connection is closed".into()));
        }
        codec::send(self.codec, &mut sink, env).await?;
        drop(sink);
        self.count(WS_MSGS_SENT);
        Ok(())
    }

    /// Close the socket exactly once.
    pub(crate) async fn close_socket(&self) {
        {
            let mut reg = self.registry();
            if reg.disconnected {
                return;
            }
            reg.disconnected = true;
            self.set_phase(ConnectionState::Closing);
        }
        let _ = self
            .close_code
            .compare_exchange(0, CLOSE_NORMAL, Ordering::AcqRel, Ordering::Acquire);

        {
            let mut sink = self.writer.lock().await;
            match tokio::time::timeout(self.receive_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "close frame not delivered"),
                Err(_) => tracing::debug!("close frame flush timed out"),
            }
        }

        self.set_phase(ConnectionState::Closed);
        self.shutdown.cancel();
        tracing::info!(code = self.close_code(), "connection closed");
    }

    /// Classify an inbound envelope and hand it to its channel.
    fn route(&self, env: Envelope) {
        let Some(identifier) = env.identifier.as_deref() else {
            tracing::debug!(kind = ?env.kind, "dropping envelope without identifier");
            return;
        };

        let reg = self.registry();
        let Some(channel) = reg.channels.get(identifier) else {
            tracing::debug!(identifier, "dropping envelope for unknown identifier");
            return;
        };

        match env.kind {
            Some(Kind::ConfirmSubscription) => {
                if let Some(elapsed) = channel.ack(true) {
                    tracing::debug!(identifier, "subscription confirmed");
                    self.trend(CABLE_SUBSCRIBE_DURATION, elapsed);
                }
            }
            Some(Kind::RejectSubscription) => {
                if channel.ack(false).is_some() {
                    tracing::warn!(identifier, "subscription rejected");
                }
            }
            Some(other) => {
                tracing::debug!(identifier, kind = other.as_str(), "ignoring control frame");
            }
            None => {
                let payload = env.message.unwrap_or(Value::Null);
                channel.handle_incoming(
                    payload,
                    reg.disconnected,
                    self.ctx.cancel_token().is_cancelled(),
                );
            }
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Handle to an open connection. Cheap to clone; all clones share the socket.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// Connect with the default tungstenite dialer.
pub async fn connect(url: &str, opts: ConnectOptions, ctx: ExecContext) -> Result<Client> {
    connect_with(&TungsteniteDialer, url, opts, ctx).await
}

/// Dial, wait for `welcome`, then start the read and dispatch tasks.
pub async fn connect_with(
    dialer: &dyn Dialer,
    url: &str,
    opts: ConnectOptions,
    ctx: ExecContext,
) -> Result<Client> {
    opts.validate()?;
    let span = tracing::info_span!("cable", url = %url, codec = opts.codec.as_str());
    establish(dialer, url, opts, ctx, span.clone())
        .instrument(span)
        .await
}

async fn establish(
    dialer: &dyn Dialer,
    url: &str,
    opts: ConnectOptions,
    ctx: ExecContext,
    span: tracing::Span,
) -> Result<Client> {
    let req = DialRequest {
        url: url.to_owned(),
        headers: opts.header_pairs(),
        subprotocol: opts.codec.subprotocol(),
        timeout: opts.handshake_timeout(),
    };

    tracing::debug!(subprotocol = req.subprotocol, "dialing");
    let started = Instant::now();
    let dialed = tokio::select! {
        res = dialer.dial(&req) => res?,
        _ = ctx.cancel_token().cancelled() => {
            return Err(CableError::Connect("cancelled while dialing".into()));
        }
    };
    let connecting = started.elapsed();

    let mut tags = ctx.tags().clone();
    tags.extend(opts.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags.insert("url".into(), url.to_owned());
    tags.insert("status".into(), dialed.status.to_string());
    if let Some(proto) = &dialed.subprotocol {
        tags.insert("subproto".into(), proto.clone());
    }
    let tags: Tags = Arc::new(tags);
    ctx.sink().push(Sample::counter(WS_SESSIONS, tags.clone(), 1.0));
    ctx.sink()
        .push(Sample::trend(WS_CONNECTING, tags.clone(), millis(connecting)));
    tracing::debug!(
        status = dialed.status,
        elapsed_ms = millis(connecting),
        "socket upgraded; awaiting welcome"
    );

    let codec = opts.codec;
    let (mut sink, mut source) = dialed.stream.split();

    let welcome = tokio::time::timeout(
        opts.handshake_timeout(),
        await_welcome(codec, &mut source),
    )
    .await
    .unwrap_or_else(|_| {
        Err(CableError::Connect(format!(
            "no welcome within {:?}",
            opts.handshake_timeout()
        )))
    });
    if let Err(e) = welcome {
        if let Err(close_err) = sink.close().await {
            tracing::debug!(error = %close_err, "close after failed handshake");
        }
        return Err(e);
    }

    let shutdown = ctx.cancel_token().child_token();
    let inner = Arc::new(Inner {
        codec,
        writer: tokio::sync::Mutex::new(sink),
        registry: Mutex::new(Registry {
            channels: HashMap::new(),
            disconnected: false,
        }),
        phase: AtomicU8::new(ConnectionState::Open as u8),
        close_code: AtomicU16::new(0),
        shutdown,
        receive_timeout: opts.receive_timeout(),
        subscribe_timeout: opts.subscribe_timeout(),
        channel_queue_size: opts.channel_queue_size,
        ctx,
        tags,
        span: span.clone(),
    });

    let (inbound_tx, inbound_rx) = mpsc::channel(opts.inbound_queue_size);
    let (error_tx, error_rx) = mpsc::channel(ERROR_QUEUE);
    let (close_tx, close_rx) = mpsc::channel(1);

    tokio::spawn(
        read_loop(inner.clone(), source, inbound_tx, error_tx, close_tx).instrument(span.clone()),
    );
    tokio::spawn(dispatch_loop(inner.clone(), inbound_rx, error_rx, close_rx).instrument(span));

    tracing::info!("connected");
    Ok(Client { inner })
}

/// Skip pings until `welcome`. Anything else first is a handshake failure.
async fn await_welcome(codec: Codec, source: &mut WsSource) -> Result<()> {
    loop {
        let env = codec::receive(codec, source)
            .await
            .map_err(|e| CableError::Connect(format!("handshake read failed: {e}")))?;
        match env.kind {
            Some(Kind::Ping) => continue,
            Some(Kind::Welcome) => return Ok(()),
            other => {
                return Err(CableError::Connect(format!(
                    "expected welcome, got {}",
                    other.as_ref().map_or("data frame", |k| k.as_str())
                )))
            }
        }
    }
}

// --------------------
// Tasks
// --------------------
async fn read_loop(
    inner: Arc<Inner>,
    mut source: WsSource,
    inbound: mpsc::Sender<Envelope>,
    errors: mpsc::Sender<CableError>,
    closes: mpsc::Sender<u16>,
) {
    loop {
        let res = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = codec::receive(inner.codec, &mut source) => res,
        };

        match res {
            Ok(env) if env.is_kind(&Kind::Ping) => continue,
            // Ending the task closes the inbound queue; dispatch drains what
            // was read before the disconnect, then tears down.
            Ok(env) if env.is_kind(&Kind::Disconnect) => {
                tracing::info!(
                    reason = env.reason.as_deref().unwrap_or("unknown"),
                    reconnect = env.reconnect.unwrap_or(false),
                    "server requested disconnect"
                );
                break;
            }
            Ok(env) => {
                inner.count(WS_MSGS_RECEIVED);
                if inbound.send(env).await.is_err() {
                    break;
                }
            }
            Err(CableError::Closed { code }) => {
                let _ = inner.close_code.compare_exchange(
                    0,
                    code,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                let _ = closes.send(code).await;
                break;
            }
            Err(e) => {
                if errors.send(e).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("read task finished");
}

async fn dispatch_loop(
    inner: Arc<Inner>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut errors: mpsc::Receiver<CableError>,
    mut closes: mpsc::Receiver<u16>,
) {
    loop {
        tokio::select! {
            biased;
            env = inbound.recv() => match env {
                Some(env) => inner.route(env),
                None => {
                    inner.close_socket().await;
                    break;
                }
            },
            Some(e) = errors.recv() => {
                tracing::error!(code = e.code().as_str(), error = %e, "read failed");
                if e.is_fatal() {
                    inner.close_socket().await;
                }
            },
            Some(code) = closes.recv() => {
                tracing::info!(code, "socket closed by peer");
                inner.close_socket().await;
            },
            _ = inner.shutdown.cancelled() => {
                inner.close_socket().await;
                break;
            }
        }
    }
    tracing::debug!("dispatch task finished");
}

impl Client {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }

    /// Resolves once the socket has been torn down.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Subscribe and wait for the ack with the default subscribe timeout.
    pub async fn subscribe(&self, channel: &str, params: Value) -> Result<Channel> {
        self.subscribe_async(channel, params).await?.wait().await
    }

    /// Send `subscribe` (once per identifier) without waiting for the ack.
    pub async fn subscribe_async(&self, channel: &str, params: Value) -> Result<PendingSubscription> {
        let identifier = canonical::identifier(channel, &params)?;

        let (entry, fresh) = {
            let mut reg = self.inner.registry();
            if reg.disconnected {
                return Err(CableError::Send("cannot subscribe: connection is closed".into()));
            }
            match reg.channels.get(&identifier) {
                Some(existing) => {
                    tracing::warn!(identifier = %identifier, "already subscribed; reusing channel");
                    (existing.clone(), false)
                }
                None => {
                    let created = Arc::new(ChannelInner::new(
                        identifier.clone(),
                        Arc::downgrade(&self.inner),
                        self.inner.channel_queue_size,
                        self.inner.receive_timeout,
                    ));
                    reg.channels.insert(identifier.clone(), created.clone());
                    (created, true)
                }
            }
        };

        if fresh {
            if let Err(e) = self.inner.send(&Envelope::subscribe(identifier.as_str())).await {
                self.inner.registry().channels.remove(&identifier);
                return Err(e);
            }
            tracing::debug!(identifier = %identifier, "subscribe sent");
        }

        Ok(PendingSubscription::new(
            Channel::from_inner(entry),
            self.inner.subscribe_timeout,
            self.inner.shutdown.clone(),
        ))
    }

    /// Send a raw envelope. Mostly useful for commands the channel API does
    /// not cover.
    pub async fn send(&self, env: &Envelope) -> Result<()> {
        self.inner.send(env).await
    }

    /// Close the socket. Safe to call any number of times, concurrently.
    pub async fn disconnect(&self) {
        self.inner.close_socket().await;
    }

    /// Await `predicate` repeatedly until it yields `true`, the iteration is
    /// cancelled, or the connection goes away. Cancellation disconnects.
    pub async fn run_loop<F, Fut>(&self, mut predicate: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let cancel = self.inner.ctx.cancel_token().clone();
        let watcher = {
            let inner = self.inner.clone();
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    cancel.cancelled().await;
                    inner.close_socket().await;
                }
                .instrument(self.inner.span.clone()),
            )
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.inner.shutdown.cancelled() => break,
                done = predicate() => {
                    if done {
                        break;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            if let Err(e) = watcher.await {
                tracing::debug!(error = %e, "loop watcher failed");
            }
        } else {
            watcher.abort();
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("codec", &self.inner.codec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
