//! Channel: one subscription multiplexed over the shared socket.
//!
//! Inbound data is fanned out twice: every registered handler sees every
//! message, and unless reads are ignored the payload is also queued for
//! `receive*` waiters. The queue is bounded and never blocks the dispatch
//! task; overflow is dropped with a warning.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use cablecar_core::canonical;
use cablecar_core::error::{CableError, Result};
use cablecar_core::matcher::{CallbackError, Condition, Matcher};
use cablecar_core::protocol::Envelope;

use super::client::Inner;
use super::lock;
use crate::transport::codec::CLOSE_ABNORMAL;

/// Async message handler registered with [`Channel::on_message`].
pub type Handler = Arc<dyn Fn(&Value) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Subscription ack state. `Confirmed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Confirmed,
    Rejected,
}

pub(crate) struct ChannelInner {
    identifier: String,
    client: Weak<Inner>,
    tx: mpsc::Sender<Value>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Value>>,
    pub(crate) ack: watch::Sender<SubscriptionState>,
    handlers: Mutex<Vec<Handler>>,
    ignore_reads: AtomicBool,
    created_at: Instant,
    acked_at: Mutex<Option<Instant>>,
    receive_timeout: Duration,
}

impl ChannelInner {
    pub(crate) fn new(
        identifier: String,
        client: Weak<Inner>,
        queue_size: usize,
        receive_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);
        let (ack, _) = watch::channel(SubscriptionState::Pending);
        Self {
            identifier,
            client,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            ack,
            handlers: Mutex::new(Vec::new()),
            ignore_reads: AtomicBool::new(false),
            created_at: Instant::now(),
            acked_at: Mutex::new(None),
            receive_timeout,
        }
    }

    pub(crate) fn close_code(&self) -> u16 {
        self.client
            .upgrade()
            .map_or(CLOSE_ABNORMAL, |client| client.close_code())
    }

    /// Resolve the ack slot. Only the first ack counts; returns the
    /// subscribe duration when this call made the transition.
    pub(crate) fn ack(&self, confirmed: bool) -> Option<Duration> {
        let next = if confirmed {
            SubscriptionState::Confirmed
        } else {
            SubscriptionState::Rejected
        };
        let changed = self.ack.send_if_modified(|state| {
            if *state == SubscriptionState::Pending {
                *state = next;
                true
            } else {
                false
            }
        });
        if !changed {
            tracing::debug!(identifier = %self.identifier, "duplicate ack ignored");
            return None;
        }

        let now = Instant::now();
        *lock(&self.acked_at) = Some(now);
        Some(now.duration_since(self.created_at))
    }

    /// Runs in the dispatch task with the registry lock held. Handlers are
    /// skipped once the connection is disconnected; the payload is still
    /// queued so nothing read before teardown is lost.
    pub(crate) fn handle_incoming(
        &self,
        payload: Value,
        disconnected: bool,
        shutting_down: bool,
    ) {
        let handlers = if disconnected {
            Vec::new()
        } else {
            lock(&self.handlers).clone()
        };
        for handler in &handlers {
            match handler(&payload) {
                Ok(()) | Err(CallbackError::Cancelled) => {}
                Err(CallbackError::Failed(_)) if shutting_down => {}
                Err(CallbackError::Failed(e)) => {
                    tracing::warn!(identifier = %self.identifier, error = %e, "message handler failed");
                }
            }
        }

        if self.ignore_reads.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    identifier = %self.identifier,
                    "channel queue full; dropping message"
                );
            }
            // The receiver lives as long as the channel itself.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Handle to a subscription. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn state(&self) -> SubscriptionState {
        *self.inner.ack.borrow()
    }

    /// Time from subscribe to ack, once acked.
    pub fn ack_duration(&self) -> Option<Duration> {
        lock(&self.inner.acked_at).map(|at| at.duration_since(self.inner.created_at))
    }

    /// Send `{action, ...attributes}` as a `message` command.
    pub async fn perform(&self, action: &str, attributes: Value) -> Result<()> {
        let data = canonical::action_data(action, &attributes)?;
        let client = self
            .inner
            .client
            .upgrade()
            .ok_or_else(|| CableError::Send("connection has been dropped".into()))?;
        client
            .send(&Envelope::perform(self.inner.identifier.as_str(), data))
            .await
    }

    /// First matching message, or `None` after the receive timeout.
    pub async fn receive(&self, cond: impl Into<Condition>) -> Result<Option<Value>> {
        Ok(self.receive_n(1, cond).await?.pop())
    }

    /// Collect `n` matching messages.
    ///
    /// The receive timeout restarts on every arrival, matched or not. When it
    /// elapses the messages matched so far are returned.
    pub async fn receive_n(&self, n: usize, cond: impl Into<Condition>) -> Result<Vec<Value>> {
        let matcher = Matcher::build(cond.into())?;
        let mut out = Vec::with_capacity(n);
        if n == 0 {
            return Ok(out);
        }

        let mut rx = self.inner.rx.lock().await;
        while out.len() < n {
            match timeout(self.inner.receive_timeout, rx.recv()).await {
                Ok(Some(payload)) => {
                    if matcher.matches(&payload) {
                        out.push(payload);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        identifier = %self.inner.identifier,
                        expected = n,
                        received = out.len(),
                        timeout_ms = self.inner.receive_timeout.as_millis() as u64,
                        "receive timeout exceeded; returning partial result"
                    );
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Collect every matching message that arrives within `window`.
    pub async fn receive_all(&self, window: Duration, cond: impl Into<Condition>) -> Result<Vec<Value>> {
        let matcher = Matcher::build(cond.into())?;
        let deadline = tokio::time::Instant::now() + window;
        let mut out = Vec::new();

        let mut rx = self.inner.rx.lock().await;
        while let Ok(Some(payload)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if matcher.matches(&payload) {
                out.push(payload);
            }
        }
        Ok(out)
    }

    /// Register a handler invoked for every inbound data message, including
    /// when reads are ignored.
    ///
    /// Handlers run synchronously in the dispatch task while it holds the
    /// connection lock. They may read [`Client::is_closed`],
    /// [`Client::state`] and this channel's accessors; anything that
    /// subscribes, sends or disconnects must be spawned onto its own task.
    ///
    /// [`Client::is_closed`]: super::Client::is_closed
    /// [`Client::state`]: super::Client::state
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Value) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).push(Arc::new(handler));
    }

    /// Stop queueing data messages for `receive*`. Handlers keep firing.
    pub fn ignore_reads(&self) {
        self.inner.ignore_reads.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("identifier", &self.inner.identifier)
            .field("state", &self.state())
            .finish()
    }
}
