use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cablecar_core::error::{CableError, Result};

use super::channel::{Channel, SubscriptionState};

/// A subscribe that has been sent but not yet acknowledged.
#[derive(Debug)]
pub struct PendingSubscription {
    channel: Channel,
    timeout: Duration,
    closed: CancellationToken,
}

impl PendingSubscription {
    pub(crate) fn new(channel: Channel, timeout: Duration, closed: CancellationToken) -> Self {
        Self {
            channel,
            timeout,
            closed,
        }
    }

    /// The channel, usable before the ack lands (e.g. to register handlers).
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Wait with the connection's default subscribe timeout.
    pub async fn wait(self) -> Result<Channel> {
        let timeout = self.timeout;
        self.wait_timeout(timeout).await
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Result<Channel> {
        let mut rx = self.channel.inner.ack.subscribe();
        let identifier = self.channel.identifier().to_owned();

        let state = tokio::select! {
            biased;
            res = tokio::time::timeout(timeout, rx.wait_for(|s| *s != SubscriptionState::Pending)) => {
                match res {
                    Ok(Ok(state)) => *state,
                    // The sender lives inside the channel we hold.
                    Ok(Err(_)) => SubscriptionState::Pending,
                    Err(_) => {
                        return Err(CableError::SubscriptionTimeout { identifier, timeout });
                    }
                }
            }
            _ = self.closed.cancelled() => {
                return Err(CableError::Closed { code: self.channel.inner.close_code() });
            }
        };

        match state {
            SubscriptionState::Confirmed => Ok(self.channel),
            SubscriptionState::Rejected => Err(CableError::SubscriptionRejected { identifier }),
            SubscriptionState::Pending => Err(CableError::SubscriptionTimeout { identifier, timeout }),
        }
    }
}
