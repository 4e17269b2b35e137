//! Connection engine: the connection manager, channels and pending
//! subscriptions.

mod channel;
mod client;
mod pending;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use channel::{Channel, Handler, SubscriptionState};
pub use client::{connect, connect_with, Client, ConnectionState};
pub use pending::PendingSubscription;

/// Lock a std mutex, recovering the data if a handler panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
