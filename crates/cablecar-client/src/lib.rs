//! cablecar client library entry.
//!
//! This crate wires the transport, connection engine, config and metrics
//! collaborators into an ActionCable load-testing client. It is consumed by
//! the `cablecar-bench` binary and by integration tests.

pub mod bench;
pub mod cable;
pub mod config;
pub mod context;
pub mod obs;
pub mod transport;

pub use cable::{connect, connect_with, Channel, Client, ConnectionState, PendingSubscription, SubscriptionState};
pub use context::ExecContext;
