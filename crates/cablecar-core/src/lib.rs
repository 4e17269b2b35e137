//! cablecar core: transport-agnostic ActionCable protocol primitives.
//!
//! This crate defines the canonical envelope, the three wire profiles (JSON,
//! MessagePack, Protobuf), canonical identifier encoding, message matchers and
//! the error surface shared with the client runtime. It carries no socket or
//! async runtime dependencies so the same codecs can drive a client, a mock
//! server in tests, or offline tooling.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed frames
//! surface as `CableError::Protocol` instead of crashing the load generator.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod canonical;
pub mod error;
pub mod matcher;
pub mod protocol;

/// Shared result type.
pub use error::{CableError, ErrorCode, Result};
