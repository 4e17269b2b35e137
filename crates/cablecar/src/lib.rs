//! Top-level facade crate for cablecar.
//!
//! Re-exports the protocol core and the client runtime so load scripts can
//! depend on a single crate.

pub mod core {
    pub use cablecar_core::*;
}

pub mod client {
    pub use cablecar_client::*;
}

pub use cablecar_client::{connect, Channel, Client, ExecContext};
pub use cablecar_core::{CableError, ErrorCode, Result};
