//! Per-iteration execution context supplied by the host.

mod exec;

pub use exec::ExecContext;
