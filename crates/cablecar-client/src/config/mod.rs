//! Connect options and bench scenario loader (strict parsing).

pub mod schema;

use std::fs;

use cablecar_core::error::{CableError, Result};

pub use schema::{BenchConfig, ConnectOptions, Scenario};

pub fn load_from_file(path: &str) -> Result<BenchConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| CableError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BenchConfig> {
    let cfg: BenchConfig = serde_yaml::from_str(s)
        .map_err(|e| CableError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse connect options alone (e.g. handed over by a host script).
pub fn options_from_str(s: &str) -> Result<ConnectOptions> {
    let opts: ConnectOptions = serde_yaml::from_str(s)
        .map_err(|e| CableError::Config(format!("invalid options: {e}")))?;
    opts.validate()?;
    Ok(opts)
}
