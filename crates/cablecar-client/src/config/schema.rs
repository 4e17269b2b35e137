use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use cablecar_core::error::{CableError, Result};
use cablecar_core::protocol::Codec;

/// Per-connection options accepted by `connect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectOptions {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw `Cookie` header value.
    #[serde(default)]
    pub cookies: Option<String>,

    /// Extra sample tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub codec: Codec,

    #[serde(default = "default_handshake_timeout_s")]
    pub handshake_timeout_s: u64,

    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Falls back to `receive_timeout_ms`.
    #[serde(default)]
    pub subscribe_timeout_ms: Option<u64>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_channel_queue_size")]
    pub channel_queue_size: usize,

    #[serde(default = "default_inbound_queue_size")]
    pub inbound_queue_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            cookies: None,
            tags: BTreeMap::new(),
            codec: Codec::default(),
            handshake_timeout_s: default_handshake_timeout_s(),
            receive_timeout_ms: default_receive_timeout_ms(),
            subscribe_timeout_ms: None,
            log_level: default_log_level(),
            channel_queue_size: default_channel_queue_size(),
            inbound_queue_size: default_inbound_queue_size(),
        }
    }
}

impl ConnectOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=600).contains(&self.handshake_timeout_s) {
            return Err(CableError::Config(
                "handshake_timeout_s must be between 1 and 600".into(),
            ));
        }
        if self.receive_timeout_ms == 0 {
            return Err(CableError::Config("receive_timeout_ms must be positive".into()));
        }
        if self.subscribe_timeout_ms == Some(0) {
            return Err(CableError::Config("subscribe_timeout_ms must be positive".into()));
        }
        if self.channel_queue_size == 0 || self.inbound_queue_size == 0 {
            return Err(CableError::Config("queue sizes must be positive".into()));
        }
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Err(CableError::Config(format!(
                "unknown log_level `{}`",
                self.log_level
            )));
        }
        if self.headers.keys().any(|k| k.eq_ignore_ascii_case("sec-websocket-protocol")) {
            return Err(CableError::Config(
                "sec-websocket-protocol is derived from codec and cannot be set".into(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_s)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms.unwrap_or(self.receive_timeout_ms))
    }

    /// Handshake headers, with `cookies` folded into a `Cookie` header.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(cookies) = self.cookies.as_deref().filter(|c| !c.is_empty()) {
            pairs.push(("Cookie".into(), cookies.to_owned()));
        }
        pairs
    }
}

fn default_handshake_timeout_s() -> u64 {
    60
}
fn default_receive_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_channel_queue_size() -> usize {
    1024
}
fn default_inbound_queue_size() -> usize {
    1024
}

/// Scenario file for `cablecar-bench`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    pub version: u32,
    pub url: String,

    #[serde(default)]
    pub connection: ConnectOptions,

    pub scenario: Scenario,
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CableError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(CableError::Config("url must use ws:// or wss://".into()));
        }
        self.connection.validate()?;
        self.scenario.validate()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub channel: String,

    #[serde(default)]
    pub params: Value,

    pub action: String,

    /// Attributes merged with `action`.
    #[serde(default)]
    pub data: Value,

    /// Condition each reply must satisfy (null accepts anything).
    #[serde(default)]
    pub expect: Value,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default)]
    pub pause_ms: u64,
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.channel.is_empty() {
            return Err(CableError::Config("scenario.channel must not be empty".into()));
        }
        if self.action.is_empty() {
            return Err(CableError::Config("scenario.action must not be empty".into()));
        }
        if !(1..=100_000).contains(&self.iterations) {
            return Err(CableError::Config(
                "scenario.iterations must be between 1 and 100000".into(),
            ));
        }
        Ok(())
    }
}

fn default_iterations() -> u32 {
    1
}
