//! Message matchers for blocking receives.
//!
//! A [`Condition`] is what the caller hands in (absent, a marker string, an
//! attribute object or a callable). It is turned into a [`Matcher`] once per
//! wait, so canonicalization errors surface before any message is inspected.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::canonical::{canonicalize, type_name};
use crate::error::{CableError, Result};

/// Failure raised by a caller-supplied predicate or message handler.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback was interrupted because the iteration is shutting down.
    #[error("interrupted by cancellation")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Callable used by [`Condition::Predicate`].
pub type PredicateFn = dyn Fn(&Value) -> std::result::Result<bool, CallbackError> + Send + Sync;

/// Caller-supplied filter for incoming payloads.
#[derive(Clone, Default)]
pub enum Condition {
    /// Accept everything.
    #[default]
    Any,
    /// Accept string payloads equal to the marker.
    Marker(String),
    /// Accept objects containing every attribute.
    Attributes(Value),
    /// Accept payloads for which the callable returns `true`.
    Predicate(Arc<PredicateFn>),
}

impl Condition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<bool, CallbackError> + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Any => f.write_str("Any"),
            Condition::Marker(m) => f.debug_tuple("Marker").field(m).finish(),
            Condition::Attributes(v) => f.debug_tuple("Attributes").field(v).finish(),
            Condition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// `null` means "no condition", strings are markers, everything else is
/// treated as an attribute set (and rejected by [`Matcher::build`] unless it
/// is an object).
impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Condition::Any,
            Value::String(s) => Condition::Marker(s),
            other => Condition::Attributes(other),
        }
    }
}

impl From<Option<Value>> for Condition {
    fn from(value: Option<Value>) -> Self {
        value.map(Condition::from).unwrap_or_default()
    }
}

/// Built predicate evaluated against decoded payloads.
#[derive(Clone)]
pub enum Matcher {
    Passthrough,
    StringEquality(String),
    AttributeSubset(Map<String, Value>),
    Predicate(Arc<PredicateFn>),
}

impl Matcher {
    /// Build a matcher, canonicalizing attribute conditions.
    pub fn build(cond: Condition) -> Result<Self> {
        match cond {
            Condition::Any => Ok(Matcher::Passthrough),
            Condition::Marker(m) => Ok(Matcher::StringEquality(m)),
            Condition::Predicate(f) => Ok(Matcher::Predicate(f)),
            Condition::Attributes(value) => match canonicalize(&value)? {
                Value::Object(attrs) => Ok(Matcher::AttributeSubset(attrs)),
                other => Err(CableError::InvalidCondition(format!(
                    "attribute condition must be an object, got {}",
                    type_name(&other)
                ))),
            },
        }
    }

    /// Evaluate against a payload. Predicate failures count as a non-match.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Matcher::Passthrough => true,
            Matcher::StringEquality(marker) => payload.as_str() == Some(marker.as_str()),
            Matcher::AttributeSubset(attrs) => {
                let Value::Object(obj) = payload else {
                    return false;
                };
                attrs
                    .iter()
                    .all(|(k, v)| obj.get(k).is_some_and(|actual| values_equal(v, actual)))
            }
            Matcher::Predicate(f) => match f(payload) {
                Ok(matched) => matched,
                Err(CallbackError::Cancelled) => false,
                Err(CallbackError::Failed(e)) => {
                    tracing::warn!(error = %e, "match predicate failed; treating as no match");
                    false
                }
            },
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Passthrough => f.write_str("Passthrough"),
            Matcher::StringEquality(m) => f.debug_tuple("StringEquality").field(m).finish(),
            Matcher::AttributeSubset(a) => f.debug_tuple("AttributeSubset").field(a).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Deep equality that ignores numeric representation (`1 == 1.0`).
///
/// Payloads decoded from MessagePack keep integers while JSON conditions may
/// carry floats, so numbers are compared by value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            x.as_f64() == y.as_f64()
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}
