use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::obs::{MetricSink, NoopSink};

/// What the hosting scenario runner hands to `connect`: the iteration's
/// cancellation signal, where samples go, and the base sample tags.
#[derive(Clone)]
pub struct ExecContext {
    cancel: CancellationToken,
    sink: Arc<dyn MetricSink>,
    tags: BTreeMap<String, String>,
}

impl ExecContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            sink: Arc::new(NoopSink),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
