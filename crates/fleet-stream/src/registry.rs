//! Process-wide topic -> listener table.
//!
//! One transport feeds every inbound envelope through [`SubscriptionRegistry::dispatch`];
//! any number of consumers attach callbacks to the topics they care about and
//! detach them with the handle they got back.

use crate::lock;
use fleet_core::{Envelope, FrameError};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::{error, trace};

pub type Listener = Arc<dyn Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("malformed {kind} envelope: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("listener failed: {0}")]
    Failed(String),
}

impl From<FrameError> for ListenerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Payload { kind, reason } => ListenerError::Malformed { kind, reason },
            other => ListenerError::Failed(other.to_string()),
        }
    }
}

/// Opaque token returned by [`SubscriptionRegistry::add_listener`]; only good for removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    topic: String,
    id: u64,
}

impl ListenerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Listener)>>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance for callers that do not inject their own.
    pub fn global() -> Arc<SubscriptionRegistry> {
        static GLOBAL: OnceLock<Arc<SubscriptionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SubscriptionRegistry::new())))
    }

    pub fn add_listener<F>(&self, topic: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        trace!("registry_listener_added: topic={topic} id={id}");
        ListenerHandle {
            topic: topic.to_string(),
            id,
        }
    }

    /// Returns whether a listener was actually removed. Unknown or already
    /// removed handles are a no-op.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        let mut inner = lock(&self.inner);
        let Some(listeners) = inner.topics.get_mut(&handle.topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            inner.topics.remove(&handle.topic);
        }
        if removed {
            trace!(
                "registry_listener_removed: topic={} id={}",
                handle.topic,
                handle.id
            );
        }
        removed
    }

    /// Invokes every listener currently registered for `envelope.kind` exactly
    /// once. Listeners run outside the table lock, so they may add or remove
    /// listeners themselves. A listener that errors or panics is logged and
    /// skipped; the rest still run.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        let listeners: Vec<(u64, Listener)> = {
            let inner = lock(&self.inner);
            match inner.topics.get(&envelope.kind) {
                Some(listeners) => listeners.clone(),
                None => return DispatchReport::default(),
            }
        };

        let mut report = DispatchReport::default();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    error!("registry_listener_error: topic={} id={id} {err}", envelope.kind);
                }
                Err(_) => {
                    report.failed += 1;
                    error!("registry_listener_panic: topic={} id={id}", envelope.kind);
                }
            }
        }
        report
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.inner)
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).topics.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let mut map = f.debug_map();
        for (topic, listeners) in &inner.topics {
            map.entry(topic, &listeners.len());
        }
        map.finish()
    }
}
