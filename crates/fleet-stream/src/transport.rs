use crate::registry::{ListenerError, ListenerHandle, SubscriptionRegistry};
use fleet_core::{Envelope, FrameError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// `Clone` so one connect attempt can hand the same outcome to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("invalid server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport shut down")]
    Shutdown,
}

/// The shared duplex connection every stream session rides on.
///
/// `connect` must be idempotent and safe to call concurrently; `send` never
/// blocks. Inbound envelopes are delivered through [`Transport::registry`].
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    fn registry(&self) -> &SubscriptionRegistry;

    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Counts established sockets. The server forgets subscriptions when a
    /// socket closes, so a changed generation means every subscription is gone
    /// even if the state watch only ever showed `Connected`.
    fn generation(&self) -> u64;

    fn add_listener<F>(&self, topic: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.registry().add_listener(topic, listener)
    }

    fn remove_listener(&self, handle: &ListenerHandle) {
        self.registry().remove_listener(handle);
    }
}

pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}
