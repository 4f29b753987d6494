use crate::lock;
use crate::registry::{DispatchReport, SubscriptionRegistry};
use crate::transport::{ConnectionState, Transport, TransportError};
use fleet_core::Envelope;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// In-process transport. Connect outcomes are scripted, outbound envelopes are
/// recorded, and inbound envelopes are injected with [`MemoryTransport::deliver`].
pub struct MemoryTransport {
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    outcome: watch::Sender<Option<Result<(), TransportError>>>,
    sent: Mutex<Vec<Envelope>>,
    connect_calls: AtomicUsize,
    generation: AtomicU64,
}

impl MemoryTransport {
    fn with_outcome(outcome: Option<Result<(), TransportError>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (outcome, _) = watch::channel(outcome);
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            state,
            outcome,
            sent: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// `connect` succeeds immediately.
    pub fn ready() -> Self {
        Self::with_outcome(Some(Ok(())))
    }

    /// `connect` fails immediately with `err`.
    pub fn failing(err: TransportError) -> Self {
        Self::with_outcome(Some(Err(err)))
    }

    /// `connect` suspends until [`MemoryTransport::resolve`] is called.
    pub fn pending() -> Self {
        Self::with_outcome(None)
    }

    pub fn with_registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn resolve(&self, outcome: Result<(), TransportError>) {
        self.outcome.send_replace(Some(outcome));
    }

    pub fn deliver(&self, envelope: &Envelope) -> DispatchReport {
        self.registry.dispatch(envelope)
    }

    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.sent).clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Simulates the socket dropping; sends fail until the connection is restored.
    pub fn drop_connection(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Simulates a fresh socket, which the server knows no subscriptions for.
    pub fn restore_connection(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut outcome_rx = self.outcome.subscribe();
        async move {
            let outcome = loop {
                let current = outcome_rx.borrow_and_update().clone();
                if let Some(outcome) = current {
                    break outcome;
                }
                if outcome_rx.changed().await.is_err() {
                    break Err(TransportError::Shutdown);
                }
            };
            match outcome {
                Ok(()) => {
                    if !self.state.borrow().is_connected() {
                        self.generation.fetch_add(1, Ordering::SeqCst);
                    }
                    self.state.send_replace(ConnectionState::Connected);
                }
                Err(_) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
            outcome
        }
    }

    fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.state.borrow().is_connected() {
            return Err(TransportError::NotConnected);
        }
        lock(&self.sent).push(envelope.clone());
        Ok(())
    }

    fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
