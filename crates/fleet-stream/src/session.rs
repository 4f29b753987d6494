//! Per-view log stream: binds one task id to the shared transport, dedups
//! redelivered lines and keeps them in arrival order.
//!
//! Lifecycle is `Idle -> Connecting -> Active -> Closed`. `Closed` is terminal;
//! showing another task means deactivating this session and activating a new
//! one, never reusing the buffer.

use crate::lock;
use crate::registry::{ListenerError, ListenerHandle};
use crate::transport::{Transport, TransportError};
use fleet_core::{topics, Envelope, LogEntry, SubscribeAckPayload, TaskLogData};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

/// How an `activate` call ended. None of these are errors: a dead transport is
/// reported as `Disconnected`, and a session torn down while waiting for the
/// transport ends as `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Active,
    Disconnected,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session cannot activate from {}", .0.as_str())]
    InvalidState(SessionStatus),
    #[error("session is not active")]
    NotActive,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Identity used to drop redelivered lines: emission second plus message text.
///
/// This is a heuristic, not a unique id. Two distinct lines with identical text
/// emitted within the same second (a repeated heartbeat, say) collapse into one.
/// The server assigns no sequence number, so there is nothing stronger to key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    emitted_at: i64,
    message: String,
}

impl DedupKey {
    pub fn of(data: &TaskLogData) -> Self {
        Self {
            emitted_at: data.emitted_at,
            message: data.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub task_id: Option<String>,
    pub status: SessionStatus,
    pub connected: bool,
    /// The server confirmed the current subscription.
    pub acknowledged: bool,
    /// Transport generation the last subscribe went out on.
    pub subscribed_generation: Option<u64>,
    pub entries: usize,
    pub duplicates: u64,
}

#[derive(Debug)]
struct SessionState {
    task_id: Option<String>,
    status: SessionStatus,
    connected: bool,
    acknowledged: bool,
    subscribed_generation: Option<u64>,
    seen: HashSet<DedupKey>,
    buffer: Vec<LogEntry>,
    listeners: Vec<ListenerHandle>,
    duplicates: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            task_id: None,
            status: SessionStatus::Idle,
            connected: false,
            acknowledged: false,
            subscribed_generation: None,
            seen: HashSet::new(),
            buffer: Vec::new(),
            listeners: Vec::new(),
            duplicates: 0,
        }
    }

    /// Returns whether the envelope appended a new line.
    fn accept(&mut self, task_id: &str, envelope: &Envelope) -> Result<bool, ListenerError> {
        if !envelope.is(topics::TASK_LOG) || self.status != SessionStatus::Active {
            return Ok(false);
        }
        // Every session sees every log envelope; skip foreign tasks before decoding.
        if envelope.task_id().is_some_and(|other| other != task_id) {
            return Ok(false);
        }
        let data: TaskLogData = envelope.payload()?;
        if data.task_id != task_id {
            return Ok(false);
        }
        if !self.seen.insert(DedupKey::of(&data)) {
            self.duplicates += 1;
            return Ok(false);
        }
        let seq = self.buffer.len() as u64 + 1;
        self.buffer.push(LogEntry::from_wire(seq, data));
        Ok(true)
    }

    /// Returns whether the envelope confirmed this session's subscription.
    fn accept_ack(&mut self, task_id: &str, envelope: &Envelope) -> Result<bool, ListenerError> {
        if !envelope.is(topics::TASK_SUBSCRIBE_LOGS) || self.status != SessionStatus::Active {
            return Ok(false);
        }
        if envelope.task_id().is_some_and(|other| other != task_id) {
            return Ok(false);
        }
        let ack: SubscribeAckPayload = envelope.payload()?;
        if ack.task_id != task_id || !ack.is_subscribed() || self.acknowledged {
            return Ok(false);
        }
        self.acknowledged = true;
        Ok(true)
    }

    fn record_subscribe(&mut self, generation: u64, sent: bool) {
        self.connected = sent;
        self.acknowledged = false;
        self.subscribed_generation = sent.then_some(generation);
    }
}

pub struct StreamSession<T: Transport> {
    transport: Arc<T>,
    state: Arc<Mutex<SessionState>>,
    updates: Arc<watch::Sender<u64>>,
}

impl<T: Transport> Clone for StreamSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            state: Arc::clone(&self.state),
            updates: Arc::clone(&self.updates),
        }
    }
}

impl<T: Transport> StreamSession<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            transport,
            state: Arc::new(Mutex::new(SessionState::new())),
            updates: Arc::new(updates),
        }
    }

    /// Waits for the transport, then registers the log listener and asks the
    /// server for the task's stream. Only valid from `Idle`.
    ///
    /// If [`StreamSession::deactivate`] runs while the transport is still
    /// connecting, the late connect result is ignored: nothing is sent and no
    /// listener is registered.
    pub async fn activate(&self, task_id: &str) -> Result<Activation, SessionError> {
        {
            let mut state = lock(&self.state);
            if state.status != SessionStatus::Idle {
                return Err(SessionError::InvalidState(state.status));
            }
            state.task_id = Some(task_id.to_string());
            state.status = SessionStatus::Connecting;
        }
        self.notify();
        debug!("stream_session_connecting: task_id={task_id}");

        let ready = self.transport.connect().await;

        let mut state = lock(&self.state);
        if state.status == SessionStatus::Closed {
            debug!("stream_session_activation_cancelled: task_id={task_id}");
            return Ok(Activation::Cancelled);
        }
        if let Err(err) = ready {
            state.connected = false;
            drop(state);
            self.notify();
            warn!("stream_session_disconnected: task_id={task_id} {err}");
            return Ok(Activation::Disconnected);
        }

        // Listen before subscribing: the server replays history right after the
        // subscribe lands and those envelopes must not race past us.
        let log_listener = self
            .transport
            .add_listener(topics::TASK_LOG, self.listener_for(task_id));
        let ack_listener = self
            .transport
            .add_listener(topics::TASK_SUBSCRIBE_LOGS, self.ack_listener_for(task_id));
        state.listeners = vec![log_listener, ack_listener];
        state.status = SessionStatus::Active;

        let generation = self.transport.generation();
        let sent = self.transport.send(&Envelope::subscribe_logs(task_id));
        state.record_subscribe(generation, sent.is_ok());
        let outcome = match sent {
            Ok(()) => {
                debug!("stream_session_active: task_id={task_id} generation={generation}");
                Activation::Active
            }
            Err(err) => {
                warn!("stream_session_subscribe_error: task_id={task_id} {err}");
                Activation::Disconnected
            }
        };
        drop(state);
        self.notify();
        Ok(outcome)
    }

    /// Resends the subscribe request, e.g. after the transport reconnected and
    /// the server forgot this socket's subscriptions. Replayed history is
    /// absorbed by dedup.
    pub fn resubscribe(&self) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if state.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        let Some(task_id) = state.task_id.clone() else {
            return Err(SessionError::NotActive);
        };
        let generation = self.transport.generation();
        let result = self.transport.send(&Envelope::subscribe_logs(&task_id));
        state.record_subscribe(generation, result.is_ok());
        drop(state);
        self.notify();
        match result {
            Ok(()) => {
                debug!("stream_session_resubscribed: task_id={task_id} generation={generation}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Unregisters the listener and releases all buffered lines. Idempotent and
    /// safe before `activate` has finished.
    pub fn deactivate(&self) {
        let mut state = lock(&self.state);
        if state.status == SessionStatus::Closed {
            return;
        }
        for handle in std::mem::take(&mut state.listeners) {
            self.transport.remove_listener(&handle);
        }
        state.seen = HashSet::new();
        state.buffer = Vec::new();
        state.status = SessionStatus::Closed;
        state.connected = false;
        state.acknowledged = false;
        state.subscribed_generation = None;
        let task_id = state.task_id.clone().unwrap_or_default();
        drop(state);
        self.notify();
        debug!("stream_session_closed: task_id={task_id}");
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status
    }

    pub fn task_id(&self) -> Option<String> {
        lock(&self.state).task_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn len(&self) -> usize {
        lock(&self.state).buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).buffer.is_empty()
    }

    pub fn duplicates(&self) -> u64 {
        lock(&self.state).duplicates
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.state).buffer.clone()
    }

    /// Lines after the first `offset`, for consumers that render incrementally.
    pub fn entries_since(&self, offset: usize) -> Vec<LogEntry> {
        let state = lock(&self.state);
        state.buffer.get(offset..).map(<[LogEntry]>::to_vec).unwrap_or_default()
    }

    pub fn with_entries<R>(&self, f: impl FnOnce(&[LogEntry]) -> R) -> R {
        f(&lock(&self.state).buffer)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.state);
        SessionSnapshot {
            task_id: state.task_id.clone(),
            status: state.status,
            connected: state.connected,
            acknowledged: state.acknowledged,
            subscribed_generation: state.subscribed_generation,
            entries: state.buffer.len(),
            duplicates: state.duplicates,
        }
    }

    /// An active session whose subscription went out on a socket that has since
    /// been replaced. Only [`StreamSession::resubscribe`] brings it back.
    pub fn is_stale(&self) -> bool {
        let state = lock(&self.state);
        state.status == SessionStatus::Active
            && self.transport.watch_state().borrow().is_connected()
            && state.subscribed_generation != Some(self.transport.generation())
    }

    /// Bumped on every append and status change.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    fn notify(&self) {
        self.updates.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn listener_for(
        &self,
        task_id: &str,
    ) -> impl Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static {
        let state: Weak<Mutex<SessionState>> = Arc::downgrade(&self.state);
        let updates = Arc::downgrade(&self.updates);
        let task_id = task_id.to_string();
        move |envelope: &Envelope| {
            let Some(state) = state.upgrade() else {
                return Ok(());
            };
            let appended = lock(&state).accept(&task_id, envelope)?;
            if appended {
                if let Some(updates) = updates.upgrade() {
                    updates.send_modify(|revision| *revision = revision.wrapping_add(1));
                }
            }
            Ok(())
        }
    }

    fn ack_listener_for(
        &self,
        task_id: &str,
    ) -> impl Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static {
        let state: Weak<Mutex<SessionState>> = Arc::downgrade(&self.state);
        let updates = Arc::downgrade(&self.updates);
        let task_id = task_id.to_string();
        move |envelope: &Envelope| {
            let Some(state) = state.upgrade() else {
                return Ok(());
            };
            if lock(&state).accept_ack(&task_id, envelope)? {
                debug!("stream_session_subscribed: task_id={task_id}");
                if let Some(updates) = updates.upgrade() {
                    updates.send_modify(|revision| *revision = revision.wrapping_add(1));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::registry::SubscriptionRegistry;
    use fleet_core::LogLevel;
    use serde_json::json;
    use std::time::Duration;

    fn log(task_id: &str, emitted_at: i64, message: &str) -> Envelope {
        Envelope::new(
            topics::TASK_LOG,
            json!({
                "task_id": task_id,
                "level": "info",
                "message": message,
                "timestamp": emitted_at,
            }),
        )
    }

    async fn active_session(
        transport: &Arc<MemoryTransport>,
        task_id: &str,
    ) -> StreamSession<MemoryTransport> {
        let session = StreamSession::new(Arc::clone(transport));
        let activation = session.activate(task_id).await.expect("activate");
        assert_eq!(activation, Activation::Active);
        session
    }

    fn messages(session: &StreamSession<MemoryTransport>) -> Vec<(String, String, i64)> {
        session
            .entries()
            .into_iter()
            .map(|entry| (entry.task_id, entry.message, entry.emitted_at))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn activation_subscribes_and_registers_one_listener() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;

        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.is_connected());
        assert_eq!(transport.registry().listener_count(topics::TASK_LOG), 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, topics::TASK_SUBSCRIBE_LOGS);
        assert_eq!(sent[0].data, json!({"task_id": "t1"}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_lines_are_dropped_in_arrival_order() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;

        transport.deliver(&log("t1", 1000, "start"));
        transport.deliver(&log("t1", 1000, "start"));
        transport.deliver(&log("t1", 1001, "done"));

        assert_eq!(
            messages(&session),
            vec![
                ("t1".to_string(), "start".to_string(), 1000),
                ("t1".to_string(), "done".to_string(), 1001),
            ]
        );
        assert_eq!(session.duplicates(), 1);
        let seqs: Vec<u64> = session.entries().iter().map(|entry| entry.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn redelivering_any_prior_line_never_grows_the_buffer() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        let lines: Vec<Envelope> = (0..20)
            .map(|i| log("t1", 1000 + i / 3, &format!("line {}", i % 7)))
            .collect();

        for line in &lines {
            transport.deliver(line);
        }
        let after_first_pass = session.entries();

        for line in lines.iter().rev() {
            transport.deliver(line);
        }
        assert_eq!(session.entries(), after_first_pass);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn buffer_keeps_receive_order_not_emission_order() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;

        transport.deliver(&log("t1", 1005, "late"));
        transport.deliver(&log("t1", 1001, "early"));

        let order: Vec<i64> = session.entries().iter().map(|entry| entry.emitted_at).collect();
        assert_eq!(order, vec![1005, 1001]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sessions_only_keep_their_own_task() {
        let transport = Arc::new(MemoryTransport::ready());
        let first = active_session(&transport, "t1").await;
        let second = active_session(&transport, "t2").await;
        assert_eq!(transport.registry().listener_count(topics::TASK_LOG), 2);

        transport.deliver(&log("t2", 1000, "from t2"));
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);

        transport.deliver(&log("t1", 1000, "from t1"));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(first.entries().iter().all(|entry| entry.task_id == "t1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn other_topics_are_ignored() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;

        let error = Envelope::new(topics::ERROR, json!({"task_id": "t1"}));
        assert_eq!(transport.deliver(&error).delivered, 0);
        assert!(session.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ack_marks_subscription_confirmed_without_buffering() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        assert!(!session.snapshot().acknowledged);

        let foreign = Envelope::new(
            topics::TASK_SUBSCRIBE_LOGS,
            json!({"task_id": "t2", "status": "subscribed"}),
        );
        transport.deliver(&foreign);
        assert!(!session.snapshot().acknowledged);

        let ack = Envelope::new(
            topics::TASK_SUBSCRIBE_LOGS,
            json!({"task_id": "t1", "status": "subscribed"}),
        );
        assert_eq!(transport.deliver(&ack).delivered, 1);
        assert!(session.snapshot().acknowledged);
        assert!(session.is_empty());

        session.resubscribe().expect("resubscribe");
        assert!(!session.snapshot().acknowledged);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn replaced_socket_makes_session_stale_until_resubscribed() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        assert_eq!(session.snapshot().subscribed_generation, Some(1));
        assert!(!session.is_stale());

        // Drop and reconnect with nobody watching in between.
        transport.drop_connection();
        assert!(!session.is_stale());
        transport.restore_connection();
        assert!(session.is_stale());

        session.resubscribe().expect("resubscribe");
        assert!(!session.is_stale());
        assert_eq!(session.snapshot().subscribed_generation, Some(2));

        session.deactivate();
        assert!(!session.is_stale());
        assert_eq!(session.snapshot().subscribed_generation, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_line_is_dropped_and_session_keeps_going() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;

        let broken = Envelope::new(topics::TASK_LOG, json!({"task_id": "t1", "level": "info"}));
        let report = transport.deliver(&broken);
        assert_eq!(report.failed, 1);

        transport.deliver(&log("t1", 1000, "after"));
        assert_eq!(session.len(), 1);
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deactivate_unregisters_and_is_idempotent() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        transport.deliver(&log("t1", 1000, "start"));

        session.deactivate();
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(session.is_empty());
        assert!(!session.is_connected());
        assert!(transport.registry().is_empty());

        session.deactivate();
        assert_eq!(session.status(), SessionStatus::Closed);

        transport.deliver(&log("t1", 1002, "after close"));
        assert!(session.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deactivate_before_activate_is_harmless() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = StreamSession::new(Arc::clone(&transport));

        session.deactivate();
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(
            session.activate("t1").await,
            Err(SessionError::InvalidState(SessionStatus::Closed))
        );
        assert!(transport.sent().is_empty());
        assert_eq!(transport.connect_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fresh_session_after_teardown_starts_empty() {
        let transport = Arc::new(MemoryTransport::ready());
        let first = active_session(&transport, "t1").await;
        transport.deliver(&log("t1", 1000, "start"));
        first.deactivate();

        let second = active_session(&transport, "t2").await;
        assert!(second.is_empty());
        transport.deliver(&log("t1", 1000, "start"));
        assert!(second.is_empty());
        assert_eq!(transport.registry().listener_count(topics::TASK_LOG), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn activate_twice_is_rejected() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        assert_eq!(
            session.activate("t2").await,
            Err(SessionError::InvalidState(SessionStatus::Active))
        );
        assert_eq!(session.task_id().as_deref(), Some("t1"));
        assert_eq!(transport.registry().listener_count(topics::TASK_LOG), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_connect_after_teardown_sends_nothing() {
        let transport = Arc::new(MemoryTransport::pending());
        let session = StreamSession::new(Arc::clone(&transport));
        let activation = {
            let session = session.clone();
            tokio::spawn(async move { session.activate("t1").await })
        };

        let mut updates = session.updates();
        while session.status() != SessionStatus::Connecting {
            tokio::time::timeout(Duration::from_secs(1), updates.changed())
                .await
                .expect("connecting")
                .expect("updates open");
        }

        session.deactivate();
        transport.resolve(Ok(()));

        let outcome = activation.await.expect("join").expect("activate");
        assert_eq!(outcome, Activation::Cancelled);
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(transport.sent().is_empty());
        assert!(transport.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_transport_reports_disconnected() {
        let transport = Arc::new(MemoryTransport::failing(TransportError::Connect(
            "connection refused".to_string(),
        )));
        let session = StreamSession::new(Arc::clone(&transport));

        let outcome = session.activate("t1").await.expect("activate");
        assert_eq!(outcome, Activation::Disconnected);
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(!session.is_connected());
        assert!(transport.registry().is_empty());

        session.deactivate();
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resubscribe_resends_and_replay_is_absorbed() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        transport.deliver(&log("t1", 1000, "start"));

        transport.drop_connection();
        assert!(matches!(
            session.resubscribe(),
            Err(SessionError::Transport(TransportError::NotConnected))
        ));
        assert!(!session.is_connected());

        transport.restore_connection();
        session.resubscribe().expect("resubscribe");
        assert!(session.is_connected());
        assert_eq!(transport.sent().len(), 2);

        transport.deliver(&log("t1", 1000, "start"));
        transport.deliver(&log("t1", 1003, "resumed"));
        assert_eq!(session.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_session_stops_processing() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let transport = Arc::new(MemoryTransport::ready().with_registry(Arc::clone(&registry)));
        let session = active_session(&transport, "t1").await;
        drop(session);

        let report = transport.deliver(&log("t1", 1000, "orphan"));
        assert_eq!(report.failed, 0);
        assert_eq!(registry.listener_count(topics::TASK_LOG), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn updates_fire_on_append() {
        let transport = Arc::new(MemoryTransport::ready());
        let session = active_session(&transport, "t1").await;
        let mut updates = session.updates();
        let _ = updates.borrow_and_update();

        transport.deliver(&log("t1", 1000, "start"));
        assert!(updates.has_changed().expect("open"));
        assert_eq!(session.entries_since(0).len(), 1);
        assert!(session.entries_since(1).is_empty());
        assert!(session.entries_since(5).is_empty());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.entries, 1);
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(session.with_entries(|entries| entries[0].level), LogLevel::Info);
    }
}
