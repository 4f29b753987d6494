use chrono::{Local, TimeZone};
use fleet_core::LogEntry;
use fleet_stream::{
    Activation, ConnectionState, SessionError, SessionStatus, StreamSession, Transport,
};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Connected,
    Connecting,
    Disconnected,
}

impl Indicator {
    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Connected => "connected",
            Indicator::Connecting => "connecting",
            Indicator::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Lines,
    Transport,
}

/// Binds one stream session at a time to whatever task is on screen.
///
/// Switching tasks always tears the old session down before the new one is
/// created, and dropping the view unbinds, so no listener outlives the view.
pub struct LogView<T: Transport> {
    transport: Arc<T>,
    bound: Option<String>,
    session: Option<StreamSession<T>>,
    activation: Option<JoinHandle<Result<Activation, SessionError>>>,
    updates: Option<watch::Receiver<u64>>,
    transport_state: watch::Receiver<ConnectionState>,
    transport_open: bool,
    anchor: Option<usize>,
}

impl<T: Transport> LogView<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let transport_state = transport.watch_state();
        Self {
            transport,
            bound: None,
            session: None,
            activation: None,
            updates: None,
            transport_state,
            transport_open: true,
            anchor: None,
        }
    }

    /// The task on screen. Known as soon as `bind` returns, before the session
    /// has finished activating.
    pub fn task_id(&self) -> Option<String> {
        self.bound.clone()
    }

    pub fn session(&self) -> Option<&StreamSession<T>> {
        self.session.as_ref()
    }

    /// Shows `task_id`. Rebinding the task already on screen is a no-op.
    pub fn bind(&mut self, task_id: &str) {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            self.unbind();
            return;
        }
        if self.bound.as_deref() == Some(task_id)
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.status() != SessionStatus::Closed)
        {
            return;
        }
        self.unbind();
        self.start(task_id);
    }

    pub fn unbind(&mut self) {
        if let Some(session) = self.session.take() {
            session.deactivate();
        }
        if let Some(task_id) = self.bound.take() {
            info!("log_view_unbound: task_id={task_id}");
        }
        // A still-pending activation finds its session closed and does nothing.
        self.activation = None;
        self.updates = None;
        self.anchor = None;
    }

    fn start(&mut self, task_id: &str) {
        let session = StreamSession::new(Arc::clone(&self.transport));
        let activating = session.clone();
        let owned_id = task_id.to_string();
        self.activation = Some(tokio::spawn(async move {
            activating.activate(&owned_id).await
        }));
        self.updates = Some(session.updates());
        self.session = Some(session);
        self.bound = Some(task_id.to_string());
        self.anchor = None;
        info!("log_view_bound: task_id={task_id}");
    }

    fn activation_finished(&self) -> bool {
        self.activation
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Resolves when there is something new to draw.
    pub async fn changed(&mut self) -> ViewChange {
        let updates = &mut self.updates;
        let transport_state = &mut self.transport_state;
        tokio::select! {
            changed = transport_state.changed(), if self.transport_open => {
                if changed.is_err() {
                    self.transport_open = false;
                } else {
                    self.on_transport_change();
                }
                ViewChange::Transport
            }
            _ = async {
                match updates.as_mut() {
                    Some(rx) => {
                        if rx.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            } => ViewChange::Lines,
        }
    }

    /// Server-side subscriptions belong to the socket, so once a new socket is
    /// up the session has to ask again. The check goes by socket generation,
    /// not by the states seen in between, since the state watch only keeps the
    /// latest value. A session whose first connect failed is restarted instead.
    pub fn on_transport_change(&mut self) {
        let current = *self.transport_state.borrow_and_update();
        if !current.is_connected() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.status() {
            SessionStatus::Active if session.is_stale() => {
                if let Err(err) = session.resubscribe() {
                    warn!("log_view_resubscribe_error: {err}");
                }
            }
            SessionStatus::Connecting if self.activation_finished() => {
                if let Some(task_id) = self.bound.clone() {
                    self.unbind();
                    self.start(&task_id);
                }
            }
            _ => {}
        }
    }

    pub fn indicator(&self) -> Indicator {
        let Some(session) = self.session.as_ref() else {
            return Indicator::Disconnected;
        };
        let snapshot = session.snapshot();
        match snapshot.status {
            SessionStatus::Idle | SessionStatus::Connecting => {
                if self.activation_finished() {
                    Indicator::Disconnected
                } else {
                    Indicator::Connecting
                }
            }
            SessionStatus::Active => {
                if snapshot.connected
                    && self.transport_state.borrow().is_connected()
                    && !session.is_stale()
                {
                    Indicator::Connected
                } else {
                    Indicator::Disconnected
                }
            }
            SessionStatus::Closed => Indicator::Disconnected,
        }
    }

    pub fn len(&self) -> usize {
        self.session.as_ref().map_or(0, StreamSession::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries_since(&self, offset: usize) -> Vec<LogEntry> {
        self.session
            .as_ref()
            .map(|session| session.entries_since(offset))
            .unwrap_or_default()
    }

    pub fn is_following(&self) -> bool {
        self.anchor.is_none()
    }

    pub fn follow_tail(&mut self) {
        self.anchor = None;
    }

    pub fn scroll_up(&mut self, lines: usize, height: usize) {
        let top = self.window(height).start;
        self.anchor = Some(top.saturating_sub(lines));
    }

    pub fn scroll_down(&mut self, lines: usize, height: usize) {
        let Some(anchor) = self.anchor else {
            return;
        };
        let next = anchor.saturating_add(lines);
        if next + height >= self.len() {
            self.anchor = None;
        } else {
            self.anchor = Some(next);
        }
    }

    /// Rows visible in a viewport of `height` lines. Following pins the window
    /// to the tail so new lines scroll into view.
    pub fn window(&self, height: usize) -> Range<usize> {
        let len = self.len();
        let last_top = len.saturating_sub(height);
        let top = match self.anchor {
            Some(anchor) => anchor.min(last_top),
            None => last_top,
        };
        top..(top + height).min(len)
    }

    pub fn visible(&self, height: usize) -> Vec<LogEntry> {
        let window = self.window(height);
        match self.session.as_ref() {
            Some(session) => session.with_entries(|entries| {
                entries.get(window).map(<[LogEntry]>::to_vec).unwrap_or_default()
            }),
            None => Vec::new(),
        }
    }
}

impl<T: Transport> Drop for LogView<T> {
    fn drop(&mut self) {
        self.unbind();
    }
}

pub fn format_time(emitted_at: i64) -> String {
    Local
        .timestamp_opt(emitted_at, 0)
        .single()
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

pub fn format_plain(entry: &LogEntry) -> String {
    format!(
        "[{}] {:<5} {}",
        format_time(entry.emitted_at),
        entry.level.label(),
        entry.message
    )
}
