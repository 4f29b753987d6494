use crate::lock;
use crate::registry::SubscriptionRegistry;
use crate::transport::{next_backoff, ConnectionState, Transport, TransportError};
use fleet_core::{decode_frame, encode_frame, Envelope, DEFAULT_MAX_FRAME_BYTES};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), TransportError>>>;
type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub url: Url,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
    pub reconnect: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl TransportConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(10),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }

    pub fn from_server_url(raw: &str) -> Result<Self, TransportError> {
        Ok(Self::new(normalize_server_url(raw)?))
    }
}

/// Accepts either the socket URL itself or the HTTP base of the cloud server,
/// in which case the socket lives at `/ws` on the same host.
pub fn normalize_server_url(raw: &str) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(raw.trim()).map_err(|err| invalid(&err.to_string()))?;
    let ws_scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        _ => return Err(invalid("expected ws, wss, http or https")),
    };
    url.set_scheme(ws_scheme)
        .map_err(|_| invalid("cannot switch scheme"))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }
    Ok(url)
}

struct WsInner {
    config: TransportConfig,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<Option<ConnectAttempt>>,
    generation: AtomicU64,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
}

/// WebSocket implementation of [`Transport`]. One socket, opened lazily,
/// shared by every session that holds this transport.
pub struct WsTransport {
    inner: Arc<WsInner>,
}

impl WsTransport {
    pub fn new(config: TransportConfig, registry: Arc<SubscriptionRegistry>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(WsInner {
                config,
                registry,
                state,
                outbound: Mutex::new(None),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.config.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Closes the socket and stops reconnecting. Later `connect` calls fail.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender makes the pump close the socket.
        lock(&self.inner.outbound).take();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("ws_shutdown: {}", self.inner.config.url);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        let inner = Arc::clone(&self.inner);
        async move { inner.connect().await }
    }

    fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = encode_frame(envelope, self.inner.config.max_frame_bytes)?;
        let outbound = lock(&self.inner.outbound);
        let Some(sender) = outbound.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        sender
            .send(Message::Text(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl WsInner {
    async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        if self.state.borrow().is_connected() && lock(&self.outbound).is_some() {
            return Ok(());
        }
        let attempt = {
            let mut pending = lock(&self.pending);
            match pending.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = Arc::clone(self).establish().boxed().shared();
                    *pending = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn establish(self: Arc<Self>) -> Result<(), TransportError> {
        self.state.send_replace(ConnectionState::Connecting);
        debug!("ws_connecting: {}", self.config.url);
        let timeout = self.config.connect_timeout;
        let handshake = connect_async(self.config.url.as_str());
        let outcome = match tokio::time::timeout(timeout, handshake).await {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Err(err)) => Err(TransportError::Connect(err.to_string())),
            Ok(Ok((socket, _response))) => {
                if self.shutdown.load(Ordering::SeqCst) {
                    Err(TransportError::Shutdown)
                } else {
                    self.attach(socket);
                    Ok(())
                }
            }
        };
        lock(&self.pending).take();
        if let Err(err) = &outcome {
            self.state.send_replace(ConnectionState::Disconnected);
            warn!("ws_connect_error: {err}");
            self.schedule_reconnect();
        }
        outcome
    }

    fn attach(self: &Arc<Self>, socket: Socket) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.outbound) = Some(tx);
        self.state.send_replace(ConnectionState::Connected);
        info!("ws_connected: {} generation={generation}", self.config.url);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => inner.handle_text(&text),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => inner.handle_text(&text),
                            Err(err) => warn!("ws_decode_error: {err}"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("ws_read_error: {err}");
                            break;
                        }
                    },
                    outgoing = rx.recv() => match outgoing {
                        Some(message) => {
                            if let Err(err) = sink.send(message).await {
                                warn!("ws_write_error: {err}");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
            inner.detach(generation);
        });
    }

    fn handle_text(&self, text: &str) {
        match decode_frame(text, self.config.max_frame_bytes) {
            Ok(envelope) => {
                let report = self.registry.dispatch(&envelope);
                trace!(
                    "ws_dispatch: type={} delivered={} failed={}",
                    envelope.kind,
                    report.delivered,
                    report.failed
                );
            }
            Err(err) => warn!("ws_decode_error: {err}"),
        }
    }

    fn detach(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        lock(&self.outbound).take();
        self.state.send_replace(ConnectionState::Disconnected);
        info!("ws_disconnected: {} generation={generation}", self.config.url);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.reconnect || self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = inner.config.initial_backoff;
            loop {
                tokio::time::sleep(backoff).await;
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match inner.connect().await {
                    Ok(()) | Err(TransportError::Shutdown) => break,
                    Err(err) => {
                        debug!("ws_reconnect_retry: {err} backoff={backoff:?}");
                        backoff = next_backoff(backoff, inner.config.max_backoff);
                    }
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_maps_to_socket_endpoint() {
        let url = normalize_server_url("http://localhost:8080").expect("url");
        assert_eq!(url.as_str(), "ws://localhost:8080/ws");

        let url = normalize_server_url("https://cloud.example.com/").expect("url");
        assert_eq!(url.as_str(), "wss://cloud.example.com/ws");
    }

    #[test]
    fn socket_urls_pass_through() {
        let url = normalize_server_url("wss://cloud.example.com:8443/socket").expect("url");
        assert_eq!(url.as_str(), "wss://cloud.example.com:8443/socket");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let result = normalize_server_url("ftp://cloud.example.com");
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
        assert!(normalize_server_url("not a url").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn send_before_connect_fails() {
        let transport = WsTransport::new(
            TransportConfig::from_server_url("ws://127.0.0.1:9/ws").expect("config"),
            Arc::new(SubscriptionRegistry::new()),
        );
        let result = transport.send(&Envelope::subscribe_logs("t1"));
        assert_eq!(result, Err(TransportError::NotConnected));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_after_shutdown_fails() {
        let transport = WsTransport::new(
            TransportConfig::from_server_url("ws://127.0.0.1:9/ws").expect("config"),
            Arc::new(SubscriptionRegistry::new()),
        );
        transport.shutdown();
        assert_eq!(transport.connect().await, Err(TransportError::Shutdown));
    }
}
