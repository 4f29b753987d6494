//! Real-time task log streaming over one shared server connection.
//!
//! A [`Transport`] owns the socket and feeds every inbound envelope into a
//! [`SubscriptionRegistry`]. Each open log view drives a [`StreamSession`]
//! that filters the shared `task.log` topic down to its own task and drops
//! redelivered lines.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod memory;
pub mod registry;
pub mod session;
pub mod transport;
pub mod ws;

pub use memory::MemoryTransport;
pub use registry::{DispatchReport, ListenerError, ListenerHandle, SubscriptionRegistry};
pub use session::{
    Activation, DedupKey, SessionError, SessionSnapshot, SessionStatus, StreamSession,
};
pub use transport::{ConnectionState, Transport, TransportError};
pub use ws::{normalize_server_url, TransportConfig, WsTransport};

/// Listeners run outside every lock this crate takes, so a poisoned mutex only
/// means a panic elsewhere; the guarded data is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
