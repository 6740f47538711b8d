//! Connection-level context shared by every call arriving on a connection.
//!
//! The transport creates one [`Connection`] per accepted socket and hands
//! an `Arc` of it to each call it decodes. The connection owns the
//! [`ResponseSink`] used to transmit responses, the immutable connection
//! attributes, and a registry of in-flight calls so that [`Connection::close`]
//! can abandon work that has not started yet.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        OnceLock,
        Weak,
        atomic::{AtomicU64 as StdAtomicU64, Ordering as StdOrdering},
    },
};

use dashmap::DashMap;
use log::info;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    call::{Attributes, CallId, CallShared, CallState},
    response::{Response, ResponseSink},
};

/// Global gauge tracking open connections.
static ACTIVE_CONNECTIONS: StdAtomicU64 = StdAtomicU64::new(0);

/// RAII guard incrementing [`ACTIVE_CONNECTIONS`] on creation and
/// decrementing it on drop.
struct ActiveConnection;

impl ActiveConnection {
    fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, StdOrdering::Relaxed);
        crate::metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, StdOrdering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Return the current number of live [`Connection`] values.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(StdOrdering::Relaxed) }

/// Identifier assigned to a connection by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Registry slot handed back by [`Connection::register`].
pub(crate) type Registration = u64;

/// Calls registered on a connection, held weakly so a finished call never
/// lingers because its connection is still open.
#[derive(Default)]
struct InFlightCalls {
    next: StdAtomicU64,
    calls: DashMap<Registration, (CallId, Weak<CallShared>)>,
}

impl InFlightCalls {
    fn insert(&self, id: CallId, shared: &Arc<CallShared>) -> Registration {
        let slot = self.next.fetch_add(1, StdOrdering::Relaxed);
        self.calls.insert(slot, (id, Arc::downgrade(shared)));
        slot
    }

    fn remove(&self, slot: Registration) { self.calls.remove(&slot); }

    /// Drop dead weak references and return the number of live calls.
    fn prune(&self) -> usize {
        self.calls.retain(|_, (_, weak)| weak.strong_count() > 0);
        self.calls.len()
    }

    /// Mark every call that has not started executing as abandoned.
    ///
    /// `DashMap::retain` holds per-bucket write locks while iterating, so
    /// concurrent registrations may contend briefly.
    fn abandon_queued(&self) -> Vec<CallId> {
        let mut abandoned = Vec::new();
        self.calls.retain(|_, (id, weak)| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            if matches!(shared.state(), CallState::Pending | CallState::Admitted)
                && shared.transition(CallState::Abandoned).is_ok()
            {
                abandoned.push(*id);
            }
            true
        });
        abandoned
    }
}

/// Connection context shared by all calls decoded from one socket.
pub struct Connection<R> {
    id: ConnectionId,
    peer: SocketAddr,
    attributes: Attributes,
    sink: Arc<dyn ResponseSink<R>>,
    closed: CancellationToken,
    closed_at: OnceLock<Instant>,
    in_flight: InFlightCalls,
    _counter: ActiveConnection,
}

impl<R: Send + 'static> Connection<R> {
    /// Create the shared context for a newly accepted connection.
    ///
    /// `attributes` are the connection attributes the client supplied during
    /// connection setup; they are fixed for the connection's lifetime.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        attributes: Attributes,
        sink: impl ResponseSink<R>,
    ) -> Arc<Self> {
        let counter = ActiveConnection::new();
        info!(
            "connection opened: callframe_active_connections={}, id={id}, peer={peer}",
            active_connection_count()
        );
        Arc::new(Self {
            id,
            peer,
            attributes,
            sink: Arc::new(sink),
            closed: CancellationToken::new(),
            closed_at: OnceLock::new(),
            in_flight: InFlightCalls::default(),
            _counter: counter,
        })
    }

    /// Notify the connection that the transport has gone away.
    ///
    /// Queued calls are abandoned immediately and will be cleaned up without
    /// a response when a worker reaches them. Calls already executing finish
    /// normally and observe the closure when they try to send. Returns the
    /// number of calls abandoned; repeated calls return zero.
    pub fn close(&self) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        let _ = self.closed_at.set(Instant::now());
        self.closed.cancel();
        let abandoned = self.in_flight.abandon_queued();
        info!(
            "connection closed: id={}, peer={}, abandoned_calls={}",
            self.id,
            self.peer,
            abandoned.len()
        );
        abandoned.len()
    }

    pub(crate) async fn send(&self, call_id: CallId, response: Response<R>) -> std::io::Result<()> {
        self.sink.send(call_id, response).await
    }
}

impl<R> Connection<R> {
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.peer }

    /// Port of the remote peer.
    #[must_use]
    pub fn remote_port(&self) -> u16 { self.peer.port() }

    /// Attributes supplied when the connection was established.
    #[must_use]
    pub fn attributes(&self) -> &Attributes { &self.attributes }

    /// Returns `true` once [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

    /// Token cancelled when the connection closes.
    ///
    /// Handlers may `select!` on `token.cancelled()` to stop early.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken { self.closed.clone() }

    /// Time elapsed since the connection closed, or `None` while open.
    #[must_use]
    pub fn disconnect_since(&self) -> Option<Duration> {
        self.closed_at.get().map(Instant::elapsed)
    }

    /// Number of calls from this connection that have not been cleaned up.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.in_flight.prune() }

    pub(crate) fn register(&self, id: CallId, shared: &Arc<CallShared>) -> Registration {
        self.in_flight.insert(id, shared)
    }

    pub(crate) fn deregister(&self, slot: Registration) { self.in_flight.remove(slot); }
}

impl<R> fmt::Debug for Connection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("attributes", &self.attributes)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
