//! The in-memory record of one inbound call.
//!
//! A [`Call`] is built by the decoding layer through [`Call::builder`],
//! passed by value through admission and the scheduler to a worker, and
//! finally cleaned up. Response transmission and cleanup are structural:
//! the response latch in [`CallShared`] admits one sender, and dropping a
//! call runs [`Call::cleanup`] if nothing else has.

mod attributes;
mod builder;
mod cells;
mod cleanup;
mod error;
mod header;
mod send;
mod state;

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

pub use attributes::Attributes;
pub use builder::CallBuilder;
pub use cells::SideChannel;
pub use error::CallError;
pub use header::{CallId, RequestHeader, VersionInfo};
pub use state::{CallShared, CallState};
use tokio::time::{Duration, Instant};

use crate::{
    admission::Reservation,
    connection::{Connection, Registration},
    deadline::Deadline,
    response::Response,
    sync::lock,
};

/// Scheduling class of a call. Higher values are more urgent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u32);

impl Priority {
    pub const NORMAL: Self = Self(0);
    pub const REPLICATION: Self = Self(5);
    pub const REPLAY: Self = Self(6);
    pub const ADMIN: Self = Self(100);
    pub const HIGH: Self = Self(200);
    pub const META: Self = Self(300);

    #[must_use]
    pub const fn new(level: u32) -> Self { Self(level) }

    #[must_use]
    pub const fn level(&self) -> u32 { self.0 }
}

impl From<u32> for Priority {
    fn from(level: u32) -> Self { Self(level) }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Service and method a call is addressed to.
///
/// Both names are opaque to this crate; they are carried for the handler and
/// for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallTarget {
    service: Arc<str>,
    method: Arc<str>,
}

impl CallTarget {
    #[must_use]
    pub fn new(service: impl Into<Arc<str>>, method: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str { &self.service }

    #[must_use]
    pub fn method(&self) -> &str { &self.method }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// Progress of the single response a call may carry.
enum ResponseSlot<R> {
    Empty,
    Ready(Response<R>),
    Taken,
}

/// Response size counters maintained by handlers.
#[derive(Debug, Default)]
struct ResponseAccounting {
    cell_size: AtomicU64,
    block_size: AtomicU64,
    exception_size: AtomicU64,
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One decoded request plus its evolving response state.
///
/// `Req` is the decoded parameter message and `Resp` the result message the
/// handler produces; both are opaque to this crate.
pub struct Call<Req, Resp> {
    id: CallId,
    header: RequestHeader,
    target: CallTarget,
    param: Option<Req>,
    cells: Mutex<Option<SideChannel>>,
    received_at: Instant,
    started_at: Option<Instant>,
    timeout: Option<Duration>,
    deadline: Deadline,
    priority: Priority,
    size: u64,
    request_attributes: Attributes,
    connection: Arc<Connection<Resp>>,
    shared: Arc<CallShared>,
    registration: Option<Registration>,
    response: Mutex<ResponseSlot<Resp>>,
    reservation: Option<Reservation>,
    accounting: ResponseAccounting,
    callback: Mutex<Option<Callback>>,
    cleaned: bool,
}

impl<Req, Resp: Send + 'static> Call<Req, Resp> {
    /// Start building a call decoded from `connection`.
    #[must_use]
    pub fn builder(
        connection: Arc<Connection<Resp>>,
        header: RequestHeader,
        target: CallTarget,
    ) -> CallBuilder<Req, Resp> {
        CallBuilder::new(connection, header, target)
    }
}

impl<Req, Resp> Call<Req, Resp> {
    #[must_use]
    pub fn id(&self) -> CallId { self.id }

    /// The decoded request header.
    #[must_use]
    pub fn header(&self) -> &RequestHeader { &self.header }

    #[must_use]
    pub fn target(&self) -> &CallTarget { &self.target }

    /// The decoded parameter message; `None` if the request carried none or
    /// the call has been cleaned up.
    #[must_use]
    pub fn param(&self) -> Option<&Req> { self.param.as_ref() }

    /// Returns `true` while the request side channel has not been handed to
    /// a handler or released.
    #[must_use]
    pub fn has_cells(&self) -> bool { lock(&self.cells).is_some() }

    /// Whether the client can accept a side channel on the response.
    #[must_use]
    pub fn is_cell_block_supported(&self) -> bool { self.header.cell_block }

    /// Client version reported in the header, if any.
    #[must_use]
    pub fn client_version(&self) -> Option<&VersionInfo> { self.header.client_version.as_ref() }

    /// When the decoder finished reading the request.
    #[must_use]
    pub fn received_at(&self) -> Instant { self.received_at }

    /// When a worker began executing the call, if it has.
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> { self.started_at }

    /// Caller-declared timeout; `None` means no deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    #[must_use]
    pub fn deadline(&self) -> Deadline { self.deadline }

    /// Returns `true` if the call's deadline has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool { self.deadline.is_expired(now) }

    /// Time left before the deadline at `now`; `None` when unbounded.
    ///
    /// Long-running handlers poll this to abandon work cooperatively.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> { self.deadline.remaining(now) }

    #[must_use]
    pub fn priority(&self) -> Priority { self.priority }

    /// Estimated size in bytes used for admission accounting.
    #[must_use]
    pub fn size(&self) -> u64 { self.size }

    /// Attributes attached to this request.
    #[must_use]
    pub fn request_attributes(&self) -> &Attributes { &self.request_attributes }

    /// Attributes of the originating connection.
    #[must_use]
    pub fn connection_attributes(&self) -> &Attributes { self.connection.attributes() }

    /// The originating connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection<Resp>> { &self.connection }

    /// Port of the remote peer.
    #[must_use]
    pub fn remote_port(&self) -> u16 { self.connection.remote_port() }

    /// Time since the originating connection closed, or `None` while open.
    #[must_use]
    pub fn disconnect_since(&self) -> Option<Duration> { self.connection.disconnect_since() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CallState { self.shared.state() }

    /// Shared lifecycle block, as registered with the connection.
    #[must_use]
    pub fn shared(&self) -> &Arc<CallShared> { &self.shared }

    /// Returns `true` once [`Call::cleanup`] has run.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool { self.cleaned }

    /// Add to the size of cells carried in the response.
    pub fn increment_response_cell_size(&self, bytes: u64) {
        self.accounting.cell_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add to the size of response blocks retained for this call.
    pub fn increment_response_block_size(&self, bytes: u64) {
        self.accounting.block_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add to the size of exceptions serialized for this call.
    pub fn increment_response_exception_size(&self, bytes: u64) {
        self.accounting
            .exception_size
            .fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn response_cell_size(&self) -> u64 { self.accounting.cell_size.load(Ordering::Relaxed) }

    #[must_use]
    pub fn response_block_size(&self) -> u64 { self.accounting.block_size.load(Ordering::Relaxed) }

    #[must_use]
    pub fn response_exception_size(&self) -> u64 {
        self.accounting.exception_size.load(Ordering::Relaxed)
    }

    /// Register a callback to run exactly once when the call is cleaned up.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::CallbackAlreadySet`] if a callback is already
    /// registered; the new callback is dropped without running.
    pub fn set_callback<F>(&self, callback: F) -> Result<(), CallError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = lock(&self.callback);
        if slot.is_some() {
            return Err(CallError::CallbackAlreadySet);
        }
        *slot = Some(Box::new(callback));
        Ok(())
    }

    /// Time since the call was received.
    #[must_use]
    pub fn elapsed(&self) -> Duration { self.received_at.elapsed() }

    /// Compact description of the call without its payloads.
    #[must_use]
    pub fn summary(&self) -> CallSummary<'_, Req, Resp> { CallSummary(self) }

    /// Hand the request side channel to a handler.
    pub(crate) fn take_cells(&mut self) -> Option<SideChannel> {
        self.cells
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Record the start of execution.
    pub(crate) fn mark_started(&mut self, now: Instant) -> Result<(), CallError> {
        if self.started_at.is_some() {
            return Err(CallError::AlreadyStarted);
        }
        self.started_at = Some(now.max(self.received_at));
        Ok(())
    }

    pub(crate) fn attach_reservation(&mut self, reservation: Reservation) {
        debug_assert!(self.reservation.is_none(), "call admitted twice");
        self.reservation = Some(reservation);
    }

    /// Bytes currently reserved against admission for this call.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 { self.reservation.as_ref().map_or(0, Reservation::bytes) }
}

impl<Req, Resp> fmt::Debug for Call<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("size", &self.size)
            .field("state", &self.state())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Display adapter produced by [`Call::summary`].
pub struct CallSummary<'a, Req, Resp>(&'a Call<Req, Resp>);

impl<Req, Resp> fmt::Display for CallSummary<'_, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let call = self.0;
        write!(
            f,
            "callId: {} service: {} methodName: {} priority: {} size: {} state: {} elapsed: {}ms \
             deadline: {} connection: {} peer: {}",
            call.id,
            call.target.service(),
            call.target.method(),
            call.priority,
            call.size,
            call.state(),
            call.elapsed().as_millis(),
            call.deadline,
            call.connection.id(),
            call.connection.peer_addr(),
        )?;
        if let Some(started) = call.started_at {
            write!(
                f,
                " queueTime: {}ms",
                started.duration_since(call.received_at).as_millis()
            )?;
        }
        Ok(())
    }
}
