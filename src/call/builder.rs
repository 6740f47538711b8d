//! Factory used by the decoding layer to construct calls.

use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

use super::{
    Attributes,
    Call,
    CallId,
    CallShared,
    CallState,
    CallTarget,
    Priority,
    RequestHeader,
    ResponseAccounting,
    ResponseSlot,
    SideChannel,
};
use crate::{connection::Connection, deadline::Deadline};

/// Builder for [`Call`].
///
/// Timeout and priority default to the values carried in the
/// [`RequestHeader`]; the decoder may override both, for example after
/// deriving a priority from the target method. Size defaults to zero, which
/// always passes admission.
///
/// # Examples
///
/// ```
/// use std::net::SocketAddr;
///
/// use async_trait::async_trait;
/// use callframe::{
///     call::{Attributes, Call, CallId, CallTarget, Priority, RequestHeader},
///     connection::{Connection, ConnectionId},
///     response::{Response, ResponseSink},
/// };
///
/// struct Discard;
///
/// #[async_trait]
/// impl ResponseSink<String> for Discard {
///     async fn send(&self, _: CallId, _: Response<String>) -> std::io::Result<()> { Ok(()) }
/// }
///
/// let peer: SocketAddr = "127.0.0.1:40000".parse().expect("valid address");
/// let conn = Connection::new(ConnectionId::new(1), peer, Attributes::empty(), Discard);
/// let call: Call<String, String> = Call::builder(
///     conn,
///     RequestHeader::new(7, "Get"),
///     CallTarget::new("ClientService", "Get"),
/// )
/// .param("row-1".to_owned())
/// .priority(Priority::HIGH)
/// .size(128)
/// .build();
/// assert_eq!(call.id(), CallId::new(7));
/// assert_eq!(call.remote_port(), 40000);
/// ```
#[must_use]
pub struct CallBuilder<Req, Resp> {
    connection: Arc<Connection<Resp>>,
    header: RequestHeader,
    target: CallTarget,
    param: Option<Req>,
    cells: Option<SideChannel>,
    timeout: Option<Duration>,
    priority: Priority,
    size: u64,
    request_attributes: Attributes,
    received_at: Option<Instant>,
}

impl<Req, Resp: Send + 'static> CallBuilder<Req, Resp> {
    pub(super) fn new(
        connection: Arc<Connection<Resp>>,
        header: RequestHeader,
        target: CallTarget,
    ) -> Self {
        let timeout = header.timeout;
        let priority = header.priority.map_or(Priority::NORMAL, Priority::new);
        Self {
            connection,
            header,
            target,
            param: None,
            cells: None,
            timeout,
            priority,
            size: 0,
            request_attributes: Attributes::empty(),
            received_at: None,
        }
    }

    /// Decoded parameter message.
    pub fn param(mut self, param: Req) -> Self {
        self.param = Some(param);
        self
    }

    /// Side-channel payload that arrived with the request.
    pub fn cells(mut self, cells: SideChannel) -> Self {
        self.cells = Some(cells);
        self
    }

    /// Caller-declared timeout. Zero disables the deadline.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Estimated size in bytes charged against admission.
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn request_attributes(mut self, attributes: Attributes) -> Self {
        self.request_attributes = attributes;
        self
    }

    /// When the request envelope was fully decoded. Defaults to the time of
    /// [`CallBuilder::build`].
    pub fn received_at(mut self, at: Instant) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Construct the call and register it with its connection.
    ///
    /// A call built for a connection that has already closed starts out
    /// abandoned and will never be executed.
    pub fn build(self) -> Call<Req, Resp> {
        let received_at = self.received_at.unwrap_or_else(Instant::now);
        let id = CallId::new(self.header.call_id);
        let shared = Arc::new(CallShared::default());
        let registration = self.connection.register(id, &shared);
        if self.connection.is_closed() {
            let _ = shared.transition(CallState::Abandoned);
        }
        Call {
            id,
            header: self.header,
            target: self.target,
            param: self.param,
            cells: Mutex::new(self.cells),
            received_at,
            started_at: None,
            timeout: self.timeout,
            deadline: Deadline::after(received_at, self.timeout),
            priority: self.priority,
            size: self.size,
            request_attributes: self.request_attributes,
            connection: self.connection,
            shared,
            registration: Some(registration),
            response: Mutex::new(ResponseSlot::Empty),
            reservation: None,
            accounting: ResponseAccounting::default(),
            callback: Mutex::new(None),
            cleaned: false,
        }
    }
}
