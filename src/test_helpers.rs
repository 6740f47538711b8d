#![cfg(any(test, feature = "test-helpers"))]
//! Test-only helpers for building connections and calls.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    call::{Attributes, Call, CallBuilder, CallId, CallTarget, RequestHeader},
    connection::{Connection, ConnectionId},
    response::{Response, ResponseSink},
    sync::lock,
};

/// Call type used throughout the tests: string request and response.
pub type TestCall = Call<String, String>;

/// [`ResponseSink`] that records every response it is handed.
pub struct RecordingSink<R> {
    sent: Mutex<Vec<(CallId, Response<R>)>>,
    fail: AtomicBool,
}

impl<R> RecordingSink<R> {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Make subsequent sends fail with `BrokenPipe`.
    pub fn fail_sends(&self) { self.fail.store(true, Ordering::SeqCst); }

    /// Number of responses recorded so far.
    #[must_use]
    pub fn len(&self) -> usize { lock(&self.sent).len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Remove and return the recorded responses.
    #[must_use]
    pub fn take(&self) -> Vec<(CallId, Response<R>)> { std::mem::take(&mut *lock(&self.sent)) }

    /// Ids of recorded responses in transmission order.
    #[must_use]
    pub fn call_ids(&self) -> Vec<CallId> { lock(&self.sent).iter().map(|(id, _)| *id).collect() }
}

#[async_trait]
impl<R: Send + 'static> ResponseSink<R> for RecordingSink<R> {
    async fn send(&self, call_id: CallId, response: Response<R>) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"));
        }
        lock(&self.sent).push((call_id, response));
        Ok(())
    }
}

/// Loopback peer address used by test connections.
#[must_use]
pub fn peer() -> SocketAddr { SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000)) }

/// Open a connection whose responses land in `sink`.
#[must_use]
pub fn connection<R: Send + 'static>(sink: &Arc<RecordingSink<R>>) -> Arc<Connection<R>> {
    Connection::new(
        ConnectionId::new(1),
        peer(),
        Attributes::empty(),
        Arc::clone(sink),
    )
}

/// Builder for a string call with id `id` addressed to `TestService/Echo`.
#[must_use]
pub fn call(connection: &Arc<Connection<String>>, id: u64) -> CallBuilder<String, String> {
    Call::builder(
        Arc::clone(connection),
        RequestHeader::new(id, "Echo"),
        CallTarget::new("TestService", "Echo"),
    )
    .param(format!("req-{id}"))
}
