//! Response shapes and the transport-facing sink.
//!
//! A call ends with exactly one [`Response`]: either a success carrying the
//! handler's result and optional side channel, or an [`ErrorResponse`]. The
//! two shapes are distinct so a transport can encode them differently and a
//! caller can tell an application error from a load-shedding rejection.

use std::{error::Error as StdError, fmt, io, sync::Arc};

use async_trait::async_trait;

use crate::call::{CallId, SideChannel};

/// Boxed error preserved as the cause of an error response.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Category of an error response.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Admission control refused the call before any work began.
    Overloaded,
    /// The call was not started before its deadline.
    DeadlineExceeded,
    /// The handler returned an error or panicked.
    HandlerFailure,
    /// The server stopped accepting work before the call could run.
    ShuttingDown,
}

impl ErrorKind {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overloaded => "overloaded",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::HandlerFailure => "handler_failure",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Returns `true` when the error was raised before any handler ran.
    #[must_use]
    pub const fn is_rejection(self) -> bool { matches!(self, Self::Overloaded | Self::ShuttingDown) }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Error-carrying response body.
#[derive(Debug)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    /// Human-readable description sent to the caller.
    pub message: String,
    /// The original failure, when one exists.
    pub cause: Option<BoxError>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Final outcome of a call as handed to the transport.
pub enum Response<R> {
    /// The handler's result and optional result side channel.
    Success {
        result: R,
        cells: Option<SideChannel>,
    },
    /// Any failure reported to the caller.
    Failure(ErrorResponse),
}

impl<R> Response<R> {
    /// Successful response without a side channel.
    pub fn success(result: R) -> Self {
        Self::Success {
            result,
            cells: None,
        }
    }

    /// Error response of the given kind.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure(ErrorResponse::new(kind, message))
    }

    /// Returns `true` for [`Response::Failure`].
    #[must_use]
    pub fn is_failure(&self) -> bool { matches!(self, Self::Failure(_)) }

    /// The error kind, if this is a failure.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure(e) => Some(e.kind),
            Self::Success { .. } => None,
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Response<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { result, cells } => f
                .debug_struct("Success")
                .field("result", result)
                .field("cells", &cells.is_some())
                .finish(),
            Self::Failure(e) => f.debug_tuple("Failure").field(e).finish(),
        }
    }
}

impl<R> From<ErrorResponse> for Response<R> {
    fn from(e: ErrorResponse) -> Self { Self::Failure(e) }
}

/// Result of [`crate::call::Call::try_send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// This invocation transmitted the response.
    Sent,
    /// Another path already transmitted (or claimed) the response.
    AlreadySent,
    /// The originating connection is closed; nothing was transmitted.
    ConnectionGone,
}

/// Writer side of a connection, implemented by the transport.
///
/// `send` may wait on write backpressure; its timeout policy belongs to the
/// transport. An `Err` means the response could not be delivered and the
/// connection should be considered gone.
#[async_trait]
pub trait ResponseSink<R>: Send + Sync + 'static {
    async fn send(&self, call_id: CallId, response: Response<R>) -> io::Result<()>;
}

#[async_trait]
impl<R, S> ResponseSink<R> for Arc<S>
where
    R: Send + 'static,
    S: ResponseSink<R> + ?Sized,
{
    async fn send(&self, call_id: CallId, response: Response<R>) -> io::Result<()> {
        (**self).send(call_id, response).await
    }
}
