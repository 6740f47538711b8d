//! Running a call's handler and turning its outcome into a response.
//!
//! The dispatcher is the only place application code runs. Errors and panics
//! raised by the [`Handler`] are converted into
//! [`ErrorKind::HandlerFailure`] responses; nothing the handler does can
//! unwind into the worker or skip the response pipeline.

use std::{error::Error as StdError, panic::AssertUnwindSafe};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::{
    call::{Call, CallState, SideChannel},
    panic::{HandlerPanic, format_panic},
    response::{BoxError, ErrorKind, ErrorResponse, Response, SendOutcome},
};

/// Application logic invoked for each call.
///
/// The handler borrows the call for queries (target, parameter, attributes,
/// deadline, response size accounting, completion callback) and owns the
/// request side channel for the duration of the invocation.
///
/// ```
/// use async_trait::async_trait;
/// use callframe::{
///     call::{Call, SideChannel},
///     dispatch::{Handler, HandlerError, Reply},
/// };
///
/// struct Echo;
///
/// #[async_trait]
/// impl Handler<String, String> for Echo {
///     async fn handle(
///         &self,
///         call: &Call<String, String>,
///         _cells: Option<SideChannel>,
///     ) -> Result<Reply<String>, HandlerError> {
///         let param = call.param().ok_or_else(|| HandlerError::new("missing parameter"))?;
///         Ok(Reply::new(param.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<Req, Resp>: Send + Sync + 'static
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn handle(
        &self,
        call: &Call<Req, Resp>,
        cells: Option<SideChannel>,
    ) -> Result<Reply<Resp>, HandlerError>;
}

/// Successful handler result.
#[derive(Debug)]
pub struct Reply<R> {
    pub result: R,
    /// Side channel to stream back after the result.
    pub cells: Option<SideChannel>,
}

impl<R> Reply<R> {
    #[must_use]
    pub fn new(result: R) -> Self {
        Self {
            result,
            cells: None,
        }
    }

    #[must_use]
    pub fn with_cells(mut self, cells: SideChannel) -> Self {
        self.cells = Some(cells);
        self
    }
}

impl<R> From<R> for Reply<R> {
    fn from(result: R) -> Self { Self::new(result) }
}

/// Failure reported by a [`Handler`].
///
/// The message is sent to the caller; the source, when present, is kept as
/// the cause of the resulting error response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, using its display text as the message.
    #[must_use]
    pub fn from_cause<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    fn into_response(self) -> ErrorResponse {
        let response = ErrorResponse::new(ErrorKind::HandlerFailure, self.message);
        match self.source {
            Some(cause) => response.with_cause(cause),
            None => response,
        }
    }
}

/// What happened to a call handed to [`dispatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran; the response pipeline reported this outcome.
    Completed(SendOutcome),
    /// The deadline passed before the handler could start.
    Expired(SendOutcome),
    /// The call could not enter `Executing` from the observed state.
    Skipped(CallState),
}

/// Execute `call` with `handler` and transmit the result.
///
/// Cleanup is left to the caller, which still owns the call.
pub async fn dispatch<Req, Resp, H>(call: &mut Call<Req, Resp>, handler: &H) -> DispatchOutcome
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    H: Handler<Req, Resp> + ?Sized,
{
    let now = Instant::now();
    if call.is_expired(now) {
        return DispatchOutcome::Expired(call.abandon_expired().await);
    }
    if let Err(observed) = call.shared().transition(CallState::Executing) {
        debug!(call = %call.summary(), %observed, "call not dispatched");
        return DispatchOutcome::Skipped(observed);
    }
    if let Err(e) = call.mark_started(now) {
        warn!(call = %call.summary(), error = %e, "start time already recorded");
    }
    let cells = call.take_cells();

    let call_ref: &Call<Req, Resp> = call;
    let result = AssertUnwindSafe(handler.handle(call_ref, cells))
        .catch_unwind()
        .await;
    let response = match result {
        Ok(Ok(reply)) => Response::Success {
            result: reply.result,
            cells: reply.cells,
        },
        Ok(Err(e)) => {
            warn!(call = %call.summary(), error = %e, "handler failed");
            crate::metrics::inc_errors(ErrorKind::HandlerFailure);
            Response::Failure(e.into_response())
        }
        Err(payload) => {
            let panic = HandlerPanic::from(format_panic(payload));
            error!(call = %call.summary(), panic = %panic.message(), "handler panicked");
            crate::metrics::inc_errors(ErrorKind::HandlerFailure);
            Response::Failure(
                ErrorResponse::new(ErrorKind::HandlerFailure, panic.to_string())
                    .with_cause(Box::new(panic)),
            )
        }
    };

    if let Err(e) = call.set_response(response) {
        warn!(call = %call.summary(), error = %e, "handler result not recorded");
    }
    match call.try_send().await {
        Ok(outcome) => DispatchOutcome::Completed(outcome),
        Err(e) => {
            error!(call = %call.summary(), error = %e, "response pipeline refused result");
            DispatchOutcome::Completed(SendOutcome::AlreadySent)
        }
    }
}
