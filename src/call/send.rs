//! Exactly-once response assembly and transmission.
//!
//! Every path that wants to answer a call (the worker after the handler
//! returns, the scheduler abandoning an expired call, the executor rejecting
//! one) first claims the response latch. Only the winner touches the
//! transport; everyone else observes [`SendOutcome::AlreadySent`].

use std::mem;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{Call, CallError, CallState, ResponseSlot};
use crate::{
    response::{ErrorKind, ErrorResponse, Response, SendOutcome},
    sync::lock,
};

impl<Req, Resp: Send + 'static> Call<Req, Resp> {
    /// Store the call's response for a later [`Call::try_send`].
    ///
    /// # Errors
    ///
    /// Returns [`CallError::DoubleResponse`] if a response was already set.
    /// The new response is dropped; the first one stands.
    pub fn set_response(&self, response: Response<Resp>) -> Result<(), CallError> {
        let mut slot = lock(&self.response);
        if !matches!(*slot, ResponseSlot::Empty) {
            drop(slot);
            error!(call = %self.summary(), "response set twice for call");
            crate::metrics::inc_double_responses();
            return Err(CallError::DoubleResponse);
        }
        *slot = ResponseSlot::Ready(response);
        Ok(())
    }

    /// Returns `true` once a response has been set.
    #[must_use]
    pub fn has_response(&self) -> bool { !matches!(*lock(&self.response), ResponseSlot::Empty) }

    /// Transmit the stored response if no other path has answered the call.
    ///
    /// Safe to call any number of times, concurrently or not: exactly one
    /// invocation returns [`SendOutcome::Sent`] or
    /// [`SendOutcome::ConnectionGone`] and the rest return
    /// [`SendOutcome::AlreadySent`]. Transport failures are logged and
    /// reported as `ConnectionGone`, never returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NotReady`] if no response has been set and the
    /// call has not been answered by another path, and
    /// [`CallError::IllegalTransition`] if the call is not executing. A
    /// call that never ran cannot be recorded as sent.
    pub async fn try_send(&self) -> Result<SendOutcome, CallError> {
        if !self.has_response() {
            if self.shared.is_responded() {
                return Ok(SendOutcome::AlreadySent);
            }
            return Err(CallError::NotReady);
        }
        let state = self.shared.state();
        if state != CallState::Executing {
            // The latch is claimed before the terminal transition, so a
            // concurrent sender that already won is visible here.
            if self.shared.is_responded() {
                debug!(call = %self.summary(), "response already sent; discarding result");
                return Ok(SendOutcome::AlreadySent);
            }
            warn!(call = %self.summary(), %state, "response set on a call that is not executing");
            return Err(CallError::IllegalTransition {
                from: state,
                to: CallState::Sent,
            });
        }
        if !self.shared.claim_response() {
            debug!(call = %self.summary(), "response already sent; discarding result");
            return Ok(SendOutcome::AlreadySent);
        }
        let slot = mem::replace(&mut *lock(&self.response), ResponseSlot::Taken);
        let ResponseSlot::Ready(response) = slot else {
            error!(call = %self.summary(), "response latch claimed without a stored response");
            return Ok(SendOutcome::AlreadySent);
        };
        let outcome = self.deliver(response).await;
        let terminal = match outcome {
            SendOutcome::Sent => CallState::Sent,
            _ => CallState::Abandoned,
        };
        if let Err(observed) = self.shared.transition(terminal) {
            debug!(call = %self.summary(), %observed, %terminal, "terminal state not recorded");
        }
        Ok(outcome)
    }

    /// Abandon the call because its deadline passed.
    ///
    /// Unless another path already answered the call, the caller receives a
    /// [`ErrorKind::DeadlineExceeded`] response when its connection is still
    /// open. Works on queued and executing calls; an executing handler is not
    /// interrupted, but its result will be discarded.
    pub async fn abandon_expired(&self) -> SendOutcome {
        let overdue = self
            .deadline
            .overdue_by(Instant::now())
            .unwrap_or_default();
        crate::metrics::inc_errors(ErrorKind::DeadlineExceeded);
        let message = format!(
            "call {} to {} timed out after {}ms (deadline passed {}ms ago)",
            self.id,
            self.target,
            self.elapsed().as_millis(),
            overdue.as_millis()
        );
        self.finish_with_error(
            ErrorResponse::new(ErrorKind::DeadlineExceeded, message),
            CallState::Abandoned,
        )
        .await
    }

    /// Refuse the call before it runs.
    ///
    /// With `respond` set the caller receives `error`; otherwise the call is
    /// marked rejected and no response is ever sent. Returns `None` in the
    /// silent case.
    pub async fn reject(&self, error: ErrorResponse, respond: bool) -> Option<SendOutcome> {
        crate::metrics::inc_errors(error.kind);
        if respond {
            return Some(self.finish_with_error(error, CallState::Rejected).await);
        }
        if self.shared.claim_response()
            && let Err(observed) = self.shared.transition(CallState::Rejected)
        {
            debug!(call = %self.summary(), %observed, "silent rejection of a finished call");
        }
        None
    }

    async fn finish_with_error(&self, error: ErrorResponse, terminal: CallState) -> SendOutcome {
        if !self.shared.claim_response() {
            debug!(call = %self.summary(), kind = %error.kind, "call already answered");
            return SendOutcome::AlreadySent;
        }
        if let Err(observed) = self.shared.transition(terminal) {
            debug!(call = %self.summary(), %observed, %terminal, "call finished elsewhere");
            return if observed == CallState::Abandoned {
                SendOutcome::ConnectionGone
            } else {
                SendOutcome::AlreadySent
            };
        }
        self.deliver(Response::Failure(error)).await
    }

    /// Hand `response` to the connection's sink.
    async fn deliver(&self, response: Response<Resp>) -> SendOutcome {
        if self.connection.is_closed() {
            debug!(call = %self.summary(), "connection closed; response dropped");
            crate::metrics::inc_connection_gone();
            return SendOutcome::ConnectionGone;
        }
        let kind = response.error_kind();
        match self.connection.send(self.id, response).await {
            Ok(()) => {
                crate::metrics::inc_responses(kind);
                crate::metrics::add_response_bytes(
                    self.response_cell_size() + self.response_exception_size(),
                );
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(call = %self.summary(), error = %e, "failed to send response");
                crate::metrics::inc_connection_gone();
                SendOutcome::ConnectionGone
            }
        }
    }
}
