//! Release of every resource a call holds.

use std::{
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::PoisonError,
};

use tracing::{debug, error, warn};

use super::{Call, CallState, ResponseSlot};
use crate::panic::format_panic;

impl<Req, Resp> Call<Req, Resp> {
    /// Release the call's payloads, admission bytes and connection slot, then
    /// run the completion callback.
    ///
    /// Idempotent: only the first invocation does anything and returns
    /// `true`. A call that is not yet terminal is marked abandoned first.
    /// Dropping a call runs cleanup implicitly, so no exit path can leak.
    pub fn cleanup(&mut self) -> bool {
        if self.cleaned {
            return false;
        }
        self.cleaned = true;

        let state = self.shared.state();
        if !state.is_terminal() {
            if let Err(observed) = self.shared.transition(CallState::Abandoned) {
                debug!(call_id = %self.id, %observed, "state changed during cleanup");
            } else {
                warn!(call_id = %self.id, %state, "cleaning up unfinished call");
            }
        }

        drop(self.take_cells());
        self.param = None;
        let slot = mem::replace(
            self.response
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
            ResponseSlot::Taken,
        );
        if let ResponseSlot::Ready(response) = slot {
            debug!(
                call_id = %self.id,
                failure = response.is_failure(),
                "dropping response that was never sent"
            );
        }
        drop(self.reservation.take());
        if let Some(slot) = self.registration.take() {
            self.connection.deregister(slot);
        }

        let callback = self
            .callback
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback
            && let Err(payload) = catch_unwind(AssertUnwindSafe(callback))
        {
            error!(
                call_id = %self.id,
                panic = %format_panic(payload),
                "completion callback panicked"
            );
        }

        let outcome = self.shared.state();
        crate::metrics::inc_calls(outcome);
        debug!(call = %self.summary(), "call cleaned up");
        true
    }
}

impl<Req, Resp> Drop for Call<Req, Resp> {
    fn drop(&mut self) { self.cleanup(); }
}
