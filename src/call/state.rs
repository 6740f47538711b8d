//! Lifecycle state shared between a call and its connection.
//!
//! The call itself is owned by whichever stage currently holds it (the
//! scheduler queue, then a worker). The connection only needs to mark queued
//! calls as abandoned when it closes, so the mutable lifecycle lives in a
//! small [`CallShared`] block reachable through an `Arc` from both sides.

use std::fmt;

use crate::sync::{AtomicBool, AtomicU8, Ordering};

/// Position of a call in its lifecycle.
///
/// ```text
/// Pending ─┬─> Admitted ─┬─> Executing ─┬─> Sent
///          │             │              └─> Abandoned
///          │             ├─> Abandoned
///          │             └─> Rejected
///          ├─> Rejected
///          └─> Abandoned
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallState {
    /// Constructed by the decoder, not yet admitted.
    Pending = 0,
    /// Admitted against the byte budget and waiting for a worker.
    Admitted = 1,
    /// A worker is running the handler.
    Executing = 2,
    /// A response (success or error) was handed to the transport.
    Sent = 3,
    /// Refused by admission control or by a shutting-down scheduler.
    Rejected = 4,
    /// Dropped because the deadline passed or the caller went away.
    Abandoned = 5,
}

impl CallState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Admitted,
            2 => Self::Executing,
            3 => Self::Sent,
            4 => Self::Rejected,
            _ => Self::Abandoned,
        }
    }

    /// Returns `true` for `Sent`, `Rejected` and `Abandoned`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Rejected | Self::Abandoned)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: CallState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Admitted | Self::Rejected | Self::Abandoned)
                | (Self::Admitted, Self::Executing | Self::Rejected | Self::Abandoned)
                | (Self::Executing, Self::Sent | Self::Abandoned)
        )
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Admitted => "admitted",
            Self::Executing => "executing",
            Self::Sent => "sent",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Atomic lifecycle state plus the single-use response latch.
#[derive(Debug)]
pub struct CallShared {
    state: AtomicU8,
    responded: AtomicBool,
}

impl Default for CallShared {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(CallState::Pending as u8),
            responded: AtomicBool::new(false),
        }
    }
}

impl CallShared {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CallState { CallState::from_u8(self.state.load(Ordering::Acquire)) }

    /// Move to `next` if the current state allows it.
    ///
    /// # Errors
    ///
    /// Returns the observed state when the transition is not permitted,
    /// leaving the state untouched.
    pub fn transition(&self, next: CallState) -> Result<CallState, CallState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let observed = CallState::from_u8(current);
            if !observed.can_transition_to(next) {
                return Err(observed);
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(observed),
                Err(actual) => current = actual,
            }
        }
    }

    /// Claim the right to transmit this call's only response.
    ///
    /// Exactly one caller ever receives `true`.
    pub fn claim_response(&self) -> bool {
        self.responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once some path has claimed the response.
    #[must_use]
    pub fn is_responded(&self) -> bool { self.responded.load(Ordering::Acquire) }
}
