//! Error reported to the reader task by [`crate::executor::CallExecutor::submit`].
//!
//! By the time a `SubmitError` is returned the call has already been answered
//! (or deliberately left unanswered) and cleaned up; the reader only needs it
//! for logging and backpressure decisions.

use thiserror::Error;

use crate::{admission::AdmissionError, call::CallId};

/// Why a submitted call did not reach the scheduler.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The deadline had already passed when the call was submitted.
    #[error("call {0} expired before it was queued")]
    Expired(CallId),
    /// Admission control refused the call.
    #[error("call {call_id} rejected: {source}")]
    Rejected {
        call_id: CallId,
        #[source]
        source: AdmissionError,
    },
    /// The executor is shutting down.
    #[error("call {0} refused: executor is shutting down")]
    ShuttingDown(CallId),
}

impl SubmitError {
    /// The id of the call that was not queued.
    #[must_use]
    pub fn call_id(&self) -> CallId {
        match self {
            Self::Expired(id) | Self::ShuttingDown(id) => *id,
            Self::Rejected { call_id, .. } => *call_id,
        }
    }
}
