//! Errors raised by misuse of a call's response and timing API.

use thiserror::Error;

use super::CallState;

/// Programming errors detected on a [`super::Call`].
///
/// These indicate a caller broke the call contract. They are logged and
/// counted where they occur but never panic.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// `set_response` was called after a response had already been set.
    #[error("a response has already been set for this call")]
    DoubleResponse,
    /// `try_send` was called before any response was set.
    #[error("no response has been set for this call")]
    NotReady,
    /// The start timestamp was already recorded.
    #[error("call execution already started")]
    AlreadyStarted,
    /// A completion callback is already registered.
    #[error("a completion callback is already registered")]
    CallbackAlreadySet,
    /// The requested lifecycle transition is not allowed from the observed
    /// state.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: CallState, to: CallState },
}
