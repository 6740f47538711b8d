//! Turning panic payloads into loggable messages and error causes.
//!
//! Handler panics are caught by the dispatcher and reported to the caller as
//! handler failures; [`HandlerPanic`] carries the formatted payload as the
//! error's cause.

use std::{any::Any, fmt};

use thiserror::Error;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to a placeholder otherwise.
///
/// ```
/// use callframe::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert_eq!(format_panic(Box::new(5_u32)).to_string(), "<non-string panic>");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    fn as_str(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("<non-string panic>"))
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// A handler panicked while executing a call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    message: String,
}

impl HandlerPanic {
    /// The formatted panic payload.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl From<PanicMessage> for HandlerPanic {
    fn from(panic: PanicMessage) -> Self {
        Self {
            message: panic.to_string(),
        }
    }
}
