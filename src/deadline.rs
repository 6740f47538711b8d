//! Deadline computation and expiry checks for inbound calls.
//!
//! A [`Deadline`] is derived once from a call's receive timestamp and the
//! caller-declared timeout. It is consulted when the call is submitted, when
//! a worker selects it from the scheduler, and by handlers that want to stop
//! long-running work cooperatively. Nothing here preempts a running handler.

use std::fmt;

use tokio::time::{Duration, Instant};

/// Absolute point in time after which a call must not be started.
///
/// A zero or absent timeout produces an unbounded deadline that never
/// expires.
///
/// ```
/// use tokio::time::{Duration, Instant};
/// use callframe::deadline::Deadline;
///
/// let received = Instant::now();
/// let deadline = Deadline::after(received, Some(Duration::from_millis(50)));
/// assert!(!deadline.is_expired(received + Duration::from_millis(50)));
/// assert!(deadline.is_expired(received + Duration::from_millis(51)));
/// assert!(!Deadline::after(received, None).is_expired(received + Duration::from_secs(3600)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub const fn unbounded() -> Self { Self(None) }

    /// Compute the deadline for a call received at `received_at`.
    ///
    /// `None` and `Some(Duration::ZERO)` both yield [`Deadline::unbounded`].
    /// Timeouts too large to represent also saturate to unbounded.
    #[must_use]
    pub fn after(received_at: Instant, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) if !t.is_zero() => Self(received_at.checked_add(t)),
            _ => Self::unbounded(),
        }
    }

    /// The absolute expiry instant, or `None` when unbounded.
    #[must_use]
    pub const fn instant(&self) -> Option<Instant> { self.0 }

    /// Returns `true` when the deadline has a finite expiry.
    #[must_use]
    pub const fn is_bounded(&self) -> bool { self.0.is_some() }

    /// Returns `true` once `now` is strictly past the deadline.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool { self.0.is_some_and(|at| now > at) }

    /// Time left before expiry at `now`.
    ///
    /// Returns `None` for unbounded deadlines and [`Duration::ZERO`] once the
    /// deadline has passed.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(now))
    }

    /// Amount by which `now` overshoots the deadline, if it does.
    #[must_use]
    pub fn overdue_by(&self, now: Instant) -> Option<Duration> {
        self.0
            .filter(|at| now > *at)
            .map(|at| now.duration_since(at))
    }
}

impl Default for Deadline {
    fn default() -> Self { Self::unbounded() }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remaining(Instant::now()) {
            None => f.write_str("none"),
            Some(left) if left.is_zero() => f.write_str("expired"),
            Some(left) => write!(f, "{}ms", left.as_millis()),
        }
    }
}
