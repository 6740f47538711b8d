//! Admission control against an outstanding-bytes budget.
//!
//! Every admitted call reserves its estimated size until it is cleaned up.
//! When the sum of reservations would exceed the configured capacity the
//! call is rejected on the spot; admission never waits for room.

use std::{fmt, num::NonZeroU64, sync::Arc};

use thiserror::Error;
use tracing::debug;

use crate::{
    call::{Call, CallState},
    sync::{AtomicU64, Ordering},
};

/// Reasons a call was not admitted.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Reserving `requested` bytes would push the outstanding total past
    /// `capacity`.
    #[error(
        "call queue is too big: requested {requested} bytes with {outstanding} of {capacity} \
         outstanding"
    )]
    OverCapacity {
        requested: u64,
        outstanding: u64,
        capacity: u64,
    },
    /// The call was not in the `Pending` state.
    #[error("call cannot be admitted from state {0}")]
    NotPending(CallState),
}

/// Decision returned by [`AdmissionController::try_admit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(AdmissionError),
}

impl Admission {
    #[must_use]
    pub fn is_admitted(&self) -> bool { matches!(self, Self::Admitted) }
}

/// Injectable accounting object bounding the bytes held by queued and
/// executing calls.
///
/// One controller is typically shared by every connection of a listener, but
/// nothing stops a server from creating one per tenant.
///
/// ```
/// use std::{num::NonZeroU64, sync::Arc};
/// use callframe::admission::AdmissionController;
///
/// let budget = Arc::new(AdmissionController::new(NonZeroU64::new(1000).expect("non-zero")));
/// let a = budget.try_reserve(600).expect("fits");
/// assert!(budget.try_reserve(500).is_err());
/// drop(a);
/// assert!(budget.try_reserve(500).is_ok());
/// ```
pub struct AdmissionController {
    capacity: u64,
    outstanding: AtomicU64,
}

impl AdmissionController {
    /// Create a controller admitting at most `capacity` outstanding bytes.
    #[must_use]
    pub fn new(capacity: NonZeroU64) -> Self {
        Self {
            capacity: capacity.get(),
            outstanding: AtomicU64::new(0),
        }
    }

    /// Configured byte capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 { self.capacity }

    /// Bytes currently reserved by admitted, not yet cleaned up calls.
    #[must_use]
    pub fn outstanding(&self) -> u64 { self.outstanding.load(Ordering::Acquire) }

    /// Bytes still available for new reservations.
    #[must_use]
    pub fn available(&self) -> u64 { self.capacity.saturating_sub(self.outstanding()) }

    /// Atomically reserve `bytes` against the budget.
    ///
    /// The returned [`Reservation`] gives the bytes back when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::OverCapacity`] if the reservation would
    /// exceed the capacity. Nothing is reserved in that case.
    pub fn try_reserve(self: &Arc<Self>, bytes: u64) -> Result<Reservation, AdmissionError> {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|total| *total <= self.capacity)
                .ok_or(AdmissionError::OverCapacity {
                    requested: bytes,
                    outstanding: current,
                    capacity: self.capacity,
                })?;
            match self.outstanding.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        crate::metrics::add_outstanding_bytes(bytes);
        Ok(Reservation {
            controller: Arc::clone(self),
            bytes,
        })
    }

    /// Admit `call`, attaching a reservation for its size.
    ///
    /// On success the call moves to [`CallState::Admitted`]. On rejection the
    /// call is left `Pending` so the caller can reject it with a response and
    /// run cleanup.
    pub fn try_admit<Req, Resp>(self: &Arc<Self>, call: &mut Call<Req, Resp>) -> Admission {
        let state = call.state();
        if state != CallState::Pending {
            return Admission::Rejected(AdmissionError::NotPending(state));
        }
        let reservation = match self.try_reserve(call.size()) {
            Ok(r) => r,
            Err(e) => {
                debug!(call = %call.summary(), error = %e, "call rejected by admission control");
                return Admission::Rejected(e);
            }
        };
        match call.shared().transition(CallState::Admitted) {
            Ok(_) => {
                call.attach_reservation(reservation);
                Admission::Admitted
            }
            // The connection closed between the state check and here; the
            // reservation is dropped and the bytes returned.
            Err(observed) => Admission::Rejected(AdmissionError::NotPending(observed)),
        }
    }

    fn release(&self, bytes: u64) {
        let previous = self.outstanding.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(previous >= bytes, "released more bytes than reserved");
        crate::metrics::sub_outstanding_bytes(bytes);
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Bytes held against an [`AdmissionController`].
///
/// Dropping the reservation returns its bytes, so they are released exactly
/// once no matter which path finishes the call.
#[must_use = "dropping a reservation releases its bytes immediately"]
pub struct Reservation {
    controller: Arc<AdmissionController>,
    bytes: u64,
}

impl Reservation {
    /// Size of this reservation in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 { self.bytes }
}

impl Drop for Reservation {
    fn drop(&mut self) { self.controller.release(self.bytes); }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish()
    }
}
