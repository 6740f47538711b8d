//! Metric helpers for `callframe`.
//!
//! This module defines metric names and small helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::{call::CallState, response::ErrorKind};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "callframe_connections_active";
/// Name of the counter tracking finished calls, labelled by final state.
pub const CALLS_TOTAL: &str = "callframe_calls_total";
/// Name of the gauge tracking bytes reserved by admitted calls.
pub const OUTSTANDING_BYTES: &str = "callframe_outstanding_bytes";
/// Name of the gauge tracking calls waiting in the scheduler.
pub const CALLS_QUEUED: &str = "callframe_calls_queued";
/// Name of the counter tracking error occurrences, labelled by kind.
pub const ERRORS_TOTAL: &str = "callframe_errors_total";
/// Name of the counter tracking responses handed to the transport.
pub const RESPONSES_TOTAL: &str = "callframe_responses_total";
/// Name of the counter tracking response payload bytes reported by handlers.
pub const RESPONSE_BYTES_TOTAL: &str = "callframe_response_bytes_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Add newly reserved bytes to the outstanding-bytes gauge.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
#[allow(clippy::cast_precision_loss, reason = "gauge values are f64")]
pub fn add_outstanding_bytes(bytes: u64) {
    #[cfg(feature = "metrics")]
    gauge!(OUTSTANDING_BYTES).increment(bytes as f64);
}

/// Remove released bytes from the outstanding-bytes gauge.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
#[allow(clippy::cast_precision_loss, reason = "gauge values are f64")]
pub fn sub_outstanding_bytes(bytes: u64) {
    #[cfg(feature = "metrics")]
    gauge!(OUTSTANDING_BYTES).decrement(bytes as f64);
}

/// Record the scheduler's queue length.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
#[allow(clippy::cast_precision_loss, reason = "gauge values are f64")]
pub fn set_queued(len: usize) {
    #[cfg(feature = "metrics")]
    gauge!(CALLS_QUEUED).set(len as f64);
}

/// Record a cleaned-up call by its final state.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
pub fn inc_calls(outcome: CallState) {
    #[cfg(feature = "metrics")]
    counter!(CALLS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Record an error response of the given kind.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
pub fn inc_errors(kind: ErrorKind) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record a second `set_response` on the same call.
pub fn inc_double_responses() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => "double_response").increment(1);
}

/// Record a response that could not be delivered.
pub fn inc_connection_gone() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => "connection_gone").increment(1);
}

/// Record a panic that escaped to a worker loop.
pub fn inc_worker_panics() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => "worker_panic").increment(1);
}

/// Record a response handed to the transport. `None` means success.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
pub fn inc_responses(error: Option<ErrorKind>) {
    #[cfg(feature = "metrics")]
    counter!(RESPONSES_TOTAL, "status" => error.map_or("ok", ErrorKind::as_str)).increment(1);
}

/// Add transmitted response payload bytes.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables))]
pub fn add_response_bytes(bytes: u64) {
    #[cfg(feature = "metrics")]
    counter!(RESPONSE_BYTES_TOTAL).increment(bytes);
}
