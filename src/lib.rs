#![doc(html_root_url = "https://docs.rs/callframe/latest")]
//! Public API for the `callframe` library.
//!
//! This crate manages the server side of an inbound RPC call after the
//! transport has decoded it: admission against a byte budget, priority
//! scheduling with deadline enforcement, handler dispatch, exactly-once
//! response transmission and guaranteed cleanup. Wire formats, sockets and
//! service routing belong to the embedding server.

pub mod admission;
pub mod call;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod dispatch;
pub mod error;
#[cfg(not(loom))]
pub mod executor;
mod fairness;
pub mod metrics;
pub mod panic;
pub mod response;
pub mod scheduler;
mod sync;
pub mod test_helpers;

pub use admission::{Admission, AdmissionController, AdmissionError, Reservation};
pub use call::{Call, CallError, CallId, CallState, Priority};
pub use config::{ConfigError, ExecutorConfig, FairnessConfig, RejectionPolicy};
pub use connection::{Connection, ConnectionId};
pub use deadline::Deadline;
pub use dispatch::{DispatchOutcome, Handler, HandlerError, Reply, dispatch};
pub use error::SubmitError;
#[cfg(not(loom))]
pub use executor::CallExecutor;
pub use response::{ErrorKind, ErrorResponse, Response, ResponseSink, SendOutcome};
pub use scheduler::{ScheduleError, Scheduler};
