//! Shared fixtures for exercising the `callframe` pipeline in tests.
//!
//! Re-exports the crate's own test helpers (a recording response sink and
//! call builders) and adds scriptable handlers, log capture and metrics
//! snapshots.
//!
//! ```rust
//! use callframe_testing::{RecordingSink, call, connection};
//!
//! let sink = RecordingSink::<String>::new();
//! let conn = connection(&sink);
//! let call = call(&conn, 1).size(128).build();
//! assert_eq!(call.size(), 128);
//! ```

pub mod handlers;
pub mod logging;
pub mod metrics;

pub use callframe::test_helpers::{RecordingSink, TestCall, call, connection, peer};
pub use handlers::{Cooperative, Echo, Failing, Gate, GatedEcho, Panicking, gated};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, debugging_recorder_setup, gauge_value};
