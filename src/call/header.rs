//! Decoded request header preceding the parameter payload.

use std::fmt;

use tokio::time::Duration;

/// Identifier the client assigned to a call; echoed back in the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Create a new [`CallId`].
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl From<u64> for CallId {
    fn from(value: u64) -> Self { Self(value) }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Client software version reported in the request header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub revision: Option<String>,
}

/// Metadata frame the decoder produced ahead of the parameter payload.
///
/// `priority` and `timeout` are the values the client asked for; the decoder
/// may override them when building the call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHeader {
    pub call_id: u64,
    pub method_name: String,
    /// Whether a parameter message followed the header.
    pub request_param: bool,
    /// Whether the client declared a cell-block codec, allowing side-channel
    /// payloads in both directions.
    pub cell_block: bool,
    pub priority: Option<u32>,
    pub timeout: Option<Duration>,
    pub client_version: Option<VersionInfo>,
}

impl RequestHeader {
    /// Minimal header for `call_id` invoking `method_name`.
    #[must_use]
    pub fn new(call_id: u64, method_name: impl Into<String>) -> Self {
        Self {
            call_id,
            method_name: method_name.into(),
            request_param: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cell_block(mut self, cell_block: bool) -> Self {
        self.cell_block = cell_block;
        self
    }
}
