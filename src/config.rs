//! Executor configuration.
//!
//! [`ExecutorConfig`] collects the knobs of a [`crate::executor::CallExecutor`]:
//! worker count, admission budget, scheduler fairness and fast path, and what
//! to do with rejected calls. Build one with [`ExecutorConfig::builder`].

use std::num::NonZeroU64;

use static_assertions::const_assert;
use thiserror::Error;
use tokio::time::Duration;

pub use crate::fairness::FairnessConfig;

/// Default number of worker tasks.
pub const DEFAULT_WORKERS: usize = 8;
/// Upper bound on worker tasks.
pub const MAX_WORKERS: usize = 4096;
/// Default admission budget: 1 GiB of outstanding call bytes.
pub const DEFAULT_QUEUE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;

const_assert!(DEFAULT_WORKERS > 0 && DEFAULT_WORKERS <= MAX_WORKERS);
const_assert!(DEFAULT_QUEUE_CAPACITY_BYTES > 0);

/// How calls refused by admission control are answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Send an `Overloaded` error response so the caller can back off.
    #[default]
    Respond,
    /// Drop the call without a response; the caller times out.
    Silent,
}

/// Errors raised while building an [`ExecutorConfig`].
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The worker count was zero or above [`MAX_WORKERS`].
    #[error("invalid worker count {0}; must be between 1 and {max}", max = MAX_WORKERS)]
    InvalidWorkers(usize),
    /// The admission budget was zero.
    #[error("queue capacity must be at least one byte")]
    ZeroCapacity,
    /// A fairness time slice of zero would yield on every dispatch.
    #[error("fairness time slice must be non-zero")]
    ZeroTimeSlice,
}

/// Settings for a call executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    workers: usize,
    queue_capacity_bytes: NonZeroU64,
    fairness: FairnessConfig,
    fast_path: bool,
    rejection_policy: RejectionPolicy,
}

impl ExecutorConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> ExecutorConfigBuilder { ExecutorConfigBuilder::default() }

    #[must_use]
    pub fn workers(&self) -> usize { self.workers }

    /// Admission budget in bytes.
    #[must_use]
    pub fn queue_capacity_bytes(&self) -> NonZeroU64 { self.queue_capacity_bytes }

    #[must_use]
    pub fn fairness(&self) -> FairnessConfig { self.fairness }

    #[must_use]
    pub fn fast_path(&self) -> bool { self.fast_path }

    #[must_use]
    pub fn rejection_policy(&self) -> RejectionPolicy { self.rejection_policy }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity_bytes: NonZeroU64::MIN.saturating_add(DEFAULT_QUEUE_CAPACITY_BYTES - 1),
            fairness: FairnessConfig::default(),
            fast_path: false,
            rejection_policy: RejectionPolicy::Respond,
        }
    }
}

/// Builder for [`ExecutorConfig`].
///
/// ```
/// use callframe::config::{ExecutorConfig, RejectionPolicy};
///
/// let config = ExecutorConfig::builder()
///     .workers(4)
///     .queue_capacity_bytes(64 * 1024)
///     .rejection_policy(RejectionPolicy::Silent)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(config.workers(), 4);
/// assert_eq!(config.queue_capacity_bytes().get(), 64 * 1024);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfigBuilder {
    workers: usize,
    queue_capacity_bytes: u64,
    fairness: FairnessConfig,
    fast_path: bool,
    rejection_policy: RejectionPolicy,
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity_bytes: DEFAULT_QUEUE_CAPACITY_BYTES,
            fairness: FairnessConfig::default(),
            fast_path: false,
            rejection_policy: RejectionPolicy::default(),
        }
    }
}

impl ExecutorConfigBuilder {
    /// Number of worker tasks draining the scheduler.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Maximum bytes held by admitted calls.
    #[must_use]
    pub fn queue_capacity_bytes(mut self, bytes: u64) -> Self {
        self.queue_capacity_bytes = bytes;
        self
    }

    /// Top-class dispatches allowed before a lower class is served.
    #[must_use]
    pub fn max_high_before_low(mut self, count: usize) -> Self {
        self.fairness.max_high_before_low = count;
        self
    }

    /// Cap on continuous top-class service. `None` disables the time check.
    #[must_use]
    pub fn time_slice(mut self, slice: Option<Duration>) -> Self {
        self.fairness.time_slice = slice;
        self
    }

    #[must_use]
    pub fn fairness(mut self, fairness: FairnessConfig) -> Self {
        self.fairness = fairness;
        self
    }

    /// Hand calls straight to an idle worker when nothing is queued.
    #[must_use]
    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    #[must_use]
    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWorkers`] if the worker count is zero or
    /// above [`MAX_WORKERS`], [`ConfigError::ZeroCapacity`] for a zero byte
    /// budget and [`ConfigError::ZeroTimeSlice`] for a zero time slice.
    pub fn build(self) -> Result<ExecutorConfig, ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        let queue_capacity_bytes =
            NonZeroU64::new(self.queue_capacity_bytes).ok_or(ConfigError::ZeroCapacity)?;
        if self.fairness.time_slice.is_some_and(|slice| slice.is_zero()) {
            return Err(ConfigError::ZeroTimeSlice);
        }
        Ok(ExecutorConfig {
            workers: self.workers,
            queue_capacity_bytes,
            fairness: self.fairness,
            fast_path: self.fast_path,
            rejection_policy: self.rejection_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn builder_defaults_match_default_config() {
        let built = ExecutorConfig::builder().build().expect("defaults are valid");
        assert_eq!(built, ExecutorConfig::default());
        assert_eq!(built.queue_capacity_bytes().get(), DEFAULT_QUEUE_CAPACITY_BYTES);
        assert_eq!(built.fairness().max_high_before_low, 8);
        assert_eq!(built.rejection_policy(), RejectionPolicy::Respond);
        assert!(!built.fast_path());
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_WORKERS + 1)]
    fn rejects_invalid_worker_counts(#[case] workers: usize) {
        assert_eq!(
            ExecutorConfig::builder().workers(workers).build(),
            Err(ConfigError::InvalidWorkers(workers))
        );
    }

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            ExecutorConfig::builder().queue_capacity_bytes(0).build(),
            Err(ConfigError::ZeroCapacity)
        );
    }

    #[test]
    fn rejects_zero_time_slice() {
        assert_eq!(
            ExecutorConfig::builder()
                .time_slice(Some(Duration::ZERO))
                .build(),
            Err(ConfigError::ZeroTimeSlice)
        );
    }
}
