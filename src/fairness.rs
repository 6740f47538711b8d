//! Starvation guard for the priority scheduler.
//!
//! Workers always prefer the most urgent class, but after a run of
//! consecutive top-class dispatches the tracker asks the scheduler to serve
//! the longest-waiting call from a lower class instead.

use tokio::time::{Duration, Instant};

/// How long the top class may monopolize workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FairnessConfig {
    /// Top-class dispatches allowed before a lower class is served.
    ///
    /// Zero disables the count-based check.
    pub max_high_before_low: usize,
    /// Optional cap on continuous top-class service time.
    pub time_slice: Option<Duration>,
}

impl FairnessConfig {
    /// Strict priority: lower classes run only when every higher class is
    /// empty.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            max_high_before_low: 0,
            time_slice: None,
        }
    }
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            max_high_before_low: 8,
            time_slice: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FairnessTracker {
    config: FairnessConfig,
    high_counter: usize,
    high_start: Option<Instant>,
}

impl FairnessTracker {
    pub(crate) fn new(config: FairnessConfig) -> Self {
        Self {
            config,
            high_counter: 0,
            high_start: None,
        }
    }

    /// Note a dispatch from the most urgent non-empty class.
    pub(crate) fn record_high_priority(&mut self) {
        self.high_counter += 1;
        if self.high_counter == 1 {
            self.high_start = Some(Instant::now());
        }
    }

    /// Whether the next dispatch should come from a lower class.
    pub(crate) fn should_yield_to_low_priority(&self) -> bool {
        let threshold_hit = self.config.max_high_before_low > 0
            && self.high_counter >= self.config.max_high_before_low;
        let time_hit = self
            .config
            .time_slice
            .zip(self.high_start)
            .is_some_and(|(slice, start)| start.elapsed() >= slice);
        threshold_hit || time_hit
    }

    /// Start a new run, after serving a lower class or when only one class
    /// has work.
    pub(crate) fn reset(&mut self) {
        self.high_counter = 0;
        self.high_start = None;
    }
}
