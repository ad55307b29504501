//! Configuration for compaction scheduling.

use serde::{Deserialize, Serialize};

use crate::types::SchedulerError;

/// Configuration for the compaction scheduler.
///
/// Controls when compaction triggers and how often it may repeat.
///
/// # Example
///
/// ```
/// use compaction_scheduler::{CompactionScheduler, SchedulerConfig};
///
/// let config = SchedulerConfig::default()
///     .with_default_threshold(0.75)
///     .with_normal_cooldown_ms(30_000);
/// let scheduler = CompactionScheduler::new(config)?;
/// # Ok::<(), compaction_scheduler::SchedulerError>(())
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Usage ratio above which a normal compaction is warranted.
    /// Default: 0.70
    pub default_threshold: f64,

    /// Usage ratio above which compaction is mandatory regardless of
    /// cooldown state. Crossing this line means the next request risks a
    /// fatal "context exceeded" failure.
    /// Default: 0.90
    pub emergency_threshold: f64,

    /// Absolute token count below which no compaction is ever triggered,
    /// even if the ratio nominally exceeds `default_threshold`. Protects
    /// small sessions where compaction would degrade quality for
    /// negligible benefit.
    /// Default: 50,000
    pub min_tokens_for_compaction: u64,

    /// Minimum time since the last compaction before another normal
    /// compaction may be triggered.
    /// Default: 60,000 (1 minute)
    pub normal_cooldown_ms: u64,

    /// Reduced minimum spacing applied once usage sits between
    /// `default_threshold` and `emergency_threshold`. The scheduler trades
    /// compaction cost for safety margin as risk rises.
    /// Default: 10,000 (10 seconds)
    pub high_usage_cooldown_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.70,
            emergency_threshold: 0.90,
            min_tokens_for_compaction: 50_000,
            normal_cooldown_ms: 60_000,
            high_usage_cooldown_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the usage ratio at which normal compaction is warranted.
    #[must_use]
    pub const fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Set the usage ratio at which compaction becomes mandatory.
    #[must_use]
    pub const fn with_emergency_threshold(mut self, threshold: f64) -> Self {
        self.emergency_threshold = threshold;
        self
    }

    /// Set the absolute token floor below which compaction never triggers.
    #[must_use]
    pub const fn with_min_tokens_for_compaction(mut self, tokens: u64) -> Self {
        self.min_tokens_for_compaction = tokens;
        self
    }

    /// Set the normal cooldown in milliseconds.
    #[must_use]
    pub const fn with_normal_cooldown_ms(mut self, millis: u64) -> Self {
        self.normal_cooldown_ms = millis;
        self
    }

    /// Set the high-usage cooldown in milliseconds.
    #[must_use]
    pub const fn with_high_usage_cooldown_ms(mut self, millis: u64) -> Self {
        self.high_usage_cooldown_ms = millis;
        self
    }

    /// Validate the configuration.
    ///
    /// Runs once at scheduler construction, never at evaluation time.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] if a threshold is not
    /// finite, falls outside `[0, 1]`, or the thresholds are out of order.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !self.default_threshold.is_finite() || !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(SchedulerError::InvalidConfig(format!(
                "default_threshold must be within [0, 1], got {}",
                self.default_threshold
            )));
        }
        if !self.emergency_threshold.is_finite()
            || self.emergency_threshold <= 0.0
            || self.emergency_threshold > 1.0
        {
            return Err(SchedulerError::InvalidConfig(format!(
                "emergency_threshold must be within (0, 1], got {}",
                self.emergency_threshold
            )));
        }
        if self.emergency_threshold <= self.default_threshold {
            return Err(SchedulerError::InvalidConfig(format!(
                "emergency_threshold ({}) must exceed default_threshold ({})",
                self.emergency_threshold, self.default_threshold
            )));
        }
        Ok(())
    }
}
