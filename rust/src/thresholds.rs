//! Validated travel-time budgets and bin lookup.

use crate::config::{ConfigError, DEFAULT_TRIP_TIMES};

/// Non-empty, strictly increasing list of positive time budgets (minutes).
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    values: Vec<f64>,
}

impl ThresholdSet {
    /// Validate and wrap a list of thresholds.
    ///
    /// The list must already be sorted; an unsorted list is rejected rather
    /// than silently reordered.
    pub fn new(values: Vec<f64>) -> Result<Self, ConfigError> {
        if values.is_empty() {
            return Err(ConfigError::EmptyThresholds);
        }
        for (position, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteThreshold { position, value });
            }
            if value <= 0.0 {
                return Err(ConfigError::NonPositiveThreshold { position, value });
            }
            if position > 0 {
                let previous = values[position - 1];
                if value <= previous {
                    return Err(ConfigError::ThresholdsNotIncreasing {
                        position,
                        previous,
                        value,
                    });
                }
            }
        }
        Ok(Self { values })
    }

    /// Largest budget; bounds every search.
    #[inline]
    pub fn max(&self) -> f64 {
        // Non-empty by construction.
        self.values[self.values.len() - 1]
    }

    /// Smallest threshold that is `>= time`, or `None` when `time` exceeds
    /// the largest one.
    #[inline]
    pub fn bin_for(&self, time: f64) -> Option<f64> {
        let pos = self.values.partition_point(|&t| t < time);
        self.values.get(pos).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            values: DEFAULT_TRIP_TIMES.to_vec(),
        }
    }
}
