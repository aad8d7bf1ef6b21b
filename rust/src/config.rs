//! Configuration types for the accessibility engine.

use pyo3::prelude::*;
use thiserror::Error;

/// Walking speed used by the upstream pipeline (km/h).
pub const DEFAULT_TRAVEL_SPEED_KMH: f64 = 4.5;

/// Default time budgets in minutes.
pub const DEFAULT_TRIP_TIMES: [f64; 7] = [5.0, 10.0, 15.0, 20.0, 30.0, 45.0, 60.0];

/// Invalid engine input detected before any work starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Threshold list is empty")]
    EmptyThresholds,
    #[error("Threshold {value} at position {position} is not a finite number")]
    NonFiniteThreshold { position: usize, value: f64 },
    #[error("Threshold {value} at position {position} must be positive")]
    NonPositiveThreshold { position: usize, value: f64 },
    #[error("Thresholds must be strictly increasing: {previous} is followed by {value} at position {position}")]
    ThresholdsNotIncreasing {
        position: usize,
        previous: f64,
        value: f64,
    },
    #[error("Invalid worker count {0}: use -1 for all cores or a positive number")]
    InvalidWorkers(i32),
    #[error("Failure fraction {0} must lie in [0, 1]")]
    InvalidFailureFraction(f64),
    #[error("Travel speed {0} km/h must be a positive finite number")]
    InvalidSpeed(f64),
    #[error("Progress interval must be at least 1")]
    InvalidProgressInterval,
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Configuration for a reachability job.
#[pyclass]
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker threads: -1 = all cores, 1 = serial on the calling thread
    #[pyo3(get, set)]
    pub workers: i32,
    /// Largest tolerated fraction of skipped origins before the job fails
    #[pyo3(get, set)]
    pub max_failure_fraction: f64,
    /// Speed used to turn edge lengths (metres) into minutes
    #[pyo3(get, set)]
    pub travel_speed_kmh: f64,
    /// Report progress every N completed origins
    #[pyo3(get, set)]
    pub progress_interval: usize,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    #[pyo3(get, set)]
    pub verbosity: u8,
    /// Stop a search once every destination has been settled
    #[pyo3(get, set)]
    pub early_exit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: -1,
            max_failure_fraction: 0.05,
            travel_speed_kmh: DEFAULT_TRAVEL_SPEED_KMH,
            progress_interval: 100,
            verbosity: 0,
            early_exit: true,
        }
    }
}

impl EngineConfig {
    /// Serial configuration, handy for debugging and tests.
    pub fn serial() -> Self {
        Self {
            workers: 1,
            ..Self::default()
        }
    }

    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolved_workers()?;
        if !(0.0..=1.0).contains(&self.max_failure_fraction) {
            return Err(ConfigError::InvalidFailureFraction(
                self.max_failure_fraction,
            ));
        }
        validate_speed(self.travel_speed_kmh)?;
        if self.progress_interval == 0 {
            return Err(ConfigError::InvalidProgressInterval);
        }
        Ok(())
    }

    /// Number of worker threads this configuration asks for.
    pub fn resolved_workers(&self) -> Result<usize, ConfigError> {
        match self.workers {
            -1 => Ok(num_cpus::get().max(1)),
            n if n >= 1 => Ok(n as usize),
            n => Err(ConfigError::InvalidWorkers(n)),
        }
    }
}

pub(crate) fn validate_speed(speed_kmh: f64) -> Result<(), ConfigError> {
    if speed_kmh.is_finite() && speed_kmh > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSpeed(speed_kmh))
    }
}

#[pymethods]
impl EngineConfig {
    #[new]
    #[pyo3(signature = (
        workers=None,
        max_failure_fraction=None,
        travel_speed_kmh=None,
        progress_interval=None,
        verbosity=None,
        early_exit=None
    ))]
    fn new(
        workers: Option<i32>,
        max_failure_fraction: Option<f64>,
        travel_speed_kmh: Option<f64>,
        progress_interval: Option<usize>,
        verbosity: Option<u8>,
        early_exit: Option<bool>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            workers: workers.unwrap_or(defaults.workers),
            max_failure_fraction: max_failure_fraction
                .unwrap_or(defaults.max_failure_fraction),
            travel_speed_kmh: travel_speed_kmh.unwrap_or(defaults.travel_speed_kmh),
            progress_interval: progress_interval.unwrap_or(defaults.progress_interval),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
            early_exit: early_exit.unwrap_or(defaults.early_exit),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "EngineConfig(workers={}, max_failure_fraction={}, travel_speed_kmh={}, verbosity={})",
            self.workers, self.max_failure_fraction, self.travel_speed_kmh, self.verbosity
        )
    }
}
