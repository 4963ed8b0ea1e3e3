//! Pipe processor configuration.
//!
//! # Example
//!
//! ```
//! use txpipe_runtime::config::{CpuConsumption, PipeConfig, ProducerMode};
//!
//! let config = PipeConfig::default()
//!     .with_cpu_consumption(CpuConsumption::Phased)
//!     .with_producer(ProducerMode::Single)
//!     .with_capacity(1024);
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ProcessorError;
use std::fmt;
use std::time::Duration;

/// Default ring buffer capacity (slots)
pub const DEFAULT_CAPACITY: usize = 4 * 1024;

/// How idle workers (and a producer facing a full ring) wait for progress.
///
/// Only affects latency and CPU usage, never ordering or correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuConsumption {
    /// Block on a condition variable until signalled (minimal CPU, highest latency)
    Low,
    /// Spin briefly, yield, then sleep in short naps
    #[default]
    Normal,
    /// Spin then yield in a tight loop (lowest latency, burns a core per worker)
    High,
    /// Spin, then yield, then block after the configured thresholds
    Phased,
}

impl fmt::Display for CpuConsumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Phased => write!(f, "phased"),
        }
    }
}

/// Publishing discipline, fixed at construction.
///
/// With [`ProducerMode::Single`] exactly one thread may publish; publishing from
/// several threads voids the ordering guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerMode {
    /// One exclusive publishing thread
    Single,
    /// Any thread may publish
    #[default]
    Multi,
}

impl fmt::Display for ProducerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Configuration for a [`PipeProcessor`](crate::PipeProcessor)
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Wait strategy preference
    pub cpu_consumption: CpuConsumption,
    /// Producer discipline
    pub producer: ProducerMode,
    /// Ring buffer capacity in slots (power of two)
    pub capacity: usize,
    /// Phased strategy: how long to busy-spin before yielding
    pub phased_spin: Duration,
    /// Phased strategy: how long to yield before blocking
    pub phased_yield: Duration,
    /// Prefix for stage worker thread names
    pub thread_name: String,
}

impl PipeConfig {
    /// Set the wait strategy preference
    #[must_use]
    pub fn with_cpu_consumption(mut self, cpu_consumption: CpuConsumption) -> Self {
        self.cpu_consumption = cpu_consumption;
        self
    }

    /// Set the producer discipline
    #[must_use]
    pub fn with_producer(mut self, producer: ProducerMode) -> Self {
        self.producer = producer;
        self
    }

    /// Set the ring buffer capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the phased strategy thresholds
    #[must_use]
    pub fn with_phased_thresholds(mut self, spin: Duration, yield_for: Duration) -> Self {
        self.phased_spin = spin;
        self.phased_yield = yield_for;
        self
    }

    /// Set the worker thread name prefix
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidConfig`] if the capacity is not a power of
    /// two, or if the phased thresholds are zero while the phased strategy is
    /// selected.
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if !self.capacity.is_power_of_two() {
            return Err(ProcessorError::InvalidConfig(format!(
                "capacity {} is not a power of two",
                self.capacity
            )));
        }
        if i64::try_from(self.capacity).is_err() {
            return Err(ProcessorError::InvalidConfig(format!(
                "capacity {} does not fit a sequence number",
                self.capacity
            )));
        }
        if self.cpu_consumption == CpuConsumption::Phased
            && (self.phased_spin.is_zero() || self.phased_yield.is_zero())
        {
            return Err(ProcessorError::InvalidConfig(
                "phased thresholds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            cpu_consumption: CpuConsumption::default(),
            producer: ProducerMode::default(),
            capacity: DEFAULT_CAPACITY,
            phased_spin: Duration::from_nanos(250_000),
            phased_yield: Duration::from_nanos(850_000),
            thread_name: "pipe-processor".to_string(),
        }
    }
}
