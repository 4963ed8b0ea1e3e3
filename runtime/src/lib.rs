//! # Txpipe Runtime
//!
//! Ordered, multi-stage command processing over a bounded ring buffer.
//!
//! Commands are published into a fixed-size, pre-allocated ring of
//! [`ProcessorContext`] slots. Each registered stage group runs on its own
//! worker thread and sees every slot exactly once, in publication order and
//! only after every earlier group has finished with it. Callers get a future
//! per publication that resolves when the slot has passed the whole chain.
//!
//! ## Core Components
//!
//! - **`PipeProcessor`**: lifecycle, publication (`process`, `execute`,
//!   `execute_restore`) and the `sync` barrier
//! - **`ProcessorHandler`**: one stage of the chain
//! - **`ProcessorContext`**: the per-slot record stages read and annotate
//! - **`PipeConfig`**: capacity, producer mode and CPU/latency trade-off
//!
//! ## Example
//!
//! ```
//! use txpipe_runtime::{CpuConsumption, PipeConfig, PipeProcessor, stage_fn};
//!
//! # fn main() -> Result<(), txpipe_runtime::ProcessorError> {
//! let processor = PipeProcessor::new(
//!     PipeConfig::default()
//!         .with_capacity(1024)
//!         .with_cpu_consumption(CpuConsumption::Low),
//! );
//! processor
//!     .pipe([stage_fn("decode", |_, _| {})])
//!     .pipe([stage_fn("journal", |_, _| {}), stage_fn("publish", |_, _| {})]);
//! processor.start()?;
//!
//! let done = processor.process(vec![Box::new("open account")])?;
//! assert!(done.wait().is_success());
//! processor.shutdown();
//! # Ok(())
//! # }
//! ```

/// Processor configuration
pub mod config;

/// Per-slot processing context
pub mod context;

/// Error types for the processor lifecycle
pub mod error;

/// Futures returned to publishers
pub mod future;

/// Stage handlers
pub mod handler;

/// Prometheus metrics for observability
pub mod metrics;

/// The pipe processor
pub mod processor;

mod ring_buffer;

/// Wait strategies used by stage workers and blocked publishers
pub mod wait_strategy;

pub use config::{CpuConsumption, DEFAULT_CAPACITY, PipeConfig, ProducerMode};
pub use context::{ContextMode, ProcessorContext};
pub use error::ProcessorError;
pub use future::{ExecuteFuture, ProcessFuture};
pub use handler::{ProcessorHandler, stage_fn};
pub use processor::{PipeProcessor, ProcessorState};
pub use ring_buffer::{INITIAL_SEQUENCE, Sequence};

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Accepting and completing work
    Healthy,

    /// Operational with issues (stage faults, or not started)
    Degraded,

    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// The worse of two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result, as reported by [`PipeProcessor::health`]
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Details when not healthy
    pub message: Option<String>,

    /// Key/value details (state, fault count, free slots)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value by key
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
