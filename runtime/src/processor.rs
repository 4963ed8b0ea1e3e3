//! The pipe processor: lifecycle, publication and stage workers.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Starting ──▶ Started ──stop──▶ Stopping ──▶ Stopped
//!    │                                │
//!    └──────────────shutdown──────────┴──────────────▶ Shutdown (terminal)
//! ```
//!
//! The lifecycle state sits behind a `RwLock`. Every publication holds the read
//! side from claim to publish, so `stop` (which takes the write side) can only
//! proceed when no publication is half done, and no publication can start once
//! `stop` has begun.
//!
//! # Example
//!
//! ```
//! use txpipe_runtime::{PipeConfig, PipeProcessor, stage_fn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let processor = PipeProcessor::new(PipeConfig::default().with_capacity(64));
//! processor.pipe([stage_fn("execute", |context, _| {
//!     if context.expects_result() {
//!         context.set_result(context.commands().len());
//!     }
//! })]);
//! processor.start()?;
//!
//! let outcome = processor.execute::<usize>(Box::new("increment"))?.wait();
//! assert_eq!(outcome.result(), Some(&1));
//!
//! processor.sync()?;
//! processor.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::config::PipeConfig;
use crate::context::Completion;
use crate::error::ProcessorError;
use crate::future::{ExecuteFuture, ProcessFuture};
use crate::handler::{GroupRunner, ProcessorHandler, StageGroup};
use crate::metrics::PipelineMetrics;
use crate::ring_buffer::{RingBuffer, Sequence, SequenceBarrier, minimum_sequence};
use crate::wait_strategy::wait_strategy_for;
use crate::{HealthCheck, HealthStatus, ProcessorContext};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;
use txpipe_core::{Command, RestoreableEventBus, TransactionCommitInfo};

/// Lifecycle state of a [`PipeProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Not running; stages may be registered
    Stopped,
    /// Allocating the ring and launching workers
    Starting,
    /// Accepting work
    Started,
    /// Draining in-flight slots before halting
    Stopping,
    /// Terminal; slots released, cannot be started again
    Shutdown,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Shutdown => write!(f, "shut down"),
        }
    }
}

struct Lifecycle {
    state: ProcessorState,
    running: Option<Running>,
    retired: Option<Arc<RingBuffer>>,
}

/// Everything that exists only while started.
struct Running {
    ring: Arc<RingBuffer>,
    sequences: Vec<Arc<Sequence>>,
    workers: Vec<JoinHandle<()>>,
}

impl Running {
    /// Drain every published slot through every group, then halt and join the
    /// workers. Returns the ring so its slots can be released.
    fn halt(self) -> Arc<RingBuffer> {
        let target = self.ring.claimed();
        let never = AtomicBool::new(false);
        let _ = self.ring.wait_strategy().wait_for(
            target,
            &|| minimum_sequence(&self.sequences, target),
            &never,
        );

        self.ring.halt();
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("stage-worker").to_string();
            if worker.join().is_err() {
                tracing::error!(worker = %name, "Stage worker terminated abnormally");
            }
        }
        self.ring
    }
}

/// One thread per stage group, consuming slots in sequence order.
struct StageWorker {
    ring: Arc<RingBuffer>,
    barrier: SequenceBarrier,
    sequence: Arc<Sequence>,
    runner: GroupRunner,
    terminal: bool,
}

impl StageWorker {
    fn run(self) {
        tracing::debug!(stages = ?self.runner.names(), terminal = self.terminal, "Stage worker started");
        let mut next = self.sequence.get() + 1;

        while let Ok(available) = self.barrier.wait_for(next) {
            for sequence in next..=available {
                let mut context = self.ring.slot(sequence);
                self.runner.run(&mut context, sequence == available);
                if self.terminal && !context.complete() {
                    tracing::warn!(sequence, "Caller dropped its future before completion");
                }
                drop(context);
                self.sequence.set(sequence);
            }
            next = available + 1;
            self.ring.signal();
        }

        tracing::debug!(last_sequence = self.sequence.get(), "Stage worker halted");
    }
}

/// Ordered, multi-stage command processor built on a bounded ring buffer.
///
/// Register stage groups with [`pipe`](Self::pipe), then [`start`](Self::start).
/// Every published slot is processed by every group, in registration order and
/// in publication order, exactly once. An internal terminal step after the last
/// group resolves the caller's future.
///
/// All methods take `&self`; share the processor across threads with `Arc`.
pub struct PipeProcessor {
    config: PipeConfig,
    groups: Mutex<Vec<StageGroup>>,
    lifecycle: RwLock<Lifecycle>,
    faults: Arc<AtomicU64>,
}

impl PipeProcessor {
    /// Create a stopped processor with no stages.
    #[must_use]
    pub fn new(config: PipeConfig) -> Self {
        Self {
            config,
            groups: Mutex::new(Vec::new()),
            lifecycle: RwLock::new(Lifecycle {
                state: ProcessorState::Stopped,
                running: None,
                retired: None,
            }),
            faults: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configuration this processor was built with
    #[must_use]
    pub const fn config(&self) -> &PipeConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `stages` as one group placed after all previously registered groups.
    ///
    /// Stages of one group share a worker thread and run one after another, in
    /// the order given, for every slot; they do not run in parallel.
    ///
    /// Registration is only honoured while stopped; afterwards the call is
    /// ignored (with a warning) and the running chain is unchanged.
    pub fn pipe<I>(&self, stages: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn ProcessorHandler>>,
    {
        let lifecycle = self.read();
        if lifecycle.state != ProcessorState::Stopped {
            tracing::warn!(state = %lifecycle.state, "Ignoring stage registration: processor is not stopped");
            return self;
        }

        let group: StageGroup = stages.into_iter().collect();
        if group.is_empty() {
            tracing::warn!("Ignoring empty stage group");
            return self;
        }
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(group);
        self
    }

    /// Allocate the ring buffer, bind the stage chain and launch the workers.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::InvalidState`] if already started, shut down, or no
    ///   stages are registered
    /// - [`ProcessorError::InvalidConfig`] if the configuration is unusable
    /// - [`ProcessorError::WorkerSpawn`] if a worker thread cannot be spawned
    pub fn start(&self) -> Result<(), ProcessorError> {
        let mut lifecycle = self.write();
        match lifecycle.state {
            ProcessorState::Stopped => {},
            ProcessorState::Shutdown => {
                return Err(ProcessorError::invalid_state(
                    "start",
                    lifecycle.state,
                    "the pipe processor has been shut down",
                ));
            },
            state => {
                return Err(ProcessorError::invalid_state(
                    "start",
                    state,
                    "the pipe processor is already started",
                ));
            },
        }
        self.config.validate()?;

        let groups = self
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if groups.is_empty() {
            return Err(ProcessorError::invalid_state(
                "start",
                lifecycle.state,
                "no stages are registered",
            ));
        }

        lifecycle.state = ProcessorState::Starting;
        let group_count = groups.len();
        match self.launch(groups) {
            Ok(running) => {
                lifecycle.running = Some(running);
                lifecycle.retired = None;
                lifecycle.state = ProcessorState::Started;
                PipelineMetrics::record_lifecycle("start");
                tracing::info!(
                    capacity = self.config.capacity,
                    producer = %self.config.producer,
                    wait_strategy = %self.config.cpu_consumption,
                    groups = group_count,
                    "Pipe processor started"
                );
                Ok(())
            },
            Err(error) => {
                lifecycle.state = ProcessorState::Stopped;
                Err(error)
            },
        }
    }

    fn launch(&self, groups: Vec<StageGroup>) -> Result<Running, ProcessorError> {
        let sequences: Vec<Arc<Sequence>> = groups
            .iter()
            .map(|_| Arc::new(Sequence::default()))
            .collect();
        let gating = sequences.last().map(Arc::clone).into_iter().collect();
        let ring = Arc::new(RingBuffer::new(
            self.config.capacity,
            self.config.producer,
            wait_strategy_for(&self.config),
            gating,
        ));

        let last = groups.len() - 1;
        let mut workers = Vec::with_capacity(groups.len());
        for (index, stages) in groups.into_iter().enumerate() {
            let dependencies = if index == 0 {
                Vec::new()
            } else {
                vec![Arc::clone(&sequences[index - 1])]
            };
            let worker = StageWorker {
                ring: Arc::clone(&ring),
                barrier: SequenceBarrier::new(Arc::clone(&ring), dependencies),
                sequence: Arc::clone(&sequences[index]),
                runner: GroupRunner::new(stages, Arc::clone(&self.faults)),
                terminal: index == last,
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.config.thread_name))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    ring.halt();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(ProcessorError::WorkerSpawn(error));
                },
            }
        }

        Ok(Running {
            ring,
            sequences,
            workers,
        })
    }

    /// Drain in-flight slots through every stage and halt the workers.
    ///
    /// No publication is accepted once this call begins.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not started.
    pub fn stop(&self) -> Result<(), ProcessorError> {
        let mut lifecycle = self.write();
        if lifecycle.state != ProcessorState::Started {
            return Err(ProcessorError::invalid_state(
                "stop",
                lifecycle.state,
                "the pipe processor is not started",
            ));
        }

        lifecycle.state = ProcessorState::Stopping;
        if let Some(running) = lifecycle.running.take() {
            lifecycle.retired = Some(running.halt());
        }
        lifecycle.state = ProcessorState::Stopped;

        PipelineMetrics::record_lifecycle("stop");
        tracing::info!("Pipe processor stopped");
        Ok(())
    }

    /// Stop (if started), release every slot's resources and make the processor
    /// unusable. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let mut lifecycle = self.write();
        if lifecycle.state == ProcessorState::Shutdown {
            return;
        }

        lifecycle.state = ProcessorState::Stopping;
        if let Some(running) = lifecycle.running.take() {
            lifecycle.retired = Some(running.halt());
        }
        let released = lifecycle
            .retired
            .take()
            .map_or(0, |ring| ring.destroy_slots());
        lifecycle.state = ProcessorState::Shutdown;

        PipelineMetrics::record_lifecycle("shutdown");
        tracing::info!(released_slots = released, "Pipe processor shut down");
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.read().state
    }

    /// Whether the processor accepts work
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() == ProcessorState::Started
    }

    /// Ring buffer capacity in slots
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Highest claimed sequence, while started
    #[must_use]
    pub fn cursor(&self) -> Option<i64> {
        self.read()
            .running
            .as_ref()
            .map(|running| running.ring.claimed())
    }

    /// Slots that can be published without blocking, while started
    #[must_use]
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.read()
            .running
            .as_ref()
            .map(|running| running.ring.remaining_capacity())
    }

    /// Number of stage faults recorded since construction
    #[must_use]
    pub fn stage_faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Claim a slot, let `populate` fill it, and publish it.
    fn publish(
        &self,
        operation: &'static str,
        mode: &'static str,
        populate: impl FnOnce(&mut ProcessorContext),
    ) -> Result<(), ProcessorError> {
        let lifecycle = self.read();
        let ring = match (&lifecycle.state, &lifecycle.running) {
            (ProcessorState::Started, Some(running)) => &running.ring,
            (state, _) => {
                return Err(ProcessorError::invalid_state(
                    operation,
                    *state,
                    "the pipe processor must be started first",
                ));
            },
        };

        let sequence = ring.next().map_err(|_| {
            ProcessorError::invalid_state(
                operation,
                ProcessorState::Stopping,
                "the pipe processor halted while waiting for capacity",
            )
        })?;
        populate(ring.slot(sequence).reset(sequence));
        ring.publish(sequence);

        PipelineMetrics::record_published(mode, ring.remaining_capacity());
        Ok(())
    }

    /// Publish a command batch; the future resolves once every stage has seen it.
    ///
    /// Blocks while the ring buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not started.
    pub fn process(&self, commands: Vec<Command>) -> Result<ProcessFuture, ProcessorError> {
        let (sender, receiver) = oneshot::channel();
        self.publish("process", "normal", |context| {
            context.live(commands, Completion::Batch(sender));
        })?;
        Ok(ProcessFuture::new(receiver))
    }

    /// Publish a single command whose stages attach a result of type `R`.
    ///
    /// Blocks while the ring buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not started.
    pub fn execute<R: Any>(&self, command: Command) -> Result<ExecuteFuture<R>, ProcessorError> {
        let (sender, receiver) = oneshot::channel();
        self.publish("execute", "normal", |context| {
            context.live(vec![command], Completion::Single(sender));
        })?;
        Ok(ExecuteFuture::new(receiver))
    }

    /// Replay an already committed transaction batch through the stages.
    ///
    /// No future is returned; completion is observed through `event_bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not started.
    pub fn execute_restore(
        &self,
        event_bus: Arc<dyn RestoreableEventBus>,
        commit: TransactionCommitInfo,
    ) -> Result<(), ProcessorError> {
        self.publish("restore", "restore", |context| {
            context.restore(event_bus, commit);
        })
    }

    /// Block until everything published before this call has passed every stage.
    ///
    /// Publishes an empty abort-mode barrier and waits for it to reach the end of
    /// the chain. Must not be called from a stage handler.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidState`] if the processor is not started.
    pub fn sync(&self) -> Result<(), ProcessorError> {
        let started = Instant::now();
        let (sender, receiver) = oneshot::channel();
        self.publish("sync", "abort", |context| context.barrier(sender))?;

        let outcome = ProcessFuture::new(receiver).wait();
        if let Some(error) = outcome.error() {
            tracing::error!(error = %error, "Sync barrier did not complete");
        }
        PipelineMetrics::record_sync(started.elapsed());
        Ok(())
    }

    /// Health of the processor.
    ///
    /// Degraded once any stage fault has been recorded (or while not started),
    /// unhealthy after shutdown.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let state = self.state();
        let faults = self.stage_faults();

        let lifecycle = match state {
            ProcessorState::Started => HealthStatus::Healthy,
            ProcessorState::Shutdown => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        let stages = if faults > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let check = match lifecycle.worst(stages) {
            HealthStatus::Healthy => HealthCheck::healthy("pipe_processor"),
            HealthStatus::Unhealthy => {
                HealthCheck::unhealthy("pipe_processor", "processor has been shut down")
            },
            HealthStatus::Degraded if faults > 0 => HealthCheck::degraded(
                "pipe_processor",
                format!("{faults} stage faults recorded"),
            ),
            HealthStatus::Degraded => {
                HealthCheck::degraded("pipe_processor", format!("processor is {state}"))
            },
        };

        let check = check
            .with_metadata("state", state.to_string())
            .with_metadata("stage_faults", faults.to_string());
        match self.remaining_capacity() {
            Some(remaining) => check.with_metadata("remaining_capacity", remaining.to_string()),
            None => check,
        }
    }
}

impl Default for PipeProcessor {
    fn default() -> Self {
        Self::new(PipeConfig::default())
    }
}

impl Drop for PipeProcessor {
    fn drop(&mut self) {
        if self.is_started() {
            self.shutdown();
        }
    }
}

impl fmt::Debug for PipeProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self
            .groups
            .lock()
            .map_or(0, |groups| groups.len());
        f.debug_struct("PipeProcessor")
            .field("state", &self.state())
            .field("groups", &groups)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
