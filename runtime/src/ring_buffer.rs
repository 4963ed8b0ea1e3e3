//! Fixed-capacity ring of reusable [`ProcessorContext`] slots.
//!
//! Producers and stage workers never hand messages to each other through a
//! queue. Instead every party owns a monotonically increasing [`Sequence`]:
//!
//! - the producer claims the next sequence, fills slot `sequence & mask`, then
//!   publishes it (moving the cursor, or marking the slot available when
//!   several producers are allowed);
//! - stage group `n` processes every sequence up to the minimum of what group
//!   `n - 1` finished (group 0 follows the published cursor) and advances its
//!   own sequence after each slot;
//! - a producer may only claim sequence `s` once the final group has finished
//!   `s - capacity`, which is the sole source of backpressure.
//!
//! Each slot sits behind its own mutex. The sequence protocol guarantees at
//! most one party touches a slot at any time, so those locks are never
//! contended; they exist to keep slot access safe without `unsafe`.

use crate::config::ProducerMode;
use crate::context::ProcessorContext;
use crate::wait_strategy::{Alerted, WaitStrategy};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Value of every sequence before anything was published or processed.
pub const INITIAL_SEQUENCE: i64 = -1;

/// A position in the ring, shared between threads.
#[derive(Debug)]
pub struct Sequence(AtomicI64);

impl Sequence {
    /// Create a sequence at `value`
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance to `value`
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

/// Lowest value among `sequences`, or `fallback` when there are none.
pub(crate) fn minimum_sequence(sequences: &[Arc<Sequence>], fallback: i64) -> i64 {
    sequences
        .iter()
        .map(|sequence| sequence.get())
        .min()
        .unwrap_or(fallback)
}

pub(crate) struct RingBuffer {
    slots: Box<[Mutex<ProcessorContext>]>,
    mask: i64,
    capacity: i64,
    producer: ProducerMode,
    claimed: AtomicI64,
    cursor: Sequence,
    available: Box<[AtomicI64]>,
    gating: Vec<Arc<Sequence>>,
    wait: Arc<dyn WaitStrategy>,
    alert: AtomicBool,
}

impl RingBuffer {
    /// Allocate a ring with `capacity` slots (a validated power of two).
    ///
    /// `gating` are the sequences of the final stage group; producers never
    /// overwrite a slot they have not finished.
    #[allow(clippy::cast_possible_wrap)] // Capacity is validated to fit an i64
    pub(crate) fn new(
        capacity: usize,
        producer: ProducerMode,
        wait: Arc<dyn WaitStrategy>,
        gating: Vec<Arc<Sequence>>,
    ) -> Self {
        let slots = (0..capacity)
            .map(|_| Mutex::new(ProcessorContext::new()))
            .collect();
        let available = match producer {
            ProducerMode::Single => Box::default(),
            ProducerMode::Multi => (0..capacity)
                .map(|_| AtomicI64::new(INITIAL_SEQUENCE))
                .collect(),
        };

        Self {
            slots,
            mask: capacity as i64 - 1,
            capacity: capacity as i64,
            producer,
            claimed: AtomicI64::new(INITIAL_SEQUENCE),
            cursor: Sequence::default(),
            available,
            gating,
            wait,
            alert: AtomicBool::new(false),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Masked index is in 0..capacity
    const fn index(&self, sequence: i64) -> usize {
        (sequence & self.mask) as usize
    }

    /// Lock the slot for `sequence`.
    pub(crate) fn slot(&self, sequence: i64) -> MutexGuard<'_, ProcessorContext> {
        self.slots[self.index(sequence)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next sequence, waiting while the ring is full.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] if the ring is halted while waiting for capacity.
    pub(crate) fn next(&self) -> Result<i64, Alerted> {
        loop {
            let current = self.claimed.load(Ordering::Acquire);
            let sequence = current + 1;
            let wrap_point = sequence - self.capacity;
            if wrap_point > self.minimum_gating() {
                // Nothing is claimed while waiting, so consumers never see a
                // sequence that cannot be published yet.
                self.wait
                    .wait_for(wrap_point, &|| self.minimum_gating(), &self.alert)?;
                continue;
            }
            if self
                .claimed
                .compare_exchange(current, sequence, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(sequence);
            }
        }
    }

    /// Make a filled slot visible to the first stage group.
    pub(crate) fn publish(&self, sequence: i64) {
        match self.producer {
            ProducerMode::Single => self.cursor.set(sequence),
            ProducerMode::Multi => {
                self.available[self.index(sequence)].store(sequence, Ordering::Release);
            },
        }
        self.wait.signal_all_when_blocking();
    }

    /// Upper bound of what the first stage group may consume.
    ///
    /// With several producers this is the highest claimed sequence; the barrier
    /// narrows it with [`RingBuffer::highest_published`].
    pub(crate) fn published_position(&self) -> i64 {
        match self.producer {
            ProducerMode::Single => self.cursor.get(),
            ProducerMode::Multi => self.claimed.load(Ordering::Acquire),
        }
    }

    /// Highest sequence in `from..=available` below which every slot is published.
    pub(crate) fn highest_published(&self, from: i64, available: i64) -> i64 {
        match self.producer {
            ProducerMode::Single => available,
            ProducerMode::Multi => {
                for sequence in from..=available {
                    if self.available[self.index(sequence)].load(Ordering::Acquire) != sequence {
                        return sequence - 1;
                    }
                }
                available
            },
        }
    }

    /// Highest claimed sequence
    pub(crate) fn claimed(&self) -> i64 {
        self.claimed.load(Ordering::Acquire)
    }

    /// Slowest final-stage position
    pub(crate) fn minimum_gating(&self) -> i64 {
        minimum_sequence(&self.gating, self.claimed())
    }

    /// Slots that can be claimed without waiting
    pub(crate) fn remaining_capacity(&self) -> usize {
        let in_flight = self.claimed() - self.minimum_gating();
        usize::try_from(self.capacity - in_flight).unwrap_or(0)
    }

    pub(crate) fn wait_strategy(&self) -> &dyn WaitStrategy {
        self.wait.as_ref()
    }

    pub(crate) fn alert(&self) -> &AtomicBool {
        &self.alert
    }

    /// Wake everyone blocked on this ring
    pub(crate) fn signal(&self) {
        self.wait.signal_all_when_blocking();
    }

    /// Raise the alert so every waiting worker returns.
    pub(crate) fn halt(&self) {
        self.alert.store(true, Ordering::Release);
        self.signal();
    }

    /// Release every slot's resources. Returns the number of slots destroyed.
    pub(crate) fn destroy_slots(&self) -> usize {
        for slot in &self.slots {
            slot.lock().unwrap_or_else(PoisonError::into_inner).destroy();
        }
        self.slots.len()
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("producer", &self.producer)
            .field("claimed", &self.claimed())
            .field("published", &self.published_position())
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

/// Where a stage group waits for its next slots.
///
/// The first group depends on the producer cursor; every later group depends
/// on the sequence of the group before it.
pub(crate) struct SequenceBarrier {
    ring: Arc<RingBuffer>,
    dependencies: Vec<Arc<Sequence>>,
}

impl SequenceBarrier {
    pub(crate) const fn new(ring: Arc<RingBuffer>, dependencies: Vec<Arc<Sequence>>) -> Self {
        Self { ring, dependencies }
    }

    /// Highest sequence processable from `sequence` on without a gap.
    fn position(&self, sequence: i64) -> i64 {
        if self.dependencies.is_empty() {
            self.ring
                .highest_published(sequence, self.ring.published_position())
        } else {
            minimum_sequence(&self.dependencies, INITIAL_SEQUENCE)
        }
    }

    /// Wait until `sequence` can be processed and return the highest sequence
    /// that can be processed in one batch.
    ///
    /// A slot claimed by another producer but not yet published is waited for
    /// through the ring's wait strategy like any other missing slot.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] once the ring is halted.
    pub(crate) fn wait_for(&self, sequence: i64) -> Result<i64, Alerted> {
        self.ring
            .wait_strategy()
            .wait_for(sequence, &|| self.position(sequence), self.ring.alert())
    }
}
