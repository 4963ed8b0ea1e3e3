//! Wait strategies for idle stage workers and a producer facing a full ring.
//!
//! A strategy is asked to wait until some position (the published cursor, the
//! slowest upstream stage, or the slowest final stage) reaches a target
//! sequence. Strategies differ only in how they burn time while waiting:
//!
//! | preference | strategy | behaviour |
//! |---|---|---|
//! | `Low` | [`BlockingWaitStrategy`] | condition variable, woken on progress |
//! | `Normal` | [`SleepingWaitStrategy`] | spin, yield, then short sleeps |
//! | `High` | [`YieldingWaitStrategy`] | spin, then yield forever |
//! | `Phased` | [`PhasedBackoffWaitStrategy`] | spin, yield, then block after thresholds |
//!
//! Every strategy checks the alert flag on each iteration so halting workers
//! never hang.

use crate::config::{CpuConsumption, PipeConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Returned when a wait was interrupted by the halt alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alerted;

/// How a waiter passes time until a position reaches a target sequence.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Wait until `position()` is at least `sequence`.
    ///
    /// Returns the observed position, which may be beyond `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`Alerted`] as soon as `alert` is raised.
    fn wait_for(
        &self,
        sequence: i64,
        position: &dyn Fn() -> i64,
        alert: &AtomicBool,
    ) -> Result<i64, Alerted>;

    /// Wake blocked waiters after a position advanced or the alert was raised.
    fn signal_all_when_blocking(&self);
}

/// Build the strategy matching the configured CPU preference.
#[must_use]
pub fn wait_strategy_for(config: &PipeConfig) -> Arc<dyn WaitStrategy> {
    match config.cpu_consumption {
        CpuConsumption::Low => Arc::new(BlockingWaitStrategy::new()),
        CpuConsumption::Normal => Arc::new(SleepingWaitStrategy::new()),
        CpuConsumption::High => Arc::new(YieldingWaitStrategy::new()),
        CpuConsumption::Phased => Arc::new(PhasedBackoffWaitStrategy::new(
            config.phased_spin,
            config.phased_yield,
        )),
    }
}

// Upper bound on a single condvar wait; progress is re-checked after it.
const BLOCKING_TIMEOUT: Duration = Duration::from_millis(10);

/// Blocks on a condition variable until a position advances.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    lock: Mutex<()>,
    progress: Condvar,
}

impl BlockingWaitStrategy {
    /// Create a blocking strategy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        position: &dyn Fn() -> i64,
        alert: &AtomicBool,
    ) -> Result<i64, Alerted> {
        loop {
            if alert.load(Ordering::Acquire) {
                return Err(Alerted);
            }
            let available = position();
            if available >= sequence {
                return Ok(available);
            }

            let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            // Re-check under the lock: a signaller advances before taking it.
            if position() >= sequence || alert.load(Ordering::Acquire) {
                continue;
            }
            let _ = self
                .progress
                .wait_timeout(guard, BLOCKING_TIMEOUT)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.progress.notify_all();
    }
}

const SLEEPING_RETRIES: u32 = 200;
const SLEEPING_NAP: Duration = Duration::from_nanos(100);

/// Spins, then yields, then naps for short intervals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepingWaitStrategy;

impl SleepingWaitStrategy {
    /// Create a sleeping strategy
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        position: &dyn Fn() -> i64,
        alert: &AtomicBool,
    ) -> Result<i64, Alerted> {
        let mut counter = SLEEPING_RETRIES;
        loop {
            if alert.load(Ordering::Acquire) {
                return Err(Alerted);
            }
            let available = position();
            if available >= sequence {
                return Ok(available);
            }

            if counter > 100 {
                counter -= 1;
                std::hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(SLEEPING_NAP);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

const YIELDING_SPIN_TRIES: u32 = 100;

/// Spins briefly, then yields the thread on every further check.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldingWaitStrategy;

impl YieldingWaitStrategy {
    /// Create a yielding strategy
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        position: &dyn Fn() -> i64,
        alert: &AtomicBool,
    ) -> Result<i64, Alerted> {
        let mut counter = YIELDING_SPIN_TRIES;
        loop {
            if alert.load(Ordering::Acquire) {
                return Err(Alerted);
            }
            let available = position();
            if available >= sequence {
                return Ok(available);
            }

            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                std::hint::spin_loop();
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

const PHASED_SPIN_TRIES: u32 = 10_000;

/// Spins until `spin_timeout`, yields until `spin_timeout + yield_timeout`,
/// then falls back to blocking.
#[derive(Debug)]
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_timeout: Duration,
    fallback: BlockingWaitStrategy,
}

impl PhasedBackoffWaitStrategy {
    /// Create a phased strategy with the given spin and yield phases
    #[must_use]
    pub fn new(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self {
            spin_timeout,
            yield_timeout: spin_timeout + yield_timeout,
            fallback: BlockingWaitStrategy::new(),
        }
    }
}

impl WaitStrategy for PhasedBackoffWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        position: &dyn Fn() -> i64,
        alert: &AtomicBool,
    ) -> Result<i64, Alerted> {
        let mut started: Option<Instant> = None;
        let mut counter = PHASED_SPIN_TRIES;
        loop {
            if alert.load(Ordering::Acquire) {
                return Err(Alerted);
            }
            let available = position();
            if available >= sequence {
                return Ok(available);
            }

            counter -= 1;
            if counter == 0 {
                counter = PHASED_SPIN_TRIES;
                match started {
                    None => started = Some(Instant::now()),
                    Some(start) => {
                        let elapsed = start.elapsed();
                        if elapsed > self.yield_timeout {
                            return self.fallback.wait_for(sequence, position, alert);
                        }
                        if elapsed > self.spin_timeout {
                            thread::yield_now();
                        }
                    },
                }
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    fn strategies() -> Vec<Arc<dyn WaitStrategy>> {
        vec![
            Arc::new(BlockingWaitStrategy::new()),
            Arc::new(SleepingWaitStrategy::new()),
            Arc::new(YieldingWaitStrategy::new()),
            Arc::new(PhasedBackoffWaitStrategy::new(
                Duration::from_micros(50),
                Duration::from_micros(100),
            )),
        ]
    }

    #[test]
    fn returns_immediately_when_position_reached() {
        let alert = AtomicBool::new(false);
        for strategy in strategies() {
            assert_eq!(strategy.wait_for(3, &|| 5, &alert), Ok(5));
        }
    }

    #[test]
    fn alert_interrupts_wait() {
        let alert = AtomicBool::new(true);
        for strategy in strategies() {
            assert_eq!(strategy.wait_for(10, &|| 0, &alert), Err(Alerted));
        }
    }

    #[test]
    fn wakes_when_position_advances_from_another_thread() {
        for strategy in strategies() {
            let position = Arc::new(AtomicI64::new(-1));
            let alert = Arc::new(AtomicBool::new(false));

            let advancer = {
                let position = Arc::clone(&position);
                let strategy = Arc::clone(&strategy);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    position.store(0, Ordering::Release);
                    strategy.signal_all_when_blocking();
                })
            };

            let observed = strategy.wait_for(0, &|| position.load(Ordering::Acquire), &alert);
            assert_eq!(observed, Ok(0), "{strategy:?}");
            let _ = advancer.join();
        }
    }

    #[test]
    fn factory_follows_cpu_preference() {
        let phased = wait_strategy_for(
            &PipeConfig::default().with_cpu_consumption(CpuConsumption::Phased),
        );
        assert!(format!("{phased:?}").starts_with("PhasedBackoffWaitStrategy"));

        let low = wait_strategy_for(&PipeConfig::default().with_cpu_consumption(CpuConsumption::Low));
        assert!(format!("{low:?}").starts_with("BlockingWaitStrategy"));
    }
}
