//! Management Cadence
//!
//! Decides when a management cycle is due: after a wall-clock interval or
//! after a number of I/O operations, whichever trips first. A zero interval
//! or zero count disables that trigger. Every foreground operation consults
//! the cadence, so its state is kept in atomics: the I/O counter and the last
//! run time as milliseconds since the cadence was created.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ManagementCadence {
    every: Duration,
    every_io: u64,
    io_since_run: AtomicU64,
    origin: Instant,
    last_run_ms: AtomicU64,
    running: AtomicBool,
}

impl ManagementCadence {
    pub fn new(every: Duration, every_io: u64) -> Self {
        Self {
            every,
            every_io,
            io_since_run: AtomicU64::new(0),
            origin: Instant::now(),
            last_run_ms: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Never due on its own; management runs only when called
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn interval(&self) -> Duration {
        self.every
    }

    pub fn io_interval(&self) -> u64 {
        self.every_io
    }

    /// Count one operation and report whether a cycle is now due
    pub fn record_io(&self) -> bool {
        let seen = self.io_since_run.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every_io > 0 && seen >= self.every_io {
            return true;
        }
        self.time_due()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn time_due(&self) -> bool {
        if self.every.is_zero() {
            return false;
        }
        let since = self
            .now_ms()
            .saturating_sub(self.last_run_ms.load(Ordering::Relaxed));
        u128::from(since) >= self.every.as_millis()
    }

    /// Claim the right to run a cycle; only one caller wins at a time
    pub fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| CycleGuard { cadence: self })
    }

    /// Operations since the last completed cycle
    pub fn pending_io(&self) -> u64 {
        self.io_since_run.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.io_since_run.store(0, Ordering::Relaxed);
        self.last_run_ms.store(self.now_ms(), Ordering::Relaxed);
    }
}

/// Held while a management cycle runs; dropping it records completion
#[derive(Debug)]
pub struct CycleGuard<'a> {
    cadence: &'a ManagementCadence,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.cadence.reset();
        self.cadence.running.store(false, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_trigger() {
        let cadence = ManagementCadence::new(Duration::ZERO, 3);
        assert!(!cadence.record_io());
        assert!(!cadence.record_io());
        assert!(cadence.record_io());

        let guard = cadence.try_begin().unwrap();
        drop(guard);
        assert_eq!(cadence.pending_io(), 0);
        assert!(!cadence.record_io());
    }

    #[test]
    fn test_time_trigger() {
        let cadence = ManagementCadence::new(Duration::from_millis(5), 0);
        assert!(!cadence.record_io());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cadence.record_io());
    }

    #[test]
    fn test_reset_restarts_timer() {
        let cadence = ManagementCadence::new(Duration::from_millis(20), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cadence.record_io());

        cadence.reset();
        assert!(!cadence.record_io());
    }

    #[test]
    fn test_concurrent_io_counted() {
        let cadence = std::sync::Arc::new(ManagementCadence::new(Duration::ZERO, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cadence = cadence.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cadence.record_io();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cadence.pending_io(), 8000);
    }

    #[test]
    fn test_disabled_never_due() {
        let cadence = ManagementCadence::disabled();
        for _ in 0..10_000 {
            assert!(!cadence.record_io());
        }
    }

    #[test]
    fn test_single_runner() {
        let cadence = ManagementCadence::new(Duration::ZERO, 1);
        let first = cadence.try_begin();
        assert!(first.is_some());
        assert!(cadence.try_begin().is_none());
        drop(first);
        assert!(cadence.try_begin().is_some());
    }
}
