//! Bounded wait helpers shared by the region lock and the sync events.
//!
//! Both primitives live in mappings that other processes write to, so a
//! waiter cannot rely on an in-process notification. Waiters poll with an
//! escalating backoff (spin, yield, short sleeps) until the condition holds or
//! the deadline passes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Result of a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The condition was observed before the deadline.
    Ok,
    /// The deadline passed first.
    TimedOut,
}

impl WaitResult {
    pub fn is_ok(self) -> bool {
        matches!(self, WaitResult::Ok)
    }
}

/// Escalating backoff used between polls.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits a little longer than the previous call, never past `deadline`.
    pub fn snooze(&mut self, deadline: Instant) {
        if self.step < SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step < YIELD_LIMIT {
            thread::yield_now();
        } else {
            let shift = (self.step - YIELD_LIMIT).min(5);
            let nap = (Duration::from_micros(32) * (1 << shift)).min(MAX_SLEEP);
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(nap.min(left));
        }
        self.step = self.step.saturating_add(1);
    }
}

/// Polls `ready` until it returns true or `timeout` elapses.
///
/// `ready` is always evaluated at least once, so a zero timeout is a
/// non-blocking probe.
pub fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> WaitResult {
    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::new();
    loop {
        if ready() {
            return WaitResult::Ok;
        }
        if Instant::now() >= deadline {
            return WaitResult::TimedOut;
        }
        backoff.snooze(deadline);
    }
}

/// Consumes a binary flag, waiting up to `timeout` for it to be raised.
pub fn take_flag(flag: &AtomicU32, timeout: Duration) -> WaitResult {
    wait_until(timeout, || flag.swap(0, Ordering::AcqRel) != 0)
}

/// Raises a binary flag.
pub fn raise_flag(flag: &AtomicU32) {
    flag.store(1, Ordering::Release);
}

/// Budget left from `budget` after the time spent since `start`, clamped at zero.
pub fn remaining(start: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_timeout_probes_once() {
        let flag = AtomicU32::new(0);
        assert_eq!(take_flag(&flag, Duration::ZERO), WaitResult::TimedOut);
        raise_flag(&flag);
        assert_eq!(take_flag(&flag, Duration::ZERO), WaitResult::Ok);
        assert_eq!(flag.load(Ordering::Acquire), 0, "flag is consumed");
    }

    #[test]
    fn wait_observes_flag_from_other_thread() {
        let flag = Arc::new(AtomicU32::new(0));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                raise_flag(&flag);
            })
        };
        assert!(take_flag(&flag, Duration::from_secs(2)).is_ok());
        setter.join().unwrap();
    }

    #[test]
    fn timeout_is_respected() {
        let flag = AtomicU32::new(0);
        let start = Instant::now();
        assert_eq!(
            take_flag(&flag, Duration::from_millis(20)),
            WaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let start = Instant::now() - Duration::from_millis(50);
        assert_eq!(remaining(start, Duration::from_millis(10)), Duration::ZERO);
    }
}
