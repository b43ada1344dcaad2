//! Monotonic elapsed-time source (component A).
//!
//! Mirrors the teacher's pattern of a small trait plus a real and a test
//! implementation (see `socket::TcpSocket`), so the bandwidth controller can
//! be driven deterministically in tests (S6-S8) without waiting on a real
//! clock.

use std::time::Instant;

/// Monotonic time source used by the bandwidth controller to compute the
/// elapsed time since its last `schedule_transfer` call.
pub trait Clock {
    /// Milliseconds elapsed since the previous call to this method. The
    /// first call's baseline is the clock's construction time.
    fn elapsed_since_last_call(&mut self) -> u64;
}

/// Real clock backed by `std::time::Instant`.
#[derive(Debug)]
pub struct SystemClock {
    last: Instant,
}

impl SystemClock {
    /// Creates a clock whose baseline is "now".
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_since_last_call(&mut self) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_millis() as u64;
        self.last = now;
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockClock;

    #[test]
    fn scripted_clock_replays_then_holds_last_value() {
        let mut clock = MockClock::new(vec![0, 50, 1000]);
        assert_eq!(clock.elapsed_since_last_call(), 0);
        assert_eq!(clock.elapsed_since_last_call(), 50);
        assert_eq!(clock.elapsed_since_last_call(), 1000);
        assert_eq!(clock.elapsed_since_last_call(), 1000);
    }

    #[test]
    fn system_clock_reports_non_negative_elapsed() {
        let mut clock = SystemClock::new();
        let elapsed = clock.elapsed_since_last_call();
        assert!(elapsed < 1000, "unexpectedly large elapsed: {elapsed}");
    }
}
