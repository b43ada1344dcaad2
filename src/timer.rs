//! One-shot / repeating wakeup contract (component B).

use std::time::Duration;

/// Events a [`Timer`] can deliver to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The timer's timeout elapsed.
    Fired,
    /// The handle was released; no further events follow.
    Closed,
    /// Starting or rearming the timer failed.
    Error(String),
}

/// A single-shot or repeating timer handle, owned exclusively by whatever
/// component armed it (the downloader reuses one across phases; the
/// bandwidth controller uses one to retry a zero-budget
/// `schedule_transfer`).
pub trait Timer {
    /// Arms the timer. `repeat == Duration::ZERO` means fire once;
    /// otherwise the timer re-fires every `repeat` after the first firing.
    fn start(&mut self, timeout: Duration, repeat: Duration);

    /// Restarts the timer with its most recently used timeout.
    fn again(&mut self);

    /// Cancels the timer without releasing the handle. A later `start`
    /// call may reuse it.
    fn stop(&mut self);

    /// Releases the handle. Exactly one [`TimerEvent::Closed`] follows,
    /// and no further events are delivered after that.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTimer;

    #[test]
    fn again_reuses_last_timeout() {
        let mut timer = MockTimer::new();
        timer.start(Duration::from_millis(50), Duration::ZERO);
        timer.again();
        assert_eq!(timer.starts(), &[Duration::from_millis(50), Duration::from_millis(50)]);
    }

    #[test]
    fn stop_does_not_emit_closed() {
        let mut timer = MockTimer::new();
        timer.start(Duration::from_secs(5), Duration::ZERO);
        timer.stop();
        assert!(!timer.closed());
    }

    #[test]
    fn close_marks_closed() {
        let mut timer = MockTimer::new();
        timer.close();
        assert!(timer.closed());
    }
}
