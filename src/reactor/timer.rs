//! Concrete `Timer` backed by the reactor's own deadline list rather than
//! a dedicated OS timer per handle — `mio` has no timer primitive, so the
//! loop computes its `poll` timeout from the soonest deadline, the same
//! trick the teacher's listener uses for its accept-backoff retry.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::timer::Timer;

#[derive(Debug)]
pub(crate) struct TimerState {
    pub deadline: Option<Instant>,
    pub last_timeout: Duration,
    pub repeat: Duration,
    pub closed: bool,
}

impl TimerState {
    fn new() -> Self {
        Self {
            deadline: None,
            last_timeout: Duration::ZERO,
            repeat: Duration::ZERO,
            closed: false,
        }
    }
}

/// `Timer` handle a `Downloader` owns; the reactor holds a second `Rc`
/// clone of the same state to check for expiry each tick.
pub struct MioTimer {
    state: Rc<RefCell<TimerState>>,
}

impl MioTimer {
    pub(crate) fn new() -> (Self, Rc<RefCell<TimerState>>) {
        let state = Rc::new(RefCell::new(TimerState::new()));
        (Self { state: state.clone() }, state)
    }
}

impl Timer for MioTimer {
    fn start(&mut self, timeout: Duration, repeat: Duration) {
        let mut state = self.state.borrow_mut();
        state.deadline = Some(Instant::now() + timeout);
        state.last_timeout = timeout;
        state.repeat = repeat;
        state.closed = false;
    }

    fn again(&mut self) {
        let mut state = self.state.borrow_mut();
        let timeout = state.last_timeout;
        state.deadline = Some(Instant::now() + timeout);
    }

    fn stop(&mut self) {
        self.state.borrow_mut().deadline = None;
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.deadline = None;
        state.closed = true;
    }
}
