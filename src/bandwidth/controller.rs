//! Bandwidth controller (component F): fairly divides a byte/second budget
//! across all live streams (§4.5).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use slab::Slab;

use super::stream::{SharedStream, Stream, StreamRegistration, WeakStream};
use crate::clock::Clock;
use crate::timer::Timer;

const DEFER_MS: u64 = 50;

struct Inner {
    limit_bytes_per_sec: u64,
    streams: Slab<WeakStream>,
    timer: Box<dyn Timer>,
    clock: Box<dyn Clock>,
    timer_armed: bool,
}

/// Shared reference to the controller's internal slot map, cloned into
/// every [`StreamRegistration`] so a stream can deregister without holding
/// a strong reference back to the controller itself.
#[derive(Clone)]
pub struct ControllerHandle(Rc<RefCell<Inner>>);

impl ControllerHandle {
    pub(super) fn remove(&self, key: usize) {
        let mut inner = self.0.borrow_mut();
        if inner.streams.contains(key) {
            inner.streams.remove(key);
        }
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle").finish_non_exhaustive()
    }
}

/// Rate-limiting scheduler shared by every bandwidth-throttled socket
/// adapter created through the bandwidth-aware `factory`.
#[derive(Clone)]
pub struct BandwidthController {
    handle: ControllerHandle,
}

impl std::fmt::Debug for BandwidthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthController").finish_non_exhaustive()
    }
}

impl BandwidthController {
    /// Creates a controller enforcing `limit_bytes_per_sec`, using `timer`
    /// for the zero-budget-deferral retry and `clock` to measure elapsed
    /// time between scheduling passes.
    pub fn new(
        limit_bytes_per_sec: u64,
        timer: Box<dyn Timer>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            handle: ControllerHandle(Rc::new(RefCell::new(Inner {
                limit_bytes_per_sec,
                streams: Slab::new(),
                timer,
                clock,
                timer_armed: false,
            }))),
        }
    }

    /// Registers `stream`, sizing its buffer to `4 * limit` and returning
    /// the handle it should keep to deregister itself on close.
    pub fn register(&self, stream: &SharedStream) -> StreamRegistration {
        let limit = {
            let inner = self.handle.0.borrow();
            inner.limit_bytes_per_sec
        };
        stream.borrow_mut().set_buffer(4 * limit as usize);

        let key = {
            let mut inner = self.handle.0.borrow_mut();
            inner.streams.insert(Rc::downgrade(stream))
        };

        StreamRegistration {
            controller: self.handle.clone(),
            key,
        }
    }

    /// Call made by the reactor when the controller's deferral timer
    /// fires.
    pub fn on_timer_fired(&self) {
        {
            let mut inner = self.handle.0.borrow_mut();
            inner.timer_armed = false;
        }
        self.schedule_transfer();
    }

    /// The fair-distribution pass described in §4.5. Called by a stream
    /// whenever newly-arrived raw data makes more bytes available, and by
    /// [`BandwidthController::on_timer_fired`] after a zero-budget defer.
    pub fn schedule_transfer(&self) {
        let mut inner = self.handle.0.borrow_mut();

        let elapsed_ms = inner.clock.elapsed_since_last_call();
        let limit = inner.limit_bytes_per_sec;
        let mut budget = limit * elapsed_ms / 1000;

        if budget == 0 {
            if !inner.timer_armed {
                inner.timer_armed = true;
                inner.timer.start(Duration::from_millis(DEFER_MS), Duration::ZERO);
            }
            return;
        }

        // Live stream keys, snapshotted so we can re-walk the set on each
        // fair-distribution round without fighting the borrow checker.
        let mut pending: Vec<usize> = inner.streams.iter().map(|(key, _)| key).collect();

        while budget > 0 && !pending.is_empty() {
            let chunk = std::cmp::max(1, budget / pending.len() as u64);
            let mut next_pending = Vec::new();

            for key in pending.drain(..) {
                let Some(weak) = inner.streams.get(key) else {
                    continue;
                };
                let Some(stream) = weak.upgrade() else {
                    inner.streams.remove(key);
                    continue;
                };

                let available = stream.borrow().available() as u64;
                let transfer_amount = std::cmp::min(available, chunk);
                if transfer_amount == 0 {
                    continue;
                }

                stream.borrow_mut().transfer(transfer_amount as usize);
                budget -= transfer_amount;

                if available - transfer_amount > 0 {
                    next_pending.push(key);
                }
            }

            pending = next_pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockClock, MockStream, MockTimer};
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;
    #[allow(unused_imports)]
    use crate::bandwidth::Stream as _;

    fn controller(limit: u64, clock_script: Vec<u64>) -> (BandwidthController, Rc<RefCell<MockTimer>>) {
        let timer = Rc::new(StdRefCell::new(MockTimer::new()));
        let controller = BandwidthController::new(
            limit,
            Box::new(crate::mocks::SharedTimer(timer.clone())),
            Box::new(MockClock::new(clock_script)),
        );
        (controller, timer)
    }

    #[test]
    fn s6_fair_split_three_equal_streams() {
        let (controller, _timer) = controller(9000, vec![1000]);
        let streams: Vec<_> = (0..3)
            .map(|_| StdRc::new(StdRefCell::new(MockStream::new(3000))))
            .collect();
        for s in &streams {
            let shared: SharedStream = s.clone();
            controller.register(&shared);
        }

        controller.schedule_transfer();

        for s in &streams {
            assert_eq!(s.borrow().transfers(), &[3000]);
        }
    }

    #[test]
    fn s7_redistribution_drains_all_streams() {
        let (controller, _timer) = controller(9000, vec![1000]);
        let availables = [3500usize, 1000, 4500];
        let streams: Vec<_> = availables
            .iter()
            .map(|&a| StdRc::new(StdRefCell::new(MockStream::new(a))))
            .collect();
        for s in &streams {
            let shared: SharedStream = s.clone();
            controller.register(&shared);
        }

        controller.schedule_transfer();

        for s in &streams {
            assert_eq!(s.borrow().available(), 0);
        }
    }

    #[test]
    fn s8_zero_budget_defers_then_drains() {
        let (controller, timer) = controller(9000, vec![0, 50]);
        let stream = StdRc::new(StdRefCell::new(MockStream::new(100)));
        let shared: SharedStream = stream.clone();
        controller.register(&shared);

        controller.schedule_transfer();
        assert!(stream.borrow().transfers().is_empty());
        assert_eq!(timer.borrow().starts().len(), 1);

        controller.on_timer_fired();
        assert_eq!(stream.borrow().transfers(), &[100]);
    }

    #[test]
    fn dead_weak_reference_is_skipped_not_an_error() {
        let (controller, _timer) = controller(1000, vec![1000]);
        {
            let stream = StdRc::new(StdRefCell::new(MockStream::new(500)));
            let shared: SharedStream = stream.clone();
            controller.register(&shared);
            // stream dropped here; only the controller's weak ref remains
        }
        // Should not panic despite the dangling weak reference.
        controller.schedule_transfer();
    }

    #[test]
    fn deregister_removes_stream_from_future_passes() {
        let (controller, _timer) = controller(1000, vec![1000, 1000]);
        let stream = StdRc::new(StdRefCell::new(MockStream::new(500)));
        let shared: SharedStream = stream.clone();
        let registration = controller.register(&shared);

        registration.deregister();
        controller.schedule_transfer();
        assert!(stream.borrow().transfers().is_empty());
    }

    #[test]
    fn budget_never_exceeds_limit_times_elapsed() {
        let (controller, _timer) = controller(1000, vec![500]);
        let stream = StdRc::new(StdRefCell::new(MockStream::new(10_000)));
        let shared: SharedStream = stream.clone();
        controller.register(&shared);

        controller.schedule_transfer();
        let total: usize = stream.borrow().transfers().iter().sum();
        assert!(total as u64 <= 1000 * 500 / 1000);
    }
}
