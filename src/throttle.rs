//! Bandwidth-throttled socket adapter (component G, §4.4).
//!
//! Wraps a raw [`TcpSocket`] and exposes the same contract to its consumer
//! (the downloader) while also implementing [`Stream`] so the
//! [`BandwidthController`] can ration how much buffered data is released.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::rc::Rc;

use crate::bandwidth::{BandwidthController, SharedStream, Stream, StreamRegistration};
use crate::data_chunk::DataChunk;
use crate::socket::{SocketEvent, TcpSocket};

struct ThrottleInner {
    raw: Box<dyn TcpSocket>,
    fifo: VecDeque<DataChunk>,
    buffer_used: usize,
    buffer_max: usize,
    paused: bool,
    stopped: bool,
    eof: bool,
    closed: bool,
    outbox: VecDeque<SocketEvent>,
    registration: Option<StreamRegistration>,
}

impl ThrottleInner {
    fn on_raw_event(&mut self, event: SocketEvent, controller: &BandwidthController) {
        if self.closed {
            if matches!(event, SocketEvent::Close) {
                self.outbox.push_back(SocketEvent::Close);
            }
            return;
        }

        match event {
            SocketEvent::Data(bytes) => {
                let len = bytes.len();
                self.fifo.push_back(DataChunk::new(bytes));
                self.buffer_used += len;
                if self.buffer_used >= self.buffer_max {
                    self.paused = true;
                    self.raw.stop();
                }
                controller.schedule_transfer();
            }
            SocketEvent::End => {
                self.eof = true;
                if self.buffer_used == 0 {
                    self.stopped = true;
                    self.outbox.push_back(SocketEvent::End);
                }
            }
            other => self.outbox.push_back(other),
        }
    }
}

impl Stream for ThrottleInner {
    fn set_buffer(&mut self, max: usize) {
        self.buffer_max = max;
    }

    fn available(&self) -> usize {
        self.buffer_used
    }

    fn transfer(&mut self, n: usize) {
        if self.stopped || n == 0 {
            return;
        }
        let take = std::cmp::min(n, self.buffer_used);
        if take == 0 {
            return;
        }

        let mut out = Vec::with_capacity(take);
        let mut remaining = take;
        while remaining > 0 {
            let chunk = self
                .fifo
                .front_mut()
                .expect("buffer_used must track the fifo contents");
            let n2 = std::cmp::min(chunk.remaining(), remaining);
            out.extend_from_slice(&chunk.unread()[..n2]);
            chunk.advance(n2);
            remaining -= n2;
            if chunk.is_spent() {
                self.fifo.pop_front();
            }
        }
        self.buffer_used -= take;
        self.outbox.push_back(SocketEvent::Data(out));

        if self.eof && self.buffer_used == 0 {
            self.stopped = true;
            self.outbox.push_back(SocketEvent::End);
        } else if self.paused && self.buffer_used < self.buffer_max {
            self.paused = false;
            self.raw.read();
        }
    }
}

/// Public handle to a throttled socket. Cheaply cloneable; all clones share
/// the same buffered state and the same controller registration.
#[derive(Clone)]
pub struct Throttle {
    inner: Rc<RefCell<ThrottleInner>>,
    controller: BandwidthController,
}

impl Throttle {
    /// Wraps `raw`, registering with `controller` immediately.
    pub fn new(raw: Box<dyn TcpSocket>, controller: BandwidthController) -> Self {
        let inner = Rc::new(RefCell::new(ThrottleInner {
            raw,
            fifo: VecDeque::new(),
            buffer_used: 0,
            buffer_max: 0,
            paused: false,
            stopped: false,
            eof: false,
            closed: false,
            outbox: VecDeque::new(),
            registration: None,
        }));

        let shared: SharedStream = inner.clone();
        let registration = controller.register(&shared);
        inner.borrow_mut().registration = Some(registration);

        Self { inner, controller }
    }

    /// Feeds a raw-socket event into the adapter. Call this from the
    /// reactor whenever the wrapped socket produces an event.
    pub fn on_raw_event(&mut self, event: SocketEvent) {
        self.inner.borrow_mut().on_raw_event(event, &self.controller);
    }

    /// Drains events ready for the consumer, in arrival order.
    pub fn take_events(&mut self) -> Vec<SocketEvent> {
        self.inner.borrow_mut().outbox.drain(..).collect()
    }

    /// Current `buffer_used`, exposed for invariant checks in tests
    /// (property 2).
    pub fn buffer_used(&self) -> usize {
        self.inner.borrow().buffer_used
    }
}

impl TcpSocket for Throttle {
    fn connect(&mut self, ip: IpAddr, port: u16) {
        self.inner.borrow_mut().raw.connect(ip, port);
    }

    fn read(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.stopped = false;
        if !inner.paused {
            inner.raw.read();
        }
    }

    fn stop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.stopped = true;
        if !inner.paused {
            inner.raw.stop();
        }
    }

    fn write(&mut self, buf: Vec<u8>, len: u32) {
        self.inner.borrow_mut().raw.write(buf, len);
    }

    fn shutdown(&mut self) {
        self.inner.borrow_mut().raw.shutdown();
    }

    fn close(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(registration) = inner.registration.take() {
            registration.deregister();
        }
        inner.fifo.clear();
        inner.buffer_used = 0;
        inner.raw.close();
    }

    fn is_active(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.stopped || inner.raw.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockClock, MockSocket, MockTimer, SharedTimer};
    use std::net::Ipv4Addr;

    fn controller(limit: u64) -> BandwidthController {
        BandwidthController::new(
            limit,
            Box::new(SharedTimer(Rc::new(RefCell::new(MockTimer::new())))),
            Box::new(MockClock::new(vec![1000])),
        )
    }

    #[test]
    fn pauses_raw_socket_once_buffer_fills() {
        let raw = Box::new(MockSocket::new());
        let raw_handle = raw.handle();
        let controller = controller(10); // buffer_max = 40
        let mut throttle = Throttle::new(raw, controller);

        throttle.read();
        throttle.on_raw_event(SocketEvent::Data(vec![0; 20]));
        assert!(!raw_handle.borrow().stop_called());

        throttle.on_raw_event(SocketEvent::Data(vec![0; 20]));
        assert!(raw_handle.borrow().stop_called());
        assert_eq!(throttle.buffer_used(), 40);
    }

    #[test]
    fn transfer_emits_single_contiguous_data_event_spanning_chunks() {
        let raw = Box::new(MockSocket::new());
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller);

        throttle.on_raw_event(SocketEvent::Data(vec![1, 2, 3]));
        throttle.on_raw_event(SocketEvent::Data(vec![4, 5]));

        // directly exercise Stream::transfer via the controller's schedule
        // by asking for more than one chunk's worth.
        {
            let shared_inner = throttle.inner.clone();
            shared_inner.borrow_mut().transfer(4);
        }

        let events = throttle.take_events();
        assert_eq!(events, vec![SocketEvent::Data(vec![1, 2, 3, 4])]);
        assert_eq!(throttle.buffer_used(), 1);
    }

    #[test]
    fn eof_with_buffer_drained_emits_end_and_stops() {
        let raw = Box::new(MockSocket::new());
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller);

        throttle.on_raw_event(SocketEvent::End);
        let events = throttle.take_events();
        assert_eq!(events, vec![SocketEvent::End]);
        assert!(!throttle.is_active());
    }

    #[test]
    fn eof_with_buffered_bytes_waits_for_drain() {
        let raw = Box::new(MockSocket::new());
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller);

        throttle.on_raw_event(SocketEvent::Data(vec![1, 2, 3]));
        throttle.take_events();
        throttle.on_raw_event(SocketEvent::End);
        assert!(throttle.take_events().is_empty());

        throttle.inner.borrow_mut().transfer(3);
        assert_eq!(throttle.take_events(), vec![
            SocketEvent::Data(vec![1, 2, 3]),
            SocketEvent::End,
        ]);
    }

    #[test]
    fn resumes_raw_read_once_buffer_drops_below_max() {
        let raw = Box::new(MockSocket::new());
        let raw_handle = raw.handle();
        let controller = controller(10); // buffer_max = 40
        let mut throttle = Throttle::new(raw, controller);

        throttle.on_raw_event(SocketEvent::Data(vec![0; 40]));
        assert!(raw_handle.borrow().stop_called());

        throttle.inner.borrow_mut().transfer(30);
        assert!(raw_handle.borrow().read_called_after_stop());
    }

    #[test]
    fn property_7_close_suppresses_all_but_close_event() {
        let raw = Box::new(MockSocket::new());
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller);

        throttle.close();
        throttle.on_raw_event(SocketEvent::Data(vec![1]));
        throttle.on_raw_event(SocketEvent::Connect);
        throttle.on_raw_event(SocketEvent::Write);
        throttle.on_raw_event(SocketEvent::Shutdown);
        assert!(throttle.take_events().is_empty());

        throttle.on_raw_event(SocketEvent::Close);
        assert_eq!(throttle.take_events(), vec![SocketEvent::Close]);
    }

    #[test]
    fn close_is_idempotent_and_deregisters() {
        let raw = Box::new(MockSocket::new());
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller.clone());

        throttle.close();
        throttle.close();

        // A second registration against the same controller shouldn't see
        // the closed stream participate in scheduling.
        let other_raw = Box::new(MockSocket::new());
        let mut other = Throttle::new(other_raw, controller.clone());
        other.on_raw_event(SocketEvent::Data(vec![0; 10]));
        controller.schedule_transfer();
        // no panic => dead/removed registration handled cleanly
    }

    #[test]
    fn ip_v4_connect_forwards_to_raw() {
        let raw = Box::new(MockSocket::new());
        let raw_handle = raw.handle();
        let controller = controller(1000);
        let mut throttle = Throttle::new(raw, controller);
        throttle.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), 80);
        assert_eq!(
            raw_handle.borrow().connect_target(),
            Some((IpAddr::V4(Ipv4Addr::LOCALHOST), 80))
        );
    }
}
