//! Socket factory (component H): plain or bandwidth-wrapped socket
//! construction, so the downloader and the orchestrator never need to know
//! whether a bandwidth controller is configured.

use crate::bandwidth::BandwidthController;
use crate::socket::TcpSocket;
use crate::throttle::Throttle;

/// Produces a fresh, unconnected raw socket. Implemented once for real by
/// the reactor, and by test doubles in unit tests.
pub trait RawSocketFactory {
    fn create(&self) -> Box<dyn TcpSocket>;
}

/// Builds sockets for downloaders, wrapping each in a [`Throttle`] when a
/// [`BandwidthController`] is configured.
pub struct SocketFactory {
    raw: Box<dyn RawSocketFactory>,
    controller: Option<BandwidthController>,
}

impl SocketFactory {
    /// Creates a factory backed by `raw`. Sockets are bandwidth-throttled
    /// iff `controller` is `Some`.
    pub fn new(raw: Box<dyn RawSocketFactory>, controller: Option<BandwidthController>) -> Self {
        Self { raw, controller }
    }

    /// Produces a new, unconnected socket ready for the downloader to
    /// `connect()`. When a bandwidth controller is configured, also
    /// returns a second, cheaply-cloned handle onto the same [`Throttle`]
    /// so the reactor can feed it raw-socket events directly — the
    /// downloader only ever sees the opaque `Box<dyn TcpSocket>`.
    pub fn create(&self) -> (Box<dyn TcpSocket>, Option<Throttle>) {
        let raw = self.raw.create();
        match &self.controller {
            Some(controller) => {
                let throttle = Throttle::new(raw, controller.clone());
                (Box::new(throttle.clone()), Some(throttle))
            }
            None => (raw, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::mocks::MockSocket;
    use crate::socket::SocketEvent;
    use crate::timer::Timer;
    use std::time::Duration;

    struct CountingFactory {
        created: std::cell::RefCell<usize>,
    }

    impl RawSocketFactory for CountingFactory {
        fn create(&self) -> Box<dyn TcpSocket> {
            *self.created.borrow_mut() += 1;
            Box::new(MockSocket::new())
        }
    }

    struct NullTimer;
    impl Timer for NullTimer {
        fn start(&mut self, _timeout: Duration, _repeat: Duration) {}
        fn again(&mut self) {}
        fn stop(&mut self) {}
        fn close(&mut self) {}
    }

    #[test]
    fn plain_factory_returns_raw_socket_unwrapped() {
        let raw = CountingFactory {
            created: std::cell::RefCell::new(0),
        };
        let factory = SocketFactory::new(Box::new(raw), None);
        let (mut socket, throttle) = factory.create();
        assert!(throttle.is_none());
        assert!(!socket.is_active());
        socket.read();
        assert!(socket.is_active());
    }

    #[test]
    fn bandwidth_factory_wraps_socket_with_throttle() {
        let raw = CountingFactory {
            created: std::cell::RefCell::new(0),
        };
        let controller = BandwidthController::new(10, Box::new(NullTimer), Box::new(SystemClock::new()));
        let factory = SocketFactory::new(Box::new(raw), Some(controller));
        let (mut socket, throttle) = factory.create();
        let mut throttle = throttle.expect("bandwidth-configured factory always returns a handle");

        socket.read();
        // buffer_max = 4 * 10 = 40; pushing 40 bytes of raw data should pause
        // the underlying raw socket once the buffer fills, confirming the
        // returned socket really is the same throttle the caller holds.
        throttle.on_raw_event(crate::socket::SocketEvent::Data(vec![0; 40]));
        assert!(!socket.is_active(), "throttle stops the raw read once full, Data isn't forwarded yet");
        assert_eq!(throttle.take_events(), Vec::new());
    }
}
