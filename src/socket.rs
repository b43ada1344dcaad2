//! TCP socket contract (component C).
//!
//! Mirrors the teacher's `net::tcp_stream::TcpStream` trait: a small
//! interface implemented once for the real transport (`reactor::socket::MioSocket`)
//! and once for test doubles, so the downloader state machine and the
//! bandwidth/throttle layers never depend on a concrete socket type.

use std::net::IpAddr;

/// Events a [`TcpSocket`] can deliver to its owner. Exactly one is emitted
/// per step; after `close()`, exactly one `Close` follows and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connect attempt completed successfully.
    Connect,
    /// Bytes arrived. The owner takes ownership of the buffer.
    Data(Vec<u8>),
    /// The peer half-closed the connection (read side reached EOF).
    End,
    /// A previously submitted `write` completed.
    Write,
    /// `shutdown()` completed.
    Shutdown,
    /// `close()` completed; terminal event for this handle.
    Close,
    /// An I/O error occurred. `code` is an OS-ish error code when
    /// available, `0` otherwise.
    Error {
        /// Raw OS error code, or 0 if not applicable.
        code: i32,
        /// Human-readable description.
        description: String,
    },
}

/// Polymorphic TCP socket operations. A step function owned by the caller
/// is invoked by the reactor with the resulting [`SocketEvent`]; this trait
/// only issues commands.
pub trait TcpSocket {
    /// Begins connecting to `(ip, port)`.
    fn connect(&mut self, ip: IpAddr, port: u16);

    /// Requests the next `Data`/`End`/`Error` event be delivered. Idempotent
    /// while already reading.
    fn read(&mut self);

    /// Requests reads stop being delivered. Does not close the handle.
    fn stop(&mut self);

    /// Submits `len` bytes (`buf.len() >= len`, `len` fits `u32`) for
    /// writing. Exactly one `Write` or `Error` event follows.
    fn write(&mut self, buf: Vec<u8>, len: u32);

    /// Half-closes the write side.
    fn shutdown(&mut self);

    /// Releases the handle. Exactly one `Close` event follows.
    fn close(&mut self);

    /// `true` while reading or while a write is still pending completion.
    fn is_active(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSocket;
    use std::net::Ipv4Addr;

    #[test]
    fn is_active_tracks_read_and_pending_write() {
        let mut socket = MockSocket::new();
        assert!(!socket.is_active());

        socket.read();
        assert!(socket.is_active());

        socket.stop();
        assert!(!socket.is_active());

        socket.write(vec![1, 2, 3], 3);
        assert!(socket.is_active());
    }

    #[test]
    fn connect_records_target() {
        let mut socket = MockSocket::new();
        socket.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
        assert_eq!(
            socket.connect_target(),
            Some((IpAddr::V4(Ipv4Addr::LOCALHOST), 8080))
        );
    }

    #[test]
    fn close_is_terminal() {
        let mut socket = MockSocket::new();
        socket.read();
        socket.close();
        assert!(socket.closed());
        assert!(!socket.is_active());
    }
}
