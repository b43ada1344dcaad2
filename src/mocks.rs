//! Hand-written test doubles for the engine's small trait contracts.
//!
//! The pack shows no mocking-framework usage anywhere (no `mockall`), and
//! the original C++ implementation's own test suite hand-writes mocks
//! (`test/*_mock.h`) rather than generating them — this module follows
//! that precedent instead of pulling in a mocking crate.

#![cfg(test)]

use std::cell::RefCell;
use std::net::IpAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::bandwidth::Stream;
use crate::clock::Clock;
use crate::file::FileWriter;
use crate::file::FsRequest;
use crate::socket::TcpSocket;
use crate::timer::Timer;

/// Deterministic clock: returns a scripted sequence of elapsed-ms values,
/// one per call, repeating the last value once the script is exhausted.
#[derive(Debug)]
pub struct MockClock {
    script: Vec<u64>,
    pos: usize,
}

impl MockClock {
    pub fn new(script: Vec<u64>) -> Self {
        Self { script, pos: 0 }
    }
}

impl Clock for MockClock {
    fn elapsed_since_last_call(&mut self) -> u64 {
        let value = self
            .script
            .get(self.pos)
            .copied()
            .unwrap_or_else(|| *self.script.last().unwrap_or(&0));
        self.pos += 1;
        value
    }
}

/// Records every `start`/`again`/`stop`/`close` call.
#[derive(Debug, Default)]
pub struct MockTimer {
    starts: Vec<Duration>,
    current_timeout: Option<Duration>,
    stopped: bool,
    closed: bool,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> &[Duration] {
        &self.starts
    }

    pub fn closed(&self) -> bool {
        self.closed
    }
}

impl Timer for MockTimer {
    fn start(&mut self, timeout: Duration, _repeat: Duration) {
        self.starts.push(timeout);
        self.current_timeout = Some(timeout);
        self.stopped = false;
    }

    fn again(&mut self) {
        if let Some(timeout) = self.current_timeout {
            self.starts.push(timeout);
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Delegates `Timer` calls through a shared `Rc<RefCell<MockTimer>>` so a
/// test can hand ownership of a `Box<dyn Timer>` to production code while
/// retaining a handle to inspect recorded calls.
pub struct SharedTimer(pub Rc<RefCell<MockTimer>>);

impl Timer for SharedTimer {
    fn start(&mut self, timeout: Duration, repeat: Duration) {
        self.0.borrow_mut().start(timeout, repeat);
    }

    fn again(&mut self) {
        self.0.borrow_mut().again();
    }

    fn stop(&mut self) {
        self.0.borrow_mut().stop();
    }

    fn close(&mut self) {
        self.0.borrow_mut().close();
    }
}

/// Shared call log behind a [`MockSocket`], inspectable after the socket
/// has been moved into a `Box<dyn TcpSocket>`.
#[derive(Debug, Default)]
pub struct SocketLog {
    connect_target: Option<(IpAddr, u16)>,
    reading: bool,
    pending_write: bool,
    stop_calls: u32,
    had_stop: bool,
    read_after_stop: bool,
    closed: bool,
    writes: Vec<(Vec<u8>, u32)>,
}

impl SocketLog {
    pub fn stop_called(&self) -> bool {
        self.stop_calls > 0
    }

    pub fn read_called_after_stop(&self) -> bool {
        self.read_after_stop
    }

    pub fn connect_target(&self) -> Option<(IpAddr, u16)> {
        self.connect_target
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn writes(&self) -> &[(Vec<u8>, u32)] {
        &self.writes
    }
}

/// Scriptable raw `TcpSocket` double.
pub struct MockSocket {
    log: Rc<RefCell<SocketLog>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(SocketLog::default())),
        }
    }

    pub fn handle(&self) -> Rc<RefCell<SocketLog>> {
        self.log.clone()
    }

    pub fn connect_target(&self) -> Option<(IpAddr, u16)> {
        self.log.borrow().connect_target
    }

    pub fn closed(&self) -> bool {
        self.log.borrow().closed
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocket for MockSocket {
    fn connect(&mut self, ip: IpAddr, port: u16) {
        self.log.borrow_mut().connect_target = Some((ip, port));
    }

    fn read(&mut self) {
        let mut log = self.log.borrow_mut();
        if log.had_stop {
            log.read_after_stop = true;
        }
        log.reading = true;
    }

    fn stop(&mut self) {
        let mut log = self.log.borrow_mut();
        log.reading = false;
        log.stop_calls += 1;
        log.had_stop = true;
    }

    fn write(&mut self, buf: Vec<u8>, len: u32) {
        let mut log = self.log.borrow_mut();
        log.pending_write = true;
        log.writes.push((buf, len));
    }

    fn shutdown(&mut self) {}

    fn close(&mut self) {
        let mut log = self.log.borrow_mut();
        log.closed = true;
        log.reading = false;
        log.pending_write = false;
    }

    fn is_active(&self) -> bool {
        let log = self.log.borrow();
        log.reading || log.pending_write
    }
}

/// Records every `open`/`write`/`close`/`cancel` call in arrival order.
#[derive(Debug, Default)]
pub struct MockFileWriter {
    ops: Vec<String>,
    cancelled: bool,
}

impl MockFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[String] {
        &self.ops
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}

impl FileWriter for MockFileWriter {
    fn open(&mut self, path: PathBuf) {
        self.ops.push(format!("open({})", path.display()));
    }

    fn write(&mut self, _buf: Vec<u8>, len: u32, offset: u64) {
        self.ops.push(format!("write({len}@{offset})"));
    }

    fn close(&mut self) {
        self.ops.push("close".to_string());
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// Records every `unlink` call.
#[derive(Debug, Default)]
pub struct MockFsRequest {
    unlinked: Vec<PathBuf>,
}

impl MockFsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unlinked(&self) -> &[PathBuf] {
        &self.unlinked
    }
}

impl FsRequest for MockFsRequest {
    fn unlink(&mut self, path: PathBuf) {
        self.unlinked.push(path);
    }
}

/// Delegates `FileWriter` calls through a shared handle, mirroring
/// [`SharedTimer`] so a test can inspect a [`MockFileWriter`] after handing
/// it off as a `Box<dyn FileWriter>`.
pub struct SharedFileWriter(pub Rc<RefCell<MockFileWriter>>);

impl FileWriter for SharedFileWriter {
    fn open(&mut self, path: PathBuf) {
        self.0.borrow_mut().open(path);
    }

    fn write(&mut self, buf: Vec<u8>, len: u32, offset: u64) {
        self.0.borrow_mut().write(buf, len, offset);
    }

    fn close(&mut self) {
        self.0.borrow_mut().close();
    }

    fn cancel(&mut self) {
        self.0.borrow_mut().cancel();
    }
}

/// Delegates `FsRequest` calls through a shared handle.
pub struct SharedFsRequest(pub Rc<RefCell<MockFsRequest>>);

impl FsRequest for SharedFsRequest {
    fn unlink(&mut self, path: PathBuf) {
        self.0.borrow_mut().unlink(path);
    }
}

/// Scriptable [`Stream`] double for bandwidth controller tests.
#[derive(Debug, Default)]
pub struct MockStream {
    available: usize,
    buffer_max: usize,
    transfers: Vec<usize>,
}

impl MockStream {
    pub fn new(available: usize) -> Self {
        Self {
            available,
            buffer_max: 0,
            transfers: Vec::new(),
        }
    }

    pub fn transfers(&self) -> &[usize] {
        &self.transfers
    }

    pub fn buffer_max(&self) -> usize {
        self.buffer_max
    }

    /// Inherent alias for [`Stream::available`] so callers don't need the
    /// trait in scope just to inspect a mock in assertions.
    pub fn available(&self) -> usize {
        self.available
    }
}

impl Stream for MockStream {
    fn set_buffer(&mut self, max: usize) {
        self.buffer_max = max;
    }

    fn available(&self) -> usize {
        self.available
    }

    fn transfer(&mut self, n: usize) {
        let taken = std::cmp::min(n, self.available);
        self.available -= taken;
        self.transfers.push(taken);
    }
}
