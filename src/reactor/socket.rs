//! Concrete `TcpSocket` backed by `mio::net::TcpStream`.
//!
//! `TcpSocket`'s methods are commands, not blocking calls (§4.1): they only
//! record intent (`want_read`, a pending write buffer, a connect target)
//! and update the socket's `mio::Registry` interest. The reactor's poll
//! loop performs the actual I/O when readiness arrives and turns the
//! result into the `SocketEvent`s the downloader expects.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write as IoWrite};
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::rc::Rc;

use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Registry, Token};

use crate::factory::RawSocketFactory;
use crate::job::JobId;
use crate::socket::{SocketEvent, TcpSocket};
use crate::throttle::Throttle;

pub(crate) const READ_CHUNK: usize = 64 * 1024;

pub(crate) struct SocketState {
    pub token: Token,
    pub registry: Registry,
    pub stream: Option<MioTcpStream>,
    pub registered: bool,
    pub connecting: bool,
    pub want_read: bool,
    pub pending_write: Option<(Vec<u8>, u32)>,
    pub closed: bool,
    pub job_id: Option<JobId>,
    /// Events that couldn't be raised synchronously from a `TcpSocket`
    /// command (e.g. a connect target that's immediately unreachable
    /// locally) — drained by the reactor alongside real mio readiness.
    pub synthetic: VecDeque<SocketEvent>,
    /// Set by `ReactorDownloaderFactory::create` right after construction
    /// when a bandwidth controller is configured. Raw events for this
    /// socket must be routed through the throttle instead of dispatched to
    /// the orchestrator directly.
    pub throttle: Option<Throttle>,
}

impl SocketState {
    fn desired_interest(&self) -> Option<Interest> {
        if self.closed {
            return None;
        }
        let mut interest: Option<Interest> = None;
        if self.connecting || self.pending_write.is_some() {
            interest = Some(Interest::WRITABLE);
        }
        if self.want_read {
            interest = Some(match interest {
                Some(i) => i | Interest::READABLE,
                None => Interest::READABLE,
            });
        }
        interest
    }

    fn sync_registration(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match self.desired_interest() {
            Some(interest) if !self.registered => {
                if self.registry.register(stream, self.token, interest).is_ok() {
                    self.registered = true;
                }
            }
            Some(interest) => {
                let _ = self.registry.reregister(stream, self.token, interest);
            }
            None if self.registered => {
                let _ = self.registry.deregister(stream);
                self.registered = false;
            }
            None => {}
        }
    }
}

/// `TcpSocket` handle owned by a `Downloader`. The reactor holds a second
/// `Rc` clone of the same `SocketState` to perform I/O on readiness.
pub struct MioSocket {
    state: Rc<RefCell<SocketState>>,
}

impl MioSocket {
    pub(crate) fn new(state: Rc<RefCell<SocketState>>) -> Self {
        Self { state }
    }
}

impl TcpSocket for MioSocket {
    fn connect(&mut self, ip: IpAddr, port: u16) {
        let mut state = self.state.borrow_mut();
        match MioTcpStream::connect(SocketAddr::new(ip, port)) {
            Ok(stream) => {
                state.stream = Some(stream);
                state.connecting = true;
                state.sync_registration();
            }
            Err(e) => {
                state.synthetic.push_back(SocketEvent::Error {
                    code: e.raw_os_error().unwrap_or(0),
                    description: e.to_string(),
                });
            }
        }
    }

    fn read(&mut self) {
        let mut state = self.state.borrow_mut();
        state.want_read = true;
        state.sync_registration();
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.want_read = false;
        state.sync_registration();
    }

    fn write(&mut self, buf: Vec<u8>, len: u32) {
        let mut state = self.state.borrow_mut();
        state.pending_write = Some((buf, len));
        state.sync_registration();
    }

    fn shutdown(&mut self) {
        let state = self.state.borrow();
        if let Some(stream) = &state.stream {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.want_read = false;
        state.pending_write = None;
        state.sync_registration();
        state.stream = None;
        state.synthetic.push_back(SocketEvent::Close);
    }

    fn is_active(&self) -> bool {
        let state = self.state.borrow();
        state.want_read || state.pending_write.is_some()
    }
}

/// Services one readiness notification for `token`, performing the actual
/// read/write/connect-completion syscall and returning the resulting
/// event, if any (readiness with nothing to do yet, e.g. a spurious
/// writable wakeup after a write already completed, yields `None`).
pub(crate) fn service_readiness(
    state: &Rc<RefCell<SocketState>>,
    readable: bool,
    writable: bool,
) -> Option<SocketEvent> {
    let mut s = state.borrow_mut();

    if writable && s.connecting {
        s.connecting = false;
        let err = s.stream.as_ref().and_then(|st| st.take_error().ok().flatten());
        return match err {
            None => {
                s.sync_registration();
                Some(SocketEvent::Connect)
            }
            Some(e) => Some(SocketEvent::Error {
                code: e.raw_os_error().unwrap_or(0),
                description: e.to_string(),
            }),
        };
    }

    if writable {
        if let Some((buf, len)) = s.pending_write.take() {
            let result = s.stream.as_mut().map(|st| st.write(&buf[..len as usize]));
            return match result {
                Some(Ok(n)) if n == len as usize => {
                    s.sync_registration();
                    Some(SocketEvent::Write)
                }
                Some(Ok(n)) => {
                    // Partial write: keep the unwritten tail pending and wait
                    // for the next writable readiness instead of reporting
                    // completion early.
                    let remaining = buf[n..].to_vec();
                    let remaining_len = len - n as u32;
                    s.pending_write = Some((remaining, remaining_len));
                    None
                }
                Some(Err(e)) if e.kind() == ErrorKind::WouldBlock => {
                    s.pending_write = Some((buf, len));
                    None
                }
                Some(Err(e)) => Some(SocketEvent::Error {
                    code: e.raw_os_error().unwrap_or(0),
                    description: e.to_string(),
                }),
                None => None,
            };
        }
    }

    if readable && s.want_read {
        let mut chunk = vec![0u8; READ_CHUNK];
        let result = s.stream.as_mut().map(|st| st.read(&mut chunk));
        return match result {
            Some(Ok(0)) => Some(SocketEvent::End),
            Some(Ok(n)) => {
                chunk.truncate(n);
                Some(SocketEvent::Data(chunk))
            }
            Some(Err(e)) if e.kind() == ErrorKind::WouldBlock => None,
            Some(Err(e)) => Some(SocketEvent::Error {
                code: e.raw_os_error().unwrap_or(0),
                description: e.to_string(),
            }),
            None => None,
        };
    }

    None
}

/// Produces unconnected [`MioSocket`]s, wiring each freshly allocated
/// `Token` into the reactor's shared socket table before handing the
/// socket to the generic [`crate::factory::SocketFactory`].
pub struct ReactorRawSocketFactory {
    registry: Registry,
    next_token: Rc<Cell<usize>>,
    sockets: Rc<RefCell<std::collections::HashMap<Token, Rc<RefCell<SocketState>>>>>,
    /// Set by `ReactorDownloaderFactory::create` immediately before calling
    /// through `SocketFactory::create`, since `RawSocketFactory::create`
    /// has no `job_id` parameter of its own. Safe because the whole engine
    /// runs on one thread and a job is never started re-entrantly mid-call.
    pending_job: Rc<Cell<Option<JobId>>>,
    /// Token of the socket this factory most recently created, so
    /// `ReactorDownloaderFactory::create` can attach the `Option<Throttle>`
    /// that `SocketFactory::create` hands back to the right table entry.
    /// Same single-threaded, non-reentrant reasoning as `pending_job`.
    last_token: Rc<Cell<Option<Token>>>,
}

impl ReactorRawSocketFactory {
    pub(crate) fn new(
        registry: Registry,
        next_token: Rc<Cell<usize>>,
        sockets: Rc<RefCell<std::collections::HashMap<Token, Rc<RefCell<SocketState>>>>>,
        pending_job: Rc<Cell<Option<JobId>>>,
        last_token: Rc<Cell<Option<Token>>>,
    ) -> Self {
        Self {
            registry,
            next_token,
            sockets,
            pending_job,
            last_token,
        }
    }
}

impl RawSocketFactory for ReactorRawSocketFactory {
    fn create(&self) -> Box<dyn TcpSocket> {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);

        let state = Rc::new(RefCell::new(SocketState {
            token,
            registry: self.registry.try_clone().expect("registry try_clone"),
            stream: None,
            registered: false,
            connecting: false,
            want_read: false,
            pending_write: None,
            closed: false,
            job_id: self.pending_job.take(),
            synthetic: VecDeque::new(),
            throttle: None,
        }));

        self.sockets.borrow_mut().insert(token, state.clone());
        self.last_token.set(Some(token));
        Box::new(MioSocket::new(state))
    }
}
