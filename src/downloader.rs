//! Per-task download state machine (component I, §4.6) — the largest piece
//! of the core. Drives a socket, a timer, and a file writer through
//! resolve → connect → write-request → read-response → close, with a
//! single reused 5 s phase timeout and backlog-bounded backpressure between
//! the socket and the file writer.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::data_chunk::DataChunk;
use crate::error::EngineError;
use crate::file::{FileEvent, FileWriter, FsRequest};
use crate::http::{BodyStatus, BodyTracker, ParseStep, ResponseParser, Uri};
use crate::job::{DownloadStatus, JobId, State};
use crate::socket::{SocketEvent, TcpSocket};
use crate::task::Task;
use crate::timer::Timer;

const PHASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events fed into a [`Downloader`] from outside: DNS resolution results
/// (resolved by the reactor's helper thread, not by the downloader itself),
/// socket events, file events, and the shared timer firing.
#[derive(Debug)]
pub enum DownloaderEvent {
    Resolved(IpAddr),
    ResolveFailed(String),
    Socket(SocketEvent),
    File(FileEvent),
    TimerFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving,
    Connecting,
    WritingRequest,
    Reading,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Unopened,
    Opening,
    Idle,
    Writing,
}

/// Drives one job's download from construction to a terminal
/// `DownloadStatus`. Owns its timer, socket, and file writer exclusively.
pub struct Downloader {
    job_id: JobId,
    uri: Uri,
    fname: PathBuf,
    phase: Phase,
    status: DownloadStatus,

    timer: Box<dyn Timer>,
    socket: Box<dyn TcpSocket>,
    file: Box<dyn FileWriter>,
    fs: Box<dyn FsRequest>,

    parser: ResponseParser,
    body: Option<BodyTracker>,
    socket_eof: bool,

    backlog_limit: usize,
    fifo: VecDeque<DataChunk>,
    file_offset: u64,
    file_state: FileState,
    file_opened: bool,
    backlog_stop_active: bool,

    awaiting_socket_close: bool,
    awaiting_file_close: bool,
    terminal_announced: bool,
}

impl Downloader {
    /// Parses `task.uri` and, on success, constructs a downloader parked in
    /// the `RESOLVING` phase with its phase timer already armed. A parse
    /// failure or unsupported scheme refuses the run — the caller never
    /// sees an `InFlight` status (§4.6: `INIT —uri-parse-fail—> refuse run`).
    pub fn new(
        job_id: JobId,
        task: &Task,
        socket: Box<dyn TcpSocket>,
        mut timer: Box<dyn Timer>,
        file: Box<dyn FileWriter>,
        fs: Box<dyn FsRequest>,
        backlog: usize,
    ) -> Result<Self, EngineError> {
        let uri = Uri::parse(&task.uri)?;
        uri.require_supported()?;

        let mut status = DownloadStatus::init();
        status.in_flight("resolving");
        timer.start(PHASE_TIMEOUT, Duration::ZERO);

        Ok(Self {
            job_id,
            uri,
            fname: task.fname.clone(),
            phase: Phase::Resolving,
            status,
            timer,
            socket,
            file,
            fs,
            parser: ResponseParser::new(),
            body: None,
            socket_eof: false,
            backlog_limit: backlog.max(1),
            fifo: VecDeque::new(),
            file_offset: 0,
            file_state: FileState::Unopened,
            file_opened: false,
            backlog_stop_active: false,
            awaiting_socket_close: false,
            awaiting_file_close: false,
            terminal_announced: false,
        })
    }

    /// Hostname the reactor should resolve before delivering `Resolved`.
    pub fn host(&self) -> &str {
        &self.uri.host
    }

    /// Port the reactor should connect to once resolution completes.
    pub fn port(&self) -> u16 {
        self.uri.port
    }

    /// Current status snapshot.
    pub fn status(&self) -> &DownloadStatus {
        &self.status
    }

    /// Cooperative external abort (§5): fails the download and runs full
    /// teardown, same as any other failure path.
    pub fn stop(&mut self) -> bool {
        self.fail(EngineError::Aborted.detail())
    }

    /// Advances the state machine. Returns `true` exactly once, the call
    /// after which `status()` reflects a terminal state and teardown has
    /// fully completed — the caller should invoke its on-tick hook then.
    pub fn on_event(&mut self, event: DownloaderEvent) -> bool {
        match self.phase {
            Phase::Resolving => self.on_resolving(event),
            Phase::Connecting => self.on_connecting(event),
            Phase::WritingRequest => self.on_writing_request(event),
            Phase::Reading => self.on_reading(event),
            Phase::Closing => self.on_closing(event),
        }
    }

    fn on_resolving(&mut self, event: DownloaderEvent) -> bool {
        match event {
            DownloaderEvent::Resolved(ip) => {
                self.timer.stop();
                self.phase = Phase::Connecting;
                self.timer.start(PHASE_TIMEOUT, Duration::ZERO);
                self.socket.connect(ip, self.uri.port);
                false
            }
            DownloaderEvent::ResolveFailed(detail) => self.fail(format!("resolve error: {detail}")),
            DownloaderEvent::TimerFired => self.fail("timeout resolving host".to_string()),
            _ => false,
        }
    }

    fn on_connecting(&mut self, event: DownloaderEvent) -> bool {
        match event {
            DownloaderEvent::Socket(SocketEvent::Connect) => {
                self.timer.stop();
                self.phase = Phase::WritingRequest;
                self.timer.start(PHASE_TIMEOUT, Duration::ZERO);
                let request = self.uri.request_bytes();
                let len = request.len() as u32;
                self.socket.write(request, len);
                false
            }
            DownloaderEvent::Socket(SocketEvent::Error { description, .. }) => {
                self.fail(format!("connect error: {description}"))
            }
            DownloaderEvent::TimerFired => self.fail("timeout connecting to host".to_string()),
            _ => false,
        }
    }

    fn on_writing_request(&mut self, event: DownloaderEvent) -> bool {
        match event {
            DownloaderEvent::Socket(SocketEvent::Write) => {
                self.timer.stop();
                self.phase = Phase::Reading;
                self.timer.start(PHASE_TIMEOUT, Duration::ZERO);
                self.socket.read();
                false
            }
            DownloaderEvent::Socket(SocketEvent::Error { description, .. }) => {
                self.fail(format!("write error: {description}"))
            }
            DownloaderEvent::TimerFired => self.fail("timeout writing request".to_string()),
            _ => false,
        }
    }

    fn on_reading(&mut self, event: DownloaderEvent) -> bool {
        match event {
            DownloaderEvent::Socket(SocketEvent::Data(bytes)) => self.on_body_bytes(bytes),
            DownloaderEvent::Socket(SocketEvent::End) => {
                self.socket_eof = true;
                self.check_completion()
            }
            DownloaderEvent::Socket(SocketEvent::Error { description, .. }) => {
                self.fail(format!("read error: {description}"))
            }
            DownloaderEvent::TimerFired => self.fail("timeout reading response".to_string()),
            DownloaderEvent::File(event) => self.on_file_event(event),
            _ => false,
        }
    }

    fn on_body_bytes(&mut self, bytes: Vec<u8>) -> bool {
        if self.body.is_some() {
            return self.push_body_chunk(bytes);
        }

        match self.parser.feed(&bytes) {
            ParseStep::NeedMoreData => false,
            ParseStep::Error(msg) => self.fail(format!("parse error: {msg}")),
            ParseStep::Headers(headers) => {
                self.timer.stop();
                self.timer.start(PHASE_TIMEOUT, Duration::ZERO);

                if let Some(target) = headers.redirect {
                    let target_uri = format!(
                        "{}://{}:{}{}",
                        target.scheme, target.host, target.port, target.request_target
                    );
                    return self.redirect(target_uri);
                }

                self.status.expected_size = headers.content_length;
                self.body = Some(BodyTracker::new(headers.content_length));

                let leftover = self.parser.buffered()[headers.consumed..].to_vec();
                if leftover.is_empty() {
                    self.check_completion()
                } else {
                    self.push_body_chunk(leftover)
                }
            }
        }
    }

    fn push_body_chunk(&mut self, bytes: Vec<u8>) -> bool {
        if bytes.is_empty() {
            return self.check_completion();
        }
        if self.file_state == FileState::Unopened {
            self.file.open(self.fname.clone());
            self.file_state = FileState::Opening;
            self.file_opened = true;
        }
        self.fifo.push_back(DataChunk::new(bytes));
        if self.fifo.len() >= self.backlog_limit && !self.backlog_stop_active {
            self.backlog_stop_active = true;
            self.socket.stop();
        }
        self.try_submit_write();
        false
    }

    fn try_submit_write(&mut self) {
        if self.file_state != FileState::Idle {
            return;
        }
        let Some(chunk) = self.fifo.front() else {
            return;
        };
        let bytes = chunk.unread().to_vec();
        let len = bytes.len() as u32;
        self.file_state = FileState::Writing;
        self.file.write(bytes, len, self.file_offset);
    }

    fn on_file_event(&mut self, event: FileEvent) -> bool {
        match event {
            FileEvent::Open => {
                self.file_state = FileState::Idle;
                self.try_submit_write();
                false
            }
            FileEvent::Write(n) => {
                self.file_state = FileState::Idle;
                self.file_offset += n as u64;
                self.status.record_downloaded(n as u64);
                if let Some(body) = &mut self.body {
                    body.record(n as u64);
                }

                let chunk_spent = {
                    let chunk = self
                        .fifo
                        .front_mut()
                        .expect("file write completion without a matching queued chunk");
                    chunk.advance(n as usize);
                    chunk.is_spent()
                };
                if chunk_spent {
                    self.fifo.pop_front();
                }

                if self.fifo.is_empty() {
                    if self.backlog_stop_active {
                        self.backlog_stop_active = false;
                        if !self.socket.is_active() {
                            self.socket.read();
                        }
                    }
                    return self.check_completion();
                }
                self.try_submit_write();
                false
            }
            FileEvent::Error { description, .. } => self.fail(format!("file write error: {description}")),
            FileEvent::Close => false,
        }
    }

    /// Re-checks whether the body is fully received and drained to disk,
    /// and if so transitions to `Done`. Also detects an EOF that arrived
    /// before the declared (or, for an unparsed response, any) body was
    /// complete.
    fn check_completion(&mut self) -> bool {
        let Some(body) = self.body.as_ref() else {
            return if self.socket_eof {
                self.fail("connection closed before headers completed".to_string())
            } else {
                false
            };
        };

        let body_done = if body.length_known() {
            body.status() == BodyStatus::Done
        } else {
            self.socket_eof
        };

        if !body_done {
            return if self.socket_eof {
                self.fail("connection closed before body complete".to_string())
            } else {
                false
            };
        }

        if !self.fifo.is_empty() || matches!(self.file_state, FileState::Writing | FileState::Opening) {
            return false;
        }

        self.succeed()
    }

    fn succeed(&mut self) -> bool {
        log::info!("job {}: done, {} bytes", self.job_id.0, self.status.downloaded);
        self.status.done();
        self.enter_closing()
    }

    fn fail(&mut self, detail: String) -> bool {
        log::warn!("job {}: failed — {detail}", self.job_id.0);
        self.status.failed(detail);
        self.enter_closing()
    }

    fn redirect(&mut self, target: String) -> bool {
        log::debug!("job {}: redirect to {target}", self.job_id.0);
        self.status.redirect(target);
        self.enter_closing()
    }

    fn enter_closing(&mut self) -> bool {
        if self.phase == Phase::Closing {
            return self.maybe_finish();
        }
        self.phase = Phase::Closing;

        self.timer.stop();
        self.timer.close();

        if matches!(self.file_state, FileState::Opening | FileState::Writing) {
            self.file.cancel();
        }
        if self.file_opened {
            self.awaiting_file_close = true;
            self.file.close();
        }

        self.awaiting_socket_close = true;
        self.socket.shutdown();
        self.socket.close();

        self.maybe_finish()
    }

    fn on_closing(&mut self, event: DownloaderEvent) -> bool {
        match event {
            DownloaderEvent::Socket(SocketEvent::Close) => self.awaiting_socket_close = false,
            DownloaderEvent::Socket(SocketEvent::Error { .. }) => self.awaiting_socket_close = false,
            DownloaderEvent::File(FileEvent::Close) => self.awaiting_file_close = false,
            DownloaderEvent::File(FileEvent::Error { .. }) => self.awaiting_file_close = false,
            _ => {}
        }
        self.maybe_finish()
    }

    fn maybe_finish(&mut self) -> bool {
        if self.terminal_announced || self.awaiting_socket_close || self.awaiting_file_close {
            return false;
        }
        self.terminal_announced = true;
        if self.status.state == State::Failed && self.file_opened {
            self.fs.unlink(self.fname.clone());
        }
        true
    }
}
