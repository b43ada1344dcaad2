//! Concrete event loop (component L): a `mio`-backed `Clock`/`Timer`/
//! `TcpSocket`, plus a helper thread pool for the blocking work mio can't
//! do on its own thread (DNS resolution, file I/O). This is the "concrete
//! event loop implementation" the core component design deliberately
//! leaves abstract — the engine's orchestrator and downloader never
//! reference anything in this module directly.

mod file;
mod socket;
mod timer;
mod workpool;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};

use crate::bandwidth::BandwidthController;
use crate::clock::SystemClock;
use crate::downloader::{Downloader, DownloaderEvent};
use crate::error::EngineError;
use crate::factory::SocketFactory;
use crate::job::JobId;
use crate::orchestrator::{DownloaderFactory, Orchestrator};
use crate::task::Task;

use file::{ThreadFileWriter, ThreadFsRequest};
use socket::{service_readiness, ReactorRawSocketFactory, SocketState};
use timer::{MioTimer, TimerState};
use workpool::{Completion, WorkPool};

const WAKE_TOKEN: Token = Token(usize::MAX);
const FIRST_SOCKET_TOKEN: usize = 1;

/// Routes a raw socket event to the orchestrator, first passing it through
/// the socket's [`crate::throttle::Throttle`] when one is attached — the
/// downloader's `TcpSocket` handle is opaque, so the reactor is the only
/// place that can bridge raw readiness into throttled delivery.
fn dispatch_socket_event(
    orchestrator: &mut Orchestrator,
    state: &Rc<RefCell<SocketState>>,
    job_id: JobId,
    event: crate::socket::SocketEvent,
) {
    let mut s = state.borrow_mut();
    if let Some(throttle) = s.throttle.as_mut() {
        throttle.on_raw_event(event);
        let ready: Vec<_> = throttle.take_events();
        drop(s);
        for event in ready {
            orchestrator.dispatch(job_id, DownloaderEvent::Socket(event));
        }
    } else {
        drop(s);
        orchestrator.dispatch(job_id, DownloaderEvent::Socket(event));
    }
}

type SocketTable = Rc<RefCell<HashMap<Token, Rc<RefCell<SocketState>>>>>;
// Keyed directly by `JobId` rather than a `Token`: unlike sockets, timers
// are never registered with `mio::Poll` (mio has no timer primitive), and
// a downloader owns exactly one timer handle for its whole lifetime.
type TimerTable = Rc<RefCell<HashMap<JobId, Rc<RefCell<TimerState>>>>>;

/// Builds downloaders wired to real `mio` sockets, reactor timers, and the
/// work pool's file I/O — the reactor's `DownloaderFactory` implementation.
pub struct ReactorDownloaderFactory {
    socket_factory: SocketFactory,
    pending_job: Rc<Cell<Option<JobId>>>,
    last_token: Rc<Cell<Option<Token>>>,
    sockets: SocketTable,
    timers: TimerTable,
    pool: Rc<WorkPool>,
    backlog: usize,
}

impl DownloaderFactory for ReactorDownloaderFactory {
    fn create(&self, job_id: JobId, task: &Task) -> Result<Downloader, EngineError> {
        self.pending_job.set(Some(job_id));
        let (socket, throttle) = self.socket_factory.create();
        if let Some(token) = self.last_token.take() {
            if let Some(state) = self.sockets.borrow().get(&token) {
                state.borrow_mut().throttle = throttle;
            }
        }

        let (timer_handle, timer_state) = MioTimer::new();
        self.timers.borrow_mut().insert(job_id, timer_state);

        let file = ThreadFileWriter::new(self.pool.clone(), job_id);
        let fs = ThreadFsRequest::new(self.pool.clone());

        let downloader = Downloader::new(
            job_id,
            task,
            socket,
            Box::new(timer_handle),
            Box::new(file),
            Box::new(fs),
            self.backlog,
        )?;

        self.pool.resolve(job_id, downloader.host().to_string(), downloader.port());
        Ok(downloader)
    }

    fn teardown(&self, job_id: JobId) {
        self.timers.borrow_mut().remove(&job_id);
        self.sockets.borrow_mut().retain(|_, state| state.borrow().job_id != Some(job_id));
    }
}

/// Owns the `mio::Poll` instance, the socket/timer lookup tables, and the
/// blocking work pool; drives an [`Orchestrator`] until every job (and
/// every redirect, and every refill from the task list) has finished.
pub struct Reactor {
    poll: Poll,
    sockets: SocketTable,
    timers: TimerTable,
    // Never read directly: keeps the work pool's threads alive for as long
    // as the reactor runs, alongside the clone held by the downloader
    // factory.
    pool: Rc<WorkPool>,
    completion_rx: crossbeam_channel::Receiver<Completion>,
    /// The bandwidth controller's own deferral timer (`DEFER_MS` retry on a
    /// zero-budget `schedule_transfer`), plus the controller itself so the
    /// loop can call `on_timer_fired` when it expires. `None` when the
    /// engine runs unthrottled.
    controller_timer: Option<(Rc<RefCell<TimerState>>, BandwidthController)>,
}

impl Reactor {
    /// Builds a reactor and its matching [`ReactorDownloaderFactory`].
    /// `raw_threads` sizes the work pool's DNS resolution concurrency; file
    /// I/O always runs on its own single dedicated thread so a slot's
    /// `Open`/`Write`/`Close` sequence can't complete out of order.
    /// `speed_limit` configures global bandwidth shaping, in bytes/sec, when
    /// `Some`.
    pub fn new(
        raw_threads: usize,
        backlog: usize,
        speed_limit: Option<u64>,
    ) -> std::io::Result<(Self, ReactorDownloaderFactory)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (pool, completion_rx) = WorkPool::new(raw_threads.max(1), waker);
        let pool = Rc::new(pool);

        let sockets: SocketTable = Rc::new(RefCell::new(HashMap::new()));
        let timers: TimerTable = Rc::new(RefCell::new(HashMap::new()));
        let next_token = Rc::new(Cell::new(FIRST_SOCKET_TOKEN));
        let pending_job = Rc::new(Cell::new(None));
        let last_token = Rc::new(Cell::new(None));

        let (controller, controller_timer) = match speed_limit {
            Some(limit) => {
                let (timer_handle, timer_state) = MioTimer::new();
                let controller =
                    BandwidthController::new(limit, Box::new(timer_handle), Box::new(SystemClock::new()));
                (Some(controller.clone()), Some((timer_state, controller)))
            }
            None => (None, None),
        };

        let raw = ReactorRawSocketFactory::new(
            poll.registry().try_clone()?,
            next_token.clone(),
            sockets.clone(),
            pending_job.clone(),
            last_token.clone(),
        );
        let socket_factory = SocketFactory::new(Box::new(raw), controller);

        let factory = ReactorDownloaderFactory {
            socket_factory,
            pending_job,
            last_token,
            sockets: sockets.clone(),
            timers: timers.clone(),
            pool: pool.clone(),
            backlog,
        };

        Ok((
            Self {
                poll,
                sockets,
                timers,
                pool,
                completion_rx,
                controller_timer,
            },
            factory,
        ))
    }

    /// Runs the loop until the orchestrator has no jobs in flight and no
    /// more tasks to start.
    pub fn run(&mut self, orchestrator: &mut Orchestrator) {
        let mut events = Events::with_capacity(1024);

        loop {
            self.drain_synthetic_socket_events(orchestrator);
            if orchestrator.job_count() == 0 {
                break;
            }

            let timeout = self.next_timer_deadline();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poll failed: {e}");
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }

                let maybe_socket = self.sockets.borrow().get(&token).cloned();
                if let Some(state) = maybe_socket {
                    let job_id = state.borrow().job_id;
                    if let Some(job_id) = job_id {
                        if let Some(socket_event) =
                            service_readiness(&state, event.is_readable(), event.is_writable())
                        {
                            dispatch_socket_event(orchestrator, &state, job_id, socket_event);
                        }
                    }
                }
            }

            self.fire_expired_timers(orchestrator);
            self.drain_completions(orchestrator);
        }
    }

    fn drain_synthetic_socket_events(&mut self, orchestrator: &mut Orchestrator) {
        let states: Vec<_> = self.sockets.borrow().values().cloned().collect();
        for state in states {
            let (job_id, drained) = {
                let mut s = state.borrow_mut();
                let job_id = s.job_id;
                let drained: Vec<_> = s.synthetic.drain(..).collect();
                (job_id, drained)
            };
            let Some(job_id) = job_id else { continue };
            for event in drained {
                dispatch_socket_event(orchestrator, &state, job_id, event);
            }
        }
    }

    fn next_timer_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        let controller_deadline = self
            .controller_timer
            .as_ref()
            .and_then(|(state, _)| state.borrow().deadline);
        self.timers
            .borrow()
            .values()
            .filter_map(|state| state.borrow().deadline)
            .chain(controller_deadline)
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
            .or(Some(Duration::from_millis(200)))
    }

    fn fire_expired_timers(&mut self, orchestrator: &mut Orchestrator) {
        let now = Instant::now();
        let mut fired = Vec::new();
        for (job_id, state) in self.timers.borrow().iter() {
            let mut ts = state.borrow_mut();
            if let Some(deadline) = ts.deadline {
                if deadline <= now {
                    if ts.repeat.is_zero() {
                        ts.deadline = None;
                    } else {
                        ts.deadline = Some(now + ts.repeat);
                    }
                    fired.push(*job_id);
                }
            }
        }
        for job_id in fired {
            orchestrator.dispatch(job_id, DownloaderEvent::TimerFired);
        }

        if let Some((state, controller)) = &self.controller_timer {
            let mut ts = state.borrow_mut();
            if let Some(deadline) = ts.deadline {
                if deadline <= now {
                    if ts.repeat.is_zero() {
                        ts.deadline = None;
                    } else {
                        ts.deadline = Some(now + ts.repeat);
                    }
                    drop(ts);
                    controller.on_timer_fired();
                }
            }
        }
    }

    fn drain_completions(&mut self, orchestrator: &mut Orchestrator) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion {
                Completion::Resolved { job_id, ip } => {
                    orchestrator.dispatch(job_id, DownloaderEvent::Resolved(ip));
                }
                Completion::ResolveFailed { job_id, detail } => {
                    orchestrator.dispatch(job_id, DownloaderEvent::ResolveFailed(detail));
                }
                Completion::File { job_id, event } => {
                    orchestrator.dispatch(job_id, DownloaderEvent::File(event));
                }
            }
        }
    }
}
