//! Job and DownloadStatus data model (§3).

use crate::task::Task;

/// Stable, process-unique job identifier. Ids are assigned monotonically
/// and never reused within a process lifetime (property 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

/// Monotonically assigns [`JobId`]s.
#[derive(Debug, Default)]
pub struct JobIdAllocator {
    next: u64,
}

impl JobIdAllocator {
    /// Creates an allocator starting at id 0.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next id and advances the counter.
    pub fn allocate(&mut self) -> JobId {
        let id = JobId(self.next);
        self.next += 1;
        id
    }
}

/// A download's current state, as observed by the dashboard and the
/// orchestrator's on-tick dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet driven by the event loop.
    Init,
    /// Actively resolving/connecting/writing/reading.
    InFlight,
    /// Completed successfully.
    Done,
    /// Terminated with an error.
    Failed,
    /// The response was a redirect; `target` on [`DownloadStatus`] names
    /// the new location.
    Redirect,
}

/// A point-in-time snapshot of a job's progress, owned and mutated only by
/// its downloader.
#[derive(Debug, Clone)]
pub struct DownloadStatus {
    /// Bytes successfully written to disk so far. Monotonic non-decreasing
    /// (property 1).
    pub downloaded: u64,
    /// `Content-Length` reported by the server, or `0` if unknown.
    pub expected_size: u64,
    /// Current lifecycle state.
    pub state: State,
    /// Human-readable detail (e.g. an error message, or "connecting").
    pub detail: String,
    /// Redirect target, set only when `state == State::Redirect`.
    pub target: Option<String>,
}

impl DownloadStatus {
    /// The initial status for a newly constructed downloader.
    pub fn init() -> Self {
        Self {
            downloaded: 0,
            expected_size: 0,
            state: State::Init,
            detail: String::new(),
            target: None,
        }
    }

    /// Transitions to `InFlight` with a phase description.
    pub fn in_flight(&mut self, detail: impl Into<String>) {
        self.state = State::InFlight;
        self.detail = detail.into();
    }

    /// Transitions to `Done`.
    pub fn done(&mut self) {
        self.state = State::Done;
        self.detail = "done".to_string();
    }

    /// Transitions to `Failed` with a human-readable reason.
    pub fn failed(&mut self, detail: impl Into<String>) {
        self.state = State::Failed;
        self.detail = detail.into();
    }

    /// Transitions to `Redirect` with the new target URI.
    pub fn redirect(&mut self, target: String) {
        self.state = State::Redirect;
        self.target = Some(target);
    }

    /// Records `n` newly-written bytes.
    pub fn record_downloaded(&mut self, n: u64) {
        self.downloaded += n;
    }

    /// `true` once the job has reached one of the terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Done | State::Failed | State::Redirect)
    }
}

/// A unit of work in flight: a [`Task`], its redirect counter, and (owned
/// by the caller, not stored here — see `orchestrator`) its downloader.
///
/// Invariant: at most one downloader is ever bound to a job at a time; the
/// job's id never changes across redirects.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable identifier, assigned once at job creation.
    pub id: JobId,
    /// The task currently being pursued (updated in place on redirect).
    pub task: Task,
    /// Number of redirects followed so far.
    pub redirect_count: u32,
}

impl Job {
    /// Creates a new job for `task` with the given `id` and a zeroed
    /// redirect counter.
    pub fn new(id: JobId, task: Task) -> Self {
        Self {
            id,
            task,
            redirect_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut alloc = JobIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn status_transitions_set_terminal_flag() {
        let mut status = DownloadStatus::init();
        assert!(!status.is_terminal());
        status.in_flight("connecting");
        assert!(!status.is_terminal());
        status.done();
        assert!(status.is_terminal());
    }

    #[test]
    fn downloaded_is_monotonic_via_record() {
        let mut status = DownloadStatus::init();
        status.record_downloaded(5);
        status.record_downloaded(7);
        assert_eq!(status.downloaded, 12);
    }

    #[test]
    fn job_new_starts_with_zero_redirects() {
        let job = Job::new(
            JobId(0),
            Task {
                uri: "http://h/x".into(),
                fname: PathBuf::from("x.bin"),
            },
        );
        assert_eq!(job.redirect_count, 0);
    }
}
