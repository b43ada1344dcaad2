//! Job orchestrator (component K, §4.7): keeps the concurrency pool full,
//! follows redirects up to a bound, and reports every terminal transition
//! to the dashboard.

use std::collections::HashMap;
use std::rc::Weak;

use slab::Slab;

use crate::dashboard::Dashboard;
use crate::downloader::{Downloader, DownloaderEvent};
use crate::error::EngineError;
use crate::job::{Job, JobId, JobIdAllocator, State};
use crate::task::{Task, TaskList};

/// Builds a [`Downloader`] bound to `job_id` for `task`. Implemented by the
/// reactor, which supplies the concrete socket/timer/file triple.
pub trait DownloaderFactory {
    fn create(&self, job_id: JobId, task: &Task) -> Result<Downloader, EngineError>;

    /// Called once a job's downloader has reached a terminal state and is
    /// about to be dropped, so the factory can release any per-job state it
    /// keyed off `job_id` (the reactor's socket/timer lookup tables — see
    /// `ReactorDownloaderFactory`). Default no-op for factories that don't
    /// keep such state (e.g. tests).
    fn teardown(&self, _job_id: JobId) {}
}

struct JobEntry {
    job: Job,
    downloader: Downloader,
}

/// Keeps up to `concurrency` downloaders alive, refilling from the task
/// list as jobs finish and replacing a job's downloader (while preserving
/// its id) when it redirects.
pub struct Orchestrator {
    jobs: Slab<JobEntry>,
    index: HashMap<JobId, usize>,
    ids: JobIdAllocator,
    factory: Weak<dyn DownloaderFactory>,
    tasks: TaskList,
    dashboard: Box<dyn Dashboard>,
    max_redirect: u32,
}

impl Orchestrator {
    pub fn new(
        factory: Weak<dyn DownloaderFactory>,
        tasks: TaskList,
        dashboard: Box<dyn Dashboard>,
        max_redirect: u32,
    ) -> Self {
        Self {
            jobs: Slab::new(),
            index: HashMap::new(),
            ids: JobIdAllocator::new(),
            factory,
            tasks,
            dashboard,
            max_redirect,
        }
    }

    /// Number of jobs currently in flight.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Fills the concurrency pool up to `concurrency` jobs, pulling tasks
    /// until either the pool is full or the task list is exhausted.
    pub fn prime(&mut self, concurrency: usize) {
        while self.jobs.len() < concurrency {
            if !self.start_next() {
                break;
            }
        }
    }

    /// Routes `event` to the job identified by `job_id`. Unknown ids are
    /// logged and dropped — the job may have just been torn down.
    pub fn dispatch(&mut self, job_id: JobId, event: DownloaderEvent) {
        let Some(&key) = self.index.get(&job_id) else {
            log::warn!("event for unknown or already-finished job {}", job_id.0);
            return;
        };

        let terminal = self.jobs[key].downloader.on_event(event);
        if terminal {
            self.finish(job_id, key);
        }
    }

    /// Requests an in-flight job stop; acts exactly like any other failure
    /// path once the downloader confirms teardown.
    pub fn stop_job(&mut self, job_id: JobId) {
        let Some(&key) = self.index.get(&job_id) else {
            return;
        };
        if self.jobs[key].downloader.stop() {
            self.finish(job_id, key);
        }
    }

    /// Tries the next task in the list, skipping any that fail to
    /// construct a downloader, until one succeeds or the list is
    /// exhausted. Returns whether a new job was started.
    fn start_next(&mut self) -> bool {
        let Some(factory) = self.factory.upgrade() else {
            return false;
        };

        for task in self.tasks.by_ref() {
            let id = self.ids.allocate();
            match factory.create(id, &task) {
                Ok(downloader) => {
                    let key = self.jobs.insert(JobEntry {
                        job: Job::new(id, task),
                        downloader,
                    });
                    self.index.insert(id, key);
                    return true;
                }
                Err(e) => {
                    log::warn!("skipping task, could not start downloader: {e}");
                }
            }
        }
        false
    }

    fn finish(&mut self, job_id: JobId, key: usize) {
        let entry = self.jobs.remove(key);
        self.index.remove(&job_id);

        // The downloader just torn down reached a terminal `on_event`/`stop`
        // transition, so whatever socket/timer the factory wired up for it
        // is done too — even on a redirect, where a fresh downloader gets a
        // fresh socket under the same job id. Tear down before `redirect`
        // below might create that replacement.
        if let Some(factory) = self.factory.upgrade() {
            factory.teardown(job_id);
        }

        let status = entry.downloader.status().clone();
        self.dashboard.update(job_id, &status);

        match status.state {
            State::Done | State::Failed => {
                self.start_next();
            }
            State::Redirect => {
                let target = status.target.clone().expect("Redirect status always carries a target");
                self.redirect(entry.job, target);
            }
            State::Init | State::InFlight => {
                unreachable!("on_event only returns true on a terminal transition")
            }
        }
    }

    fn redirect(&mut self, mut job: Job, target: String) {
        job.redirect_count += 1;
        if job.redirect_count > self.max_redirect {
            self.start_next();
            return;
        }

        let Some(factory) = self.factory.upgrade() else {
            return;
        };

        let new_task = job.task.with_redirect_uri(target);
        match factory.create(job.id, &new_task) {
            Ok(downloader) => {
                job.task = new_task;
                let id = job.id;
                let key = self.jobs.insert(JobEntry { job, downloader });
                self.index.insert(id, key);
            }
            Err(e) => {
                log::warn!("redirect target could not start a downloader: {e}");
                self.start_next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::NullDashboard;
    use crate::file::{FileEvent, FileWriter, FsRequest};
    use crate::mocks::{MockFileWriter, MockFsRequest, MockSocket, MockTimer};
    use crate::socket::{SocketEvent, TcpSocket};
    use crate::timer::Timer;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use std::rc::Rc;

    /// Builds a `Downloader` per task using fresh, unshared mocks — enough
    /// to drive the orchestrator's bookkeeping without inspecting socket
    /// traffic (that's covered in `downloader`'s own tests).
    struct MockFactory {
        fail_uris: Vec<String>,
    }

    impl DownloaderFactory for MockFactory {
        fn create(&self, job_id: JobId, task: &Task) -> Result<Downloader, EngineError> {
            if self.fail_uris.iter().any(|u| u == &task.uri) {
                return Err(EngineError::Connect("refused by test".into()));
            }
            Downloader::new(
                job_id,
                task,
                Box::new(MockSocket::new()) as Box<dyn TcpSocket>,
                Box::new(MockTimer::new()) as Box<dyn Timer>,
                Box::new(MockFileWriter::new()) as Box<dyn FileWriter>,
                Box::new(MockFsRequest::new()) as Box<dyn FsRequest>,
                4,
            )
        }
    }

    fn tasks(uris: &[&str]) -> TaskList {
        let body: String = uris.iter().map(|u| format!("{u} out.bin\n")).collect();
        TaskList::from_str(&body, "/out")
    }

    fn drive_to_done(orch: &mut Orchestrator, job_id: JobId) {
        orch.dispatch(job_id, DownloaderEvent::Resolved(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Connect));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Write));
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec();
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Data(raw)));
        orch.dispatch(job_id, DownloaderEvent::File(FileEvent::Open));
        orch.dispatch(job_id, DownloaderEvent::File(FileEvent::Write(2)));
        orch.dispatch(job_id, DownloaderEvent::File(FileEvent::Close));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Close));
    }

    #[test]
    fn prime_fills_pool_up_to_concurrency() {
        let factory: Rc<dyn DownloaderFactory> = Rc::new(MockFactory { fail_uris: vec![] });
        let mut orch = Orchestrator::new(
            Rc::downgrade(&factory),
            tasks(&["http://h/a", "http://h/b", "http://h/c"]),
            Box::new(NullDashboard::new()),
            5,
        );
        orch.prime(2);
        assert_eq!(orch.job_count(), 2);
    }

    #[test]
    fn done_refills_from_task_list() {
        let factory: Rc<dyn DownloaderFactory> = Rc::new(MockFactory { fail_uris: vec![] });
        let mut orch = Orchestrator::new(
            Rc::downgrade(&factory),
            tasks(&["http://h/a", "http://h/b"]),
            Box::new(NullDashboard::new()),
            5,
        );
        orch.prime(1);
        assert_eq!(orch.job_count(), 1);
        let (job_id, _) = orch.index.iter().map(|(&k, &v)| (k, v)).next().unwrap();

        drive_to_done(&mut orch, job_id);
        assert_eq!(orch.job_count(), 1, "next task should have refilled the slot");
    }

    #[test]
    fn redirect_preserves_job_id_and_bumps_count() {
        let factory: Rc<dyn DownloaderFactory> = Rc::new(MockFactory { fail_uris: vec![] });
        let mut orch = Orchestrator::new(
            Rc::downgrade(&factory),
            tasks(&["http://h/a"]),
            Box::new(NullDashboard::new()),
            5,
        );
        orch.prime(1);
        let job_id = *orch.index.keys().next().unwrap();

        orch.dispatch(job_id, DownloaderEvent::Resolved(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Connect));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Write));
        let raw = b"HTTP/1.1 302 Found\r\nLocation: http://h/y\r\n\r\n".to_vec();
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Data(raw)));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Close));

        assert_eq!(orch.job_count(), 1);
        assert!(orch.index.contains_key(&job_id), "job id must survive the redirect");
        assert_eq!(orch.jobs[orch.index[&job_id]].job.redirect_count, 1);
    }

    #[test]
    fn redirect_past_max_falls_through_to_next_task() {
        let factory: Rc<dyn DownloaderFactory> = Rc::new(MockFactory { fail_uris: vec![] });
        let mut orch = Orchestrator::new(
            Rc::downgrade(&factory),
            tasks(&["http://h/a"]),
            Box::new(NullDashboard::new()),
            0,
        );
        orch.prime(1);
        let job_id = *orch.index.keys().next().unwrap();

        orch.dispatch(job_id, DownloaderEvent::Resolved(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Connect));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Write));
        let raw = b"HTTP/1.1 302 Found\r\nLocation: http://h/y\r\n\r\n".to_vec();
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Data(raw)));
        orch.dispatch(job_id, DownloaderEvent::Socket(SocketEvent::Close));

        assert_eq!(orch.job_count(), 0, "no more tasks to fall through to");
    }

    #[test]
    fn failing_factory_is_skipped_in_favor_of_next_task() {
        let factory: Rc<dyn DownloaderFactory> = Rc::new(MockFactory {
            fail_uris: vec!["http://h/a".to_string()],
        });
        let mut orch = Orchestrator::new(
            Rc::downgrade(&factory),
            tasks(&["http://h/a", "http://h/b"]),
            Box::new(NullDashboard::new()),
            5,
        );
        orch.prime(1);
        assert_eq!(orch.job_count(), 1);
        let job_id = *orch.index.keys().next().unwrap();
        assert_eq!(orch.jobs[orch.index[&job_id]].job.task.uri, "http://h/b");
    }

    #[test]
    fn dead_factory_stops_refilling_gracefully() {
        let factory = Rc::new(MockFactory { fail_uris: vec![] });
        let weak: Weak<dyn DownloaderFactory> = Rc::downgrade(&(factory.clone() as Rc<dyn DownloaderFactory>));
        let mut orch = Orchestrator::new(weak, tasks(&["http://h/a", "http://h/b"]), Box::new(NullDashboard::new()), 5);
        orch.prime(1);
        let job_id = *orch.index.keys().next().unwrap();
        drop(factory);

        drive_to_done(&mut orch, job_id);
        assert_eq!(orch.job_count(), 0, "a dead factory must not panic, just stop refilling");
    }
}
