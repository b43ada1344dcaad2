//! Fixed-size helper thread pool for the blocking operations the event
//! loop can't do on its own thread: DNS resolution and file I/O.
//!
//! Mirrors the teacher's `worker`/`listener` pairing — a `Sender`/`Receiver`
//! handoff plus a shared `mio::Waker` so the loop thread wakes promptly
//! once a completion is queued — except here the "connections" are one-shot
//! jobs instead of long-lived sockets.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::net::{IpAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::Waker;

use crate::file::{FileEvent, CREATE_MODE};
use crate::job::JobId;

/// Opaque handle correlating a `FileOpen`/`FileWrite`/`FileClose` sequence
/// to the same open file descriptor across worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSlot(pub usize);

#[derive(Debug)]
pub enum ResolveJob {
    Resolve { job_id: JobId, host: String, port: u16 },
}

#[derive(Debug)]
pub enum FileJob {
    Open { job_id: JobId, slot: FileSlot, path: PathBuf },
    Write { job_id: JobId, slot: FileSlot, buf: Vec<u8>, len: u32, offset: u64 },
    Close { job_id: JobId, slot: FileSlot },
    Unlink { path: PathBuf },
}

#[derive(Debug)]
pub enum Completion {
    Resolved { job_id: JobId, ip: IpAddr },
    ResolveFailed { job_id: JobId, detail: String },
    File { job_id: JobId, event: FileEvent },
}

/// Spawns `resolve_threads` worker threads sharing one resolve queue, plus
/// exactly one dedicated file-I/O thread. DNS lookups for different jobs are
/// independent and safe to run concurrently, but a single `FileSlot`'s
/// `Open` -> `Write`* -> `Close` sequence is not: spreading it across
/// multiple threads (as an earlier version of this pool did) only guarantees
/// the jobs are *dequeued* in submission order, not that they *finish*
/// executing in that order, so a `Close` queued right after a `Write` could
/// run first on a thread that happened to be free. One thread servicing
/// `file_rx` makes queue order and completion order the same thing. File ops
/// still share a single `Mutex`-guarded handle table rather than per-slot
/// state, since destination files are written to one at a time anyway
/// (§4.3).
pub struct WorkPool {
    resolve_tx: Sender<ResolveJob>,
    file_tx: Sender<FileJob>,
    handles: Vec<JoinHandle<()>>,
    next_slot: std::sync::atomic::AtomicUsize,
}

impl WorkPool {
    pub fn new(resolve_threads: usize, waker: Arc<Waker>) -> (Self, Receiver<Completion>) {
        let (resolve_tx, resolve_rx) = unbounded::<ResolveJob>();
        let (file_tx, file_rx) = unbounded::<FileJob>();
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let files: Arc<Mutex<HashMap<FileSlot, File>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut handles = Vec::with_capacity(resolve_threads.max(1) + 1);
        for _ in 0..resolve_threads.max(1) {
            let resolve_rx = resolve_rx.clone();
            let completion_tx = completion_tx.clone();
            let waker = waker.clone();
            handles.push(std::thread::spawn(move || {
                resolve_worker(resolve_rx, completion_tx, waker);
            }));
        }

        handles.push(std::thread::spawn(move || {
            file_worker(file_rx, completion_tx, waker, files);
        }));

        (
            Self {
                resolve_tx,
                file_tx,
                handles,
                next_slot: std::sync::atomic::AtomicUsize::new(0),
            },
            completion_rx,
        )
    }

    pub fn allocate_slot(&self) -> FileSlot {
        FileSlot(self.next_slot.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    pub fn resolve(&self, job_id: JobId, host: String, port: u16) {
        let _ = self.resolve_tx.send(ResolveJob::Resolve { job_id, host, port });
    }

    pub fn submit_file(&self, job: FileJob) {
        let _ = self.file_tx.send(job);
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        // Closing both senders lets every worker's `recv` loop end once its
        // queues drain; `join` then can't block forever.
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn resolve_worker(resolve_rx: Receiver<ResolveJob>, completion_tx: Sender<Completion>, waker: Arc<Waker>) {
    while let Ok(ResolveJob::Resolve { job_id, host, port }) = resolve_rx.recv() {
        let completion = resolve_one(job_id, &host, port);
        let _ = completion_tx.send(completion);
        let _ = waker.wake();
    }
}

fn file_worker(
    file_rx: Receiver<FileJob>,
    completion_tx: Sender<Completion>,
    waker: Arc<Waker>,
    files: Arc<Mutex<HashMap<FileSlot, File>>>,
) {
    while let Ok(job) = file_rx.recv() {
        if let Some((job_id, event)) = run_file_job(job, &files) {
            let _ = completion_tx.send(Completion::File { job_id, event });
            let _ = waker.wake();
        }
    }
}

fn resolve_one(job_id: JobId, host: &str, port: u16) -> Completion {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => Completion::Resolved { job_id, ip: addr.ip() },
            None => Completion::ResolveFailed {
                job_id,
                detail: format!("no addresses for {host}"),
            },
        },
        Err(e) => Completion::ResolveFailed {
            job_id,
            detail: e.to_string(),
        },
    }
}

/// Returns `None` for [`FileJob::Unlink`], which has no completion event
/// (`FsRequest::unlink` is best-effort and fire-and-forget, §6).
fn run_file_job(job: FileJob, files: &Arc<Mutex<HashMap<FileSlot, File>>>) -> Option<(JobId, FileEvent)> {
    match job {
        FileJob::Open { job_id, slot, path } => {
            let result = OpenOptions::new()
                .create_new(true)
                .write(true)
                .mode_or_default(CREATE_MODE)
                .open(&path);
            match result {
                Ok(file) => {
                    files.lock().unwrap().insert(slot, file);
                    Some((job_id, FileEvent::Open))
                }
                Err(e) => {
                    let already_exists = e.kind() == std::io::ErrorKind::AlreadyExists;
                    Some((
                        job_id,
                        FileEvent::Error {
                            already_exists,
                            description: e.to_string(),
                        },
                    ))
                }
            }
        }
        FileJob::Write { job_id, slot, buf, len, offset } => {
            let mut guard = files.lock().unwrap();
            let Some(file) = guard.get_mut(&slot) else {
                return Some((
                    job_id,
                    FileEvent::Error {
                        already_exists: false,
                        description: "write on unopened file slot".to_string(),
                    },
                ));
            };
            let write_result = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write(&buf[..len as usize]));
            match write_result {
                Ok(n) => Some((job_id, FileEvent::Write(n as u32))),
                Err(e) => Some((
                    job_id,
                    FileEvent::Error {
                        already_exists: false,
                        description: e.to_string(),
                    },
                )),
            }
        }
        FileJob::Close { job_id, slot } => {
            let file = files.lock().unwrap().remove(&slot);
            match file {
                Some(file) => match file.sync_all() {
                    Ok(()) => Some((job_id, FileEvent::Close)),
                    Err(e) => Some((
                        job_id,
                        FileEvent::Error {
                            already_exists: false,
                            description: e.to_string(),
                        },
                    )),
                },
                None => Some((job_id, FileEvent::Close)),
            }
        }
        FileJob::Unlink { path } => {
            let _ = std::fs::remove_file(path);
            None
        }
    }
}

/// Extension trait so `OpenOptions` can take a Unix mode bit without
/// pulling in a `#[cfg(unix)]` split for this one call site.
trait OpenOptionsModeExt {
    fn mode_or_default(self, mode: u32) -> Self;
}

#[cfg(unix)]
impl OpenOptionsModeExt for OpenOptions {
    fn mode_or_default(mut self, mode: u32) -> Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(mode);
        self
    }
}

#[cfg(not(unix))]
impl OpenOptionsModeExt for OpenOptions {
    fn mode_or_default(self, _mode: u32) -> Self {
        self
    }
}
