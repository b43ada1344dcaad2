//! Concrete `FileWriter`/`FsRequest` that hand blocking filesystem calls off
//! to the reactor's `WorkPool` instead of doing them on the loop thread.

use std::path::PathBuf;
use std::rc::Rc;

use crate::file::{FileWriter, FsRequest};
use crate::job::JobId;

use super::workpool::{FileJob, FileSlot, WorkPool};

pub struct ThreadFileWriter {
    pool: Rc<WorkPool>,
    job_id: JobId,
    slot: FileSlot,
}

impl ThreadFileWriter {
    pub(crate) fn new(pool: Rc<WorkPool>, job_id: JobId) -> Self {
        let slot = pool.allocate_slot();
        Self { pool, job_id, slot }
    }
}

impl FileWriter for ThreadFileWriter {
    fn open(&mut self, path: PathBuf) {
        self.pool.submit_file(FileJob::Open {
            job_id: self.job_id,
            slot: self.slot,
            path,
        });
    }

    fn write(&mut self, buf: Vec<u8>, len: u32, offset: u64) {
        self.pool.submit_file(FileJob::Write {
            job_id: self.job_id,
            slot: self.slot,
            buf,
            len,
            offset,
        });
    }

    fn close(&mut self) {
        self.pool.submit_file(FileJob::Close {
            job_id: self.job_id,
            slot: self.slot,
        });
    }

    fn cancel(&mut self) {
        // No explicit in-flight cancellation: the work pool runs all file
        // jobs on one dedicated thread (see `WorkPool::new`), so the
        // `Open`/`Write` already queued for this slot finishes before the
        // `Close` that `enter_closing` queues right after this call ever
        // starts. A stray completion for an already-torn-down job is
        // ignored by the orchestrator (`dispatch` on an unknown job id logs
        // and returns).
    }
}

pub struct ThreadFsRequest {
    pool: Rc<WorkPool>,
}

impl ThreadFsRequest {
    pub(crate) fn new(pool: Rc<WorkPool>) -> Self {
        Self { pool }
    }
}

impl FsRequest for ThreadFsRequest {
    fn unlink(&mut self, path: PathBuf) {
        self.pool.submit_file(FileJob::Unlink { path });
    }
}
