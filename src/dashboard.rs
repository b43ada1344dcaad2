//! Dashboard sink (component N): renders `DownloadStatus` transitions.
//!
//! Not part of THE CORE (§1) — the orchestrator only needs something that
//! implements `update`, so tests wire in [`NullDashboard`] instead of paying
//! for log formatting.

use crate::job::{DownloadStatus, JobId};

/// Receives one `update` call per terminal job transition.
pub trait Dashboard {
    fn update(&mut self, job_id: JobId, status: &DownloadStatus);
}

/// Logs a one-line summary per transition via the `log` facade.
#[derive(Debug, Default)]
pub struct ConsoleDashboard;

impl ConsoleDashboard {
    pub fn new() -> Self {
        Self
    }
}

impl Dashboard for ConsoleDashboard {
    fn update(&mut self, job_id: JobId, status: &DownloadStatus) {
        use crate::job::State;
        match status.state {
            State::Done => log::info!(
                "job {}: done, {} bytes written",
                job_id.0,
                status.downloaded
            ),
            State::Failed => log::warn!("job {}: failed — {}", job_id.0, status.detail),
            State::Redirect => log::debug!(
                "job {}: redirected to {}",
                job_id.0,
                status.target.as_deref().unwrap_or("?")
            ),
            State::Init | State::InFlight => {
                log::debug!("job {}: {}", job_id.0, status.detail)
            }
        }
    }
}

/// Discards every update. Used by tests that only care about orchestrator
/// bookkeeping.
#[derive(Debug, Default)]
pub struct NullDashboard {
    updates: Vec<(JobId, DownloadStatus)>,
}

impl NullDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> &[(JobId, DownloadStatus)] {
        &self.updates
    }
}

impl Dashboard for NullDashboard {
    fn update(&mut self, job_id: JobId, status: &DownloadStatus) {
        self.updates.push((job_id, status.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::State;

    #[test]
    fn null_dashboard_records_every_update() {
        let mut dash = NullDashboard::new();
        let mut status = DownloadStatus::init();
        status.done();
        dash.update(JobId(1), &status);
        assert_eq!(dash.updates().len(), 1);
        assert_eq!(dash.updates()[0].1.state, State::Done);
    }
}
