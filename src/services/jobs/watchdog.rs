//! Fails jobs stuck in `processing` past the per-job deadline, covering
//! tasks that died without writing a terminal transition.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::services::jobs::JobRepository;

pub struct JobWatchdog {
    repo: JobRepository,
    deadline: Duration,
    every: Duration,
}

impl JobWatchdog {
    pub fn new(repo: JobRepository, deadline: Duration, every: Duration) -> Self {
        Self { repo, deadline, every }
    }

    /// Sweep on a fixed wall-clock cadence for the process lifetime.
    /// A slow sweep does not push later ticks back; ticks that fall due
    /// while a sweep is still running are skipped, not bursted.
    pub async fn run(self) {
        tracing::info!("Job watchdog sweeping every {}s", self.every.as_secs());

        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {},
                Ok(failed) => tracing::warn!("Watchdog failed {} stuck job(s)", failed),
                Err(e) => tracing::error!("Watchdog sweep failed: {}", e),
            }
        }
    }

    /// One pass over the job table. Returns how many jobs were failed.
    pub async fn sweep(&self) -> Result<u64, sqlx::Error> {
        // Grace on top of the deadline so the controller's own timeout
        // handling always wins while the task is still alive
        let grace = self.deadline + self.deadline / 2;
        let cutoff = Utc::now()
            - ChronoDuration::from_std(grace).unwrap_or_else(|_| ChronoDuration::seconds(900));

        self.repo.fail_stale(cutoff).await
    }
}
