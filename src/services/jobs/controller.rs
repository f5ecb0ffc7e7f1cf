//! Job lifecycle control.
//!
//! ```text
//! pending --> processing --> completed
//!                |              |
//!                +--> failed    +--> (terminal)
//!                +--> cancelled
//! ```
//!
//! The controller owns every transition. It holds no lock across I/O;
//! each transition is one compare-and-set write through the repository.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::models::{GenerationPreferences, PodcastJob, RequestKind, UserTier};
use crate::services::cancel::{CancelHandle, CancelToken};
use crate::services::jobs::JobRepository;
use crate::services::orchestrator::{GatherRequest, Orchestrator, ProgressSink};
use crate::services::sources::SourceError;
use crate::utils::{ApiError, ApiResult};

pub struct JobController {
    repo: JobRepository,
    orchestrator: Arc<Orchestrator>,
    deadline: Duration,
    cancels: DashMap<String, CancelHandle>,
}

impl JobController {
    pub fn new(repo: JobRepository, orchestrator: Arc<Orchestrator>, deadline: Duration) -> Self {
        Self { repo, orchestrator, deadline, cancels: DashMap::new() }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repo
    }

    pub async fn create(
        &self,
        owner_id: i64,
        query: &str,
        kind: RequestKind,
        preferences: Option<&GenerationPreferences>,
    ) -> ApiResult<PodcastJob> {
        let job = self.repo.create(owner_id, query, kind, preferences).await?;
        tracing::info!("Job {} created for owner {} ({})", job.id, owner_id, kind.as_str());
        Ok(job)
    }

    /// pending -> processing, then run the gather as a detached task.
    /// Starting a job that is not pending is a no-op.
    pub async fn start(self: &Arc<Self>, job_id: &str, tier: UserTier) -> ApiResult<()> {
        if !self.repo.try_start(job_id).await? {
            tracing::debug!("Job {} not pending, start is a no-op", job_id);
            return Ok(());
        }

        let job = self
            .repo
            .get_any(job_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Job vanished after start"))?;

        let (handle, token) = CancelToken::new_pair();
        self.cancels.insert(job.id.clone(), handle);

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.run_job(job, tier, token).await;
        });

        Ok(())
    }

    /// processing -> cancelled; the running task observes the token at its
    /// next suspension point.
    pub async fn cancel(&self, job_id: &str, owner_id: i64) -> ApiResult<bool> {
        let Some(job) = self.repo.get(job_id, owner_id).await? else {
            return Err(ApiError::not_found("Podcast not found"));
        };

        if job.status_enum().is_terminal() {
            return Ok(false);
        }

        let transitioned = self.repo.mark_cancelled(job_id).await?;
        if let Some((_, handle)) = self.cancels.remove(job_id) {
            handle.cancel();
        }
        if transitioned {
            tracing::info!("Job {} cancelled by owner {}", job_id, owner_id);
        }
        Ok(transitioned)
    }

    async fn run_job(&self, job: PodcastJob, tier: UserTier, cancel: CancelToken) {
        let request = GatherRequest {
            query: job.query_text.clone(),
            kind: job.kind_enum(),
            owner: Some(job.owner_id),
            tier,
            preferences: job.preferences(),
        };

        let progress = JobProgress {
            repo: self.repo.clone(),
            job_id: job.id.clone(),
            last: AtomicU8::new(0),
        };

        let outcome = tokio::time::timeout(
            self.deadline,
            self.orchestrator.gather(&request, &cancel, &progress),
        )
        .await;

        let transition = match outcome {
            Err(_) => {
                tracing::warn!("Job {} exceeded the {}s deadline", job.id, self.deadline.as_secs());
                self.repo
                    .set_error(&job.id, "Generation exceeded the allowed time")
                    .await
            },
            Ok(Ok(gathered)) => {
                match serde_json::to_string(&gathered) {
                    Ok(json) => self.repo.set_result(&job.id, &json).await,
                    Err(e) => {
                        tracing::error!("Job {} result serialization failed: {}", job.id, e);
                        self.repo
                            .set_error(&job.id, "Internal error while persisting the result")
                            .await
                    },
                }
            },
            Ok(Err(SourceError::Cancelled)) => self.repo.mark_cancelled(&job.id).await,
            Ok(Err(SourceError::NoSourcesAvailable)) => {
                self.repo
                    .set_error(&job.id, "No content sources were available for this query")
                    .await
            },
            Ok(Err(err)) => {
                tracing::error!("Job {} failed: {}", job.id, err);
                self.repo
                    .set_error(&job.id, "Content gathering failed unexpectedly")
                    .await
            },
        };

        if let Err(e) = transition {
            tracing::error!("Job {} final transition failed: {}", job.id, e);
        }

        self.cancels.remove(&job.id);

        match self.repo.get_any(&job.id).await {
            Ok(Some(finished)) => {
                tracing::info!("Job {} finished with status {}", job.id, finished.status);
            },
            _ => tracing::warn!("Job {} finished but could not be re-read", job.id),
        }
    }
}

/// Persists checkpoint percentages; never lets them go backwards even if
/// reports race.
struct JobProgress {
    repo: JobRepository,
    job_id: String,
    last: AtomicU8,
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, pct: u8) {
        let previous = self.last.fetch_max(pct, Ordering::Relaxed);
        if pct <= previous {
            return;
        }
        if let Err(e) = self.repo.update_progress(&self.job_id, pct).await {
            tracing::warn!("Progress write failed for job {}: {}", self.job_id, e);
        }
    }
}
