//! Job persistence. One write per state transition, every transition a
//! compare-and-set so terminal rows can never be resurrected.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{GenerationPreferences, JobStatus, PodcastJob, RequestKind};

#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        owner_id: i64,
        query: &str,
        kind: RequestKind,
        preferences: Option<&GenerationPreferences>,
    ) -> Result<PodcastJob, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let preferences_json =
            preferences.and_then(|p| serde_json::to_string(p).ok());

        sqlx::query(
            r#"INSERT INTO podcast_jobs
               (id, owner_id, query_text, request_kind, preferences_json, status, progress,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(query)
        .bind(kind.as_str())
        .bind(&preferences_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_any(&id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get(&self, id: &str, owner_id: i64) -> Result<Option<PodcastJob>, sqlx::Error> {
        sqlx::query_as::<_, PodcastJob>(
            "SELECT * FROM podcast_jobs WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_any(&self, id: &str) -> Result<Option<PodcastJob>, sqlx::Error> {
        sqlx::query_as::<_, PodcastJob>("SELECT * FROM podcast_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// pending -> processing. Returns false when the job was not pending,
    /// which makes a second `start` a no-op.
    pub async fn try_start(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE podcast_jobs SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Monotonic progress: writes only while processing and only upward.
    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE podcast_jobs SET progress = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing' AND progress < ?",
        )
        .bind(progress.min(100) as i64)
        .bind(Utc::now())
        .bind(id)
        .bind(progress.min(100) as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// processing -> completed with the ranked artifact.
    pub async fn set_result(&self, id: &str, result_json: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE podcast_jobs SET status = 'completed', result_json = ?, progress = 100, \
             completed_at = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(result_json)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// processing -> failed with a sanitized message.
    pub async fn set_error(&self, id: &str, message: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE podcast_jobs SET status = 'failed', error_message = ?, completed_at = ?, \
             updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// pending|processing -> cancelled.
    pub async fn mark_cancelled(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE podcast_jobs SET status = 'cancelled', completed_at = ?, updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_by_owner(
        &self,
        owner_id: i64,
        skip: i64,
        limit: i64,
        status_filter: Option<JobStatus>,
    ) -> Result<Vec<PodcastJob>, sqlx::Error> {
        match status_filter {
            Some(status) => {
                sqlx::query_as::<_, PodcastJob>(
                    "SELECT * FROM podcast_jobs WHERE owner_id = ? AND status = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(owner_id)
                .bind(status.as_str())
                .bind(limit)
                .bind(skip)
                .fetch_all(&self.pool)
                .await
            },
            None => {
                sqlx::query_as::<_, PodcastJob>(
                    "SELECT * FROM podcast_jobs WHERE owner_id = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(owner_id)
                .bind(limit)
                .bind(skip)
                .fetch_all(&self.pool)
                .await
            },
        }
    }

    pub async fn count_by_owner(
        &self,
        owner_id: i64,
        status_filter: Option<JobStatus>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = match status_filter {
            Some(status) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM podcast_jobs WHERE owner_id = ? AND status = ?",
                )
                .bind(owner_id)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM podcast_jobs WHERE owner_id = ?")
                    .bind(owner_id)
                    .fetch_one(&self.pool)
                    .await?
            },
        };
        Ok(count.0)
    }

    pub async fn delete(&self, id: &str, owner_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM podcast_jobs WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail every processing job whose last write predates `cutoff`.
    /// Used by the watchdog for jobs whose task died without a transition.
    pub async fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE podcast_jobs SET status = 'failed', \
             error_message = 'Generation exceeded the allowed time', completed_at = ?, \
             updated_at = ? WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
