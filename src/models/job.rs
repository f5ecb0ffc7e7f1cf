//! Generation job rows and the API payloads around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Job lifecycle. Completed/failed/cancelled are terminal; the repository
/// refuses writes that would move a job out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What kind of content gathering the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Base,
    Standout,
    Topic,
    Personalized,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Standout => "standout",
            Self::Topic => "topic",
            Self::Personalized => "personalized",
        }
    }

    pub fn parse_kind(s: &str) -> Self {
        match s {
            "standout" => Self::Standout,
            "topic" => Self::Topic,
            "personalized" => Self::Personalized,
            _ => Self::Base,
        }
    }
}

/// Request-time preference snapshot; a one-shot override of the stored
/// preference model, never written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surprise_tolerance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

/// Generation job row. Mutated only by the job controller.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PodcastJob {
    pub id: String,
    pub owner_id: i64,
    pub query_text: String,
    pub request_kind: String,
    pub preferences_json: Option<String>,
    pub status: String,
    pub progress: i64,
    pub result_json: Option<String>,
    pub script_content: Option<String>,
    pub audio_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PodcastJob {
    pub fn status_enum(&self) -> JobStatus {
        JobStatus::parse_status(&self.status)
    }

    pub fn kind_enum(&self) -> RequestKind {
        RequestKind::parse_kind(&self.request_kind)
    }

    pub fn preferences(&self) -> Option<GenerationPreferences> {
        self.preferences_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

// ============================================================================
// API payloads
// ============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GenerateRequest {
    /// Free-form location or question
    #[validate(length(min = 2, max = 500))]
    pub query: String,
    #[serde(default = "default_kind")]
    pub podcast_type: RequestKind,
    #[serde(default)]
    pub preferences: Option<GenerationPreferences>,
}

fn default_kind() -> RequestKind {
    RequestKind::Base
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerationStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub podcast_id: String,
    pub progress: u8,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PodcastResponse {
    pub id: String,
    pub query: String,
    pub podcast_type: RequestKind,
    pub status: JobStatus,
    pub progress: u8,
    /// Ranked candidate set (GatherOutcome), present once completed
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    /// Script text, populated by the out-of-scope script stage
    pub script_content: Option<String>,
    /// Audio URL, populated by the out-of-scope TTS stage
    pub audio_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PodcastJob> for PodcastResponse {
    fn from(job: &PodcastJob) -> Self {
        Self {
            id: job.id.clone(),
            query: job.query_text.clone(),
            podcast_type: job.kind_enum(),
            status: job.status_enum(),
            progress: job.progress.clamp(0, 100) as u8,
            result: job
                .result_json
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok()),
            script_content: job.script_content.clone(),
            audio_url: job.audio_url.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PodcastListItem {
    pub id: String,
    pub query: String,
    pub podcast_type: RequestKind,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PodcastJob> for PodcastListItem {
    fn from(job: &PodcastJob) -> Self {
        Self {
            id: job.id.clone(),
            query: job.query_text.clone(),
            podcast_type: job.kind_enum(),
            status: job.status_enum(),
            progress: job.progress.clamp(0, 100) as u8,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PodcastListResponse {
    pub podcasts: Vec<PodcastListItem>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn unknown_kind_falls_back_to_base() {
        assert_eq!(RequestKind::parse_kind("nonsense"), RequestKind::Base);
        assert_eq!(RequestKind::parse_kind("standout"), RequestKind::Standout);
    }
}
