pub mod content;
pub mod job;
pub mod user;

pub use content::{
    CandidateItem, GatherOutcome, QualityScore, RankedItem, ResearchArtifact, SourceSummary,
    StandoutScore, StandoutTier,
};
pub use job::{
    GenerateRequest, GenerationPreferences, GenerationStatusResponse, JobStatus, PodcastJob,
    PodcastListItem, PodcastListResponse, PodcastResponse, RequestKind,
};
pub use user::{LoginRequest, LoginResponse, RegisterRequest, User, UserResponse, UserTier};
