use thiserror::Error;

use crate::job::JobId;

/// Failure of a single source fetch. Absorbed by the orchestrator, which skips
/// the source and keeps crawling the language.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("failed to parse source payload: {0}")]
    ParseError(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("fetch timed out after {0}s")]
    Timeout(u64),
}

/// Failure of one AI provider call. Absorbed per target language.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("malformed provider output: {0}")]
    Malformed(String),

    #[error("provider call timed out after {0}s")]
    Timeout(u64),
}

/// Errors surfaced to callers of the job control surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobControlError {
    #[error("a job is already active in this scope: {0}")]
    AlreadyActive(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("article not found: {0}")]
    ArticleNotFound(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    JobControl(#[from] JobControlError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
