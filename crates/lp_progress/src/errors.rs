use lp_core::{JobControlError, JobId, PersistenceError};
use thiserror::Error;

/// Errors that can occur when working with the progress tracker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    /// The job id is not known to the tracker or its store
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job already reached `completed` or `failed` and is immutable
    #[error("job {0} is terminal")]
    Terminal(JobId),

    /// The backing job store failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<ProgressError> for lp_core::Error {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => lp_core::Error::JobControl(JobControlError::NotFound(id)),
            ProgressError::Terminal(id) => {
                lp_core::Error::JobControl(JobControlError::InvalidConfig(format!("job {id} is already finished")))
            }
            ProgressError::Persistence(e) => lp_core::Error::Persistence(e),
        }
    }
}
