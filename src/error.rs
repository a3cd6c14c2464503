use thiserror::Error;

use crate::api::ClientError;
use crate::tracker::{TrackerError, UnmappedStep};

#[derive(Debug, Error)]
pub enum GenpipeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Phase map error: {0}")]
    PhaseMap(#[from] UnmappedStep),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A watched job ended in error; `code` is the tracker's error code.
    #[error("Job {job_id} ended in error ({code}): {message}")]
    JobEnded {
        job_id: String,
        code: String,
        message: String,
    },
}

impl GenpipeError {
    /// Process exit code for this error. Lost contact is distinguished from
    /// a job that actually failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            GenpipeError::JobEnded { code, .. } if code == "transport_error" => 3,
            GenpipeError::JobEnded { .. } => 2,
            GenpipeError::Client(e) if e.is_not_found() => 4,
            GenpipeError::Tracker(TrackerError::NotFound(_)) => 4,
            _ => 1,
        }
    }
}
