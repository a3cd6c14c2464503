use std::future::Future;

use crate::api::{ClientError, GenerationClient, JobCommand, StatusResponse};
use crate::authority::{AuthorityError, JobAuthority};

/// Where a [`JobTracker`](super::JobTracker) reads status and sends commands.
///
/// Implemented by the HTTP [`GenerationClient`] and directly by an
/// in-process [`JobAuthority`].
pub trait JobGateway: Send + Sync + 'static {
    fn fetch_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<StatusResponse, ClientError>> + Send;

    fn send_command(
        &self,
        job_id: &str,
        command: JobCommand,
    ) -> impl Future<Output = Result<StatusResponse, ClientError>> + Send;
}

impl JobGateway for GenerationClient {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        self.status(job_id).await
    }

    async fn send_command(&self, job_id: &str, command: JobCommand) -> Result<StatusResponse, ClientError> {
        self.command(job_id, command).await
    }
}

impl JobGateway for JobAuthority {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        let state = self.get_status(job_id).map_err(client_error)?;
        Ok(StatusResponse::from(&state))
    }

    async fn send_command(&self, job_id: &str, command: JobCommand) -> Result<StatusResponse, ClientError> {
        let state = self.command(job_id, command).map_err(client_error)?;
        Ok(StatusResponse::from(&state))
    }
}

fn client_error(err: AuthorityError) -> ClientError {
    match err {
        AuthorityError::NotFound(job_id) => ClientError::NotFound(job_id),
        AuthorityError::AlreadyExists(job_id) => ClientError::ApiError {
            status: 409,
            message: format!("Job already exists: {job_id}"),
        },
    }
}
