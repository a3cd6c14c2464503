use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::ClientError;
use super::types::{JobCommand, StartRequest, StartResponse, StatusResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a remote job authority.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /generation/start`
    pub async fn start(&self, job_id: Option<String>) -> Result<StartResponse, ClientError> {
        let response = self
            .client
            .post(format!("{}/generation/start", self.base_url))
            .json(&StartRequest { job_id })
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        read_json::<StartResponse>(response, "new job")
            .await?
            .ok_or_else(|| ClientError::Decode("empty start response".into()))
    }

    /// `GET /generation/status/{job_id}`
    pub async fn status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/generation/status/{job_id}", self.base_url))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        read_json::<StatusResponse>(response, job_id)
            .await?
            .ok_or_else(|| ClientError::Decode("empty status response".into()))
    }

    /// `POST /generation/{command}/{job_id}`
    ///
    /// Authorities may answer with an empty body; the status is then fetched
    /// separately so callers always get the post-command state.
    pub async fn command(&self, job_id: &str, command: JobCommand) -> Result<StatusResponse, ClientError> {
        let response = self
            .client
            .post(format!("{}/generation/{command}/{job_id}", self.base_url))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        match read_json::<StatusResponse>(response, job_id).await? {
            Some(status) => Ok(status),
            None => self.status(job_id).await,
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, job_id: &str) -> Result<Option<T>, ClientError> {
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(job_id.to_string()));
    }

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ClientError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    let body = response.bytes().await.map_err(ClientError::from_reqwest)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| ClientError::Decode(e.to_string()))
}
