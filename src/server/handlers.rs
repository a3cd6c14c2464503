use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use crate::api::{JobCommand, StartRequest, StartResponse, StatusResponse};
use crate::authority::JobAuthority;

use super::error::{AppError, AppResult};

pub type AppState = Arc<JobAuthority>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /generation/start
///
/// The body is optional; `{ "jobId": "..." }` pins the identifier.
pub async fn start_job(
    State(authority): State<AppState>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<StartResponse>)> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice::<StartRequest>(&body)
            .map_err(|e| AppError::BadRequest(e.to_string()))?
    };

    let job = authority.start(request.job_id)?;
    Ok((StatusCode::CREATED, Json(StartResponse { job_id: job.job_id })))
}

/// GET /generation/status/{job_id}
pub async fn get_status(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let state = authority.get_status(&job_id)?;
    Ok(Json(StatusResponse::from(&state)))
}

pub async fn cancel_job(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    run_command(&authority, &job_id, JobCommand::Cancel)
}

pub async fn confirm_job(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    run_command(&authority, &job_id, JobCommand::Confirm)
}

pub async fn resume_job(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    run_command(&authority, &job_id, JobCommand::Resume)
}

pub async fn retry_job(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    run_command(&authority, &job_id, JobCommand::Retry)
}

pub async fn pause_job(
    State(authority): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    run_command(&authority, &job_id, JobCommand::Pause)
}

fn run_command(
    authority: &JobAuthority,
    job_id: &str,
    command: JobCommand,
) -> AppResult<Json<StatusResponse>> {
    let state = authority.command(job_id, command)?;
    Ok(Json(StatusResponse::from(&state)))
}
