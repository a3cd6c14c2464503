//! HTTP surface of the job authority.
//!
//! ```text
//! GET  /health
//! POST /generation/start            -> { jobId }
//! GET  /generation/status/{job_id}  -> StatusResponse
//! POST /generation/cancel/{job_id}  -> StatusResponse
//! POST /generation/confirm/{job_id} -> StatusResponse
//! POST /generation/resume/{job_id}  -> StatusResponse
//! POST /generation/retry/{job_id}   -> StatusResponse
//! POST /generation/pause/{job_id}   -> StatusResponse
//! ```

mod error;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::authority::JobAuthority;

pub use error::{AppError, AppResult};

pub fn router(authority: Arc<JobAuthority>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/generation/start", post(handlers::start_job))
        .route("/generation/status/{job_id}", get(handlers::get_status))
        .route("/generation/cancel/{job_id}", post(handlers::cancel_job))
        .route("/generation/confirm/{job_id}", post(handlers::confirm_job))
        .route("/generation/resume/{job_id}", post(handlers::resume_job))
        .route("/generation/retry/{job_id}", post(handlers::retry_job))
        .route("/generation/pause/{job_id}", post(handlers::pause_job))
        .layer(TraceLayer::new_for_http())
        .with_state(authority)
}

/// Serve the authority until `shutdown` is cancelled.
pub async fn serve(
    authority: Arc<JobAuthority>,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "Job authority listening");

    axum::serve(listener, router(authority))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Job authority stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state_machine::StateMachine;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use chrono::{DateTime, Duration, Utc};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<JobAuthority>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let authority = Arc::new(JobAuthority::new(StateMachine::default(), clock.clone()));
        (router(authority.clone()), authority, clock)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _, _) = app();
        let (status, json) = send(app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn start_with_and_without_body() {
        let (app, _, _) = app();
        let (status, json) = send(
            app.clone(),
            Method::POST,
            "/generation/start",
            Body::from(r#"{"jobId":"job-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["jobId"], "job-1");

        let (status, json) = send(app, Method::POST, "/generation/start", Body::empty()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(json["jobId"].as_str().unwrap().len() > 8);
    }

    #[tokio::test]
    async fn duplicate_start_is_conflict() {
        let (app, authority, _) = app();
        authority.start(Some("job-1".into())).unwrap();
        let (status, json) = send(
            app,
            Method::POST,
            "/generation/start",
            Body::from(r#"{"jobId":"job-1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn malformed_start_body_is_bad_request() {
        let (app, _, _) = app();
        let (status, json) =
            send(app, Method::POST, "/generation/start", Body::from("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn status_reflects_clock() {
        let (app, authority, clock) = app();
        authority.start(Some("job-1".into())).unwrap();
        clock.advance(Duration::seconds(1));

        let (status, json) = send(app, Method::GET, "/generation/status/job-1", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["currentStep"], "uploading");
        assert_eq!(json["progress"], 10);
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let (app, _, _) = app();
        let (status, json) = send(app.clone(), Method::GET, "/generation/status/ghost", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");

        let (status, _) = send(app, Method::POST, "/generation/cancel/ghost", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_returns_updated_status() {
        let (app, authority, _) = app();
        authority.start(Some("job-1".into())).unwrap();
        let (status, json) = send(app, Method::POST, "/generation/cancel/job-1", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errorMessage"], "cancelled by user");
        assert_eq!(json["locked"], true);
    }

    #[tokio::test]
    async fn pause_then_resume() {
        let (app, authority, _) = app();
        authority.start(Some("job-1".into())).unwrap();
        let (_, json) = send(app.clone(), Method::POST, "/generation/pause/job-1", Body::empty()).await;
        assert_eq!(json["paused"], true);
        let (_, json) = send(app, Method::POST, "/generation/resume/job-1", Body::empty()).await;
        assert_eq!(json["paused"], false);
    }
}
