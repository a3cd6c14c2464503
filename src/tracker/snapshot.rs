use serde::Serialize;

use crate::api::StatusResponse;

use super::phase::Phase;

/// Read-only copy of the last accepted status response plus its phase.
///
/// Replaced wholesale on every accepted poll; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub phase: Phase,
    pub detailed_step: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub paused: bool,
}

impl JobSnapshot {
    pub fn from_response(response: &StatusResponse, phase: Phase) -> Self {
        Self {
            job_id: response.job_id.clone(),
            phase,
            detailed_step: response.current_step.clone(),
            progress: response.progress,
            result_id: response.problem_id.clone(),
            error_code: response.error_code.clone(),
            error_message: response.error_message.clone(),
            paused: response.paused,
        }
    }
}
