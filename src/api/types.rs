//! Corpos JSON trocados com os endpoints `/generation`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state_machine::{JobState, StepStatus};

/// Corpo de `GET /generation/status/{jobId}` e de toda resposta de comando.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: StepStatus,
    pub current_step: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub paused: bool,
}

impl From<&JobState> for StatusResponse {
    fn from(state: &JobState) -> Self {
        Self {
            job_id: state.job_id.clone(),
            status: state.status,
            current_step: state.detailed_step.clone(),
            progress: state.progress,
            problem_id: state.result_id.clone(),
            error_code: state.error_code.clone(),
            error_message: state.error_message.clone(),
            locked: state.locked,
            paused: state.paused,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub job_id: String,
}

/// Ações corretivas que um cliente pode enviar para um job existente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Cancel,
    Confirm,
    Resume,
    Retry,
    Pause,
}

impl JobCommand {
    /// Segmento de caminho sob `/generation/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommand::Cancel => "cancel",
            JobCommand::Confirm => "confirm",
            JobCommand::Resume => "resume",
            JobCommand::Retry => "retry",
            JobCommand::Pause => "pause",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
