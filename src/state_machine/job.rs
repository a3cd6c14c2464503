use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::CANCELLED_CODE;
use super::step::{MANUAL_GATE_STEP, StepDefinition, StepStatus};

/// Where a failed job resumes when retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Step back one entry from the failed step, keeping earlier progress.
    #[default]
    StepBack,
    /// Start over from the first step.
    Restart,
}

impl RetryPolicy {
    /// The step index a job failed at `failed_index` resumes from.
    pub fn resume_index(&self, failed_index: usize) -> usize {
        match self {
            RetryPolicy::StepBack => failed_index.saturating_sub(1),
            RetryPolicy::Restart => 0,
        }
    }
}

/// Identifier of the generated result for a completed job.
pub fn result_id_for(job_id: &str) -> String {
    format!("problem-{job_id}")
}

/// Canonical state of one generation job.
///
/// Only [`StateMachine`](super::StateMachine) produces new values; callers
/// get copies and never mutate a stored state in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub step_index: usize,
    pub status: StepStatus,
    pub detailed_step: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub locked: bool,
    pub paused: bool,
    pub last_transition_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
}

impl JobState {
    /// A job sitting on `step` at `step_index`, armed to advance after the
    /// step's settle delay.
    pub fn at_step(
        job_id: String,
        step_index: usize,
        step: &StepDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            step_index,
            status: step.status,
            detailed_step: step.detailed_step.clone(),
            progress: step.progress,
            result_id: None,
            error_code: None,
            error_message: None,
            locked: false,
            paused: false,
            last_transition_at: now,
            next_due_at: now + step.settle_delay,
        }
    }

    /// Move onto `step`, copying its table fields and re-arming the due time.
    pub(crate) fn enter_step(&mut self, step_index: usize, step: &StepDefinition, now: DateTime<Utc>) {
        self.step_index = step_index;
        self.status = step.status;
        self.detailed_step = step.detailed_step.clone();
        self.progress = step.progress;
        self.last_transition_at = now;
        self.next_due_at = now + step.settle_delay;
    }

    pub fn is_gated(&self) -> bool {
        self.detailed_step == MANUAL_GATE_STEP
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_failed() && self.error_code.as_deref() == Some(CANCELLED_CODE)
    }
}
