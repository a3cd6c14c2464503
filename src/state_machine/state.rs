use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::job::{JobState, RetryPolicy, result_id_for};
use super::step::{StepStatus, StepTable};

pub const CANCELLED_CODE: &str = "cancelled";
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Pure transition functions over [`JobState`].
///
/// Every operation takes the current state and an injected `now` and returns
/// the next state. Nothing here reads a clock or touches shared storage.
#[derive(Debug, Clone)]
pub struct StateMachine {
    table: Arc<StepTable>,
    retry_policy: RetryPolicy,
}

impl StateMachine {
    pub fn new(table: StepTable, retry_policy: RetryPolicy) -> Self {
        Self {
            table: Arc::new(table),
            retry_policy,
        }
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// A fresh job on the first step of the table.
    pub fn start(&self, job_id: String, now: DateTime<Utc>) -> JobState {
        let first = self.table.first();
        let mut job = JobState::at_step(job_id, 0, first, now);
        if first.status == StepStatus::Completed {
            job.result_id = Some(result_id_for(&job.job_id));
            job.locked = true;
        }
        job
    }

    /// Time-driven advancement by at most one step.
    ///
    /// Holds still while locked, paused, sitting on the manual gate, or
    /// before `next_due_at`.
    pub fn advance(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if state.locked || state.paused || state.is_gated() || now < state.next_due_at {
            return state.clone();
        }
        self.step_forward(state, now)
    }

    /// Pass the manual gate. No-op unless the job is sitting on it.
    pub fn confirm(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if state.locked || !state.is_gated() {
            return state.clone();
        }
        self.step_forward(state, now)
    }

    /// Terminate the job as failed from any position. Overrides an earlier
    /// failure; completed or already cancelled jobs are returned unchanged.
    pub fn cancel(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if state.is_completed() || state.is_cancelled() {
            return state.clone();
        }
        let mut next = state.clone();
        next.status = StepStatus::Failed;
        next.locked = true;
        next.error_code = Some(CANCELLED_CODE.to_string());
        next.error_message = Some(CANCELLED_MESSAGE.to_string());
        next.last_transition_at = now;
        next
    }

    /// Record a failure reported by upstream processing.
    pub fn fail(&self, state: &JobState, code: &str, message: &str, now: DateTime<Utc>) -> JobState {
        if state.locked {
            return state.clone();
        }
        let mut next = state.clone();
        next.status = StepStatus::Failed;
        next.locked = true;
        next.error_code = Some(code.to_string());
        next.error_message = Some(message.to_string());
        next.last_transition_at = now;
        next
    }

    /// Resume a failed job from the step chosen by the retry policy.
    pub fn retry(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if state.status != StepStatus::Failed {
            return state.clone();
        }
        let target = self.retry_policy.resume_index(state.step_index);
        let Some(step) = self.table.get(target) else {
            return state.clone();
        };

        let mut next = state.clone();
        next.enter_step(target, step, now);
        next.locked = false;
        next.paused = false;
        next.result_id = None;
        next.error_code = None;
        next.error_message = None;
        next
    }

    /// Suspend time-driven advancement.
    pub fn pause(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if state.locked || state.paused {
            return state.clone();
        }
        let mut next = state.clone();
        next.paused = true;
        next.last_transition_at = now;
        next
    }

    pub fn resume(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        if !state.paused {
            return state.clone();
        }
        let mut next = state.clone();
        next.paused = false;
        next.last_transition_at = now;
        next
    }

    fn step_forward(&self, state: &JobState, now: DateTime<Utc>) -> JobState {
        let mut next = state.clone();
        let next_index = state.step_index + 1;
        let Some(step) = self.table.get(next_index) else {
            next.locked = true;
            return next;
        };

        next.enter_step(next_index, step, now);
        if step.status == StepStatus::Completed {
            next.result_id = Some(result_id_for(&next.job_id));
            next.locked = true;
        }
        next
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(StepTable::generation(), RetryPolicy::default())
    }
}
