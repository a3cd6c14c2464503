//! The job authority: canonical owner of every job's state.
//!
//! Time-driven progress is computed lazily. Each read (and each command)
//! first runs [`StateMachine::advance`] against the injected clock, so no
//! scheduler task is needed and tests drive time with a
//! [`ManualClock`](crate::clock::ManualClock).
//!
//! Writes for one job are serialized by the map's per-entry lock; readers
//! always receive an owned copy of the state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use uuid::Uuid;

use crate::api::JobCommand;
use crate::clock::Clock;
use crate::state_machine::{JobState, StateMachine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),
}

pub struct JobAuthority {
    machine: StateMachine,
    clock: Arc<dyn Clock>,
    jobs: DashMap<String, JobState>,
}

impl JobAuthority {
    pub fn new(machine: StateMachine, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine,
            clock,
            jobs: DashMap::new(),
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Create a job on the first step. Generates an id when none is given.
    pub fn start(&self, job_id: Option<String>) -> Result<JobState, AuthorityError> {
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        match self.jobs.entry(job_id.clone()) {
            Entry::Occupied(_) => Err(AuthorityError::AlreadyExists(job_id)),
            Entry::Vacant(slot) => {
                let state = self.machine.start(job_id, self.clock.now());
                tracing::info!(job_id = %state.job_id, step = %state.detailed_step, "Job started");
                slot.insert(state.clone());
                Ok(state)
            }
        }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        self.get_status_at(job_id, self.clock.now())
    }

    /// Read the job as of `now`, advancing it by at most one step first.
    pub fn get_status_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<JobState, AuthorityError> {
        self.apply(job_id, now, None, |_, _, state| state.clone())
    }

    /// Idempotent; a no-op on completed or already cancelled jobs. Overrides
    /// an upstream failure.
    pub fn cancel(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("cancel"), |m, _, s| m.cancel(s, now))
    }

    /// No-op unless the stored job already sits on the manual gate. A job
    /// that only reaches the gate during catch-up stays there, so the gate
    /// is always observable before it is passed.
    pub fn confirm(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("confirm"), |m, stored, s| {
            if stored.is_gated() {
                m.confirm(s, now)
            } else {
                s.clone()
            }
        })
    }

    pub fn resume(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("resume"), |m, _, s| m.resume(s, now))
    }

    pub fn pause(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("pause"), |m, _, s| m.pause(s, now))
    }

    /// No-op unless the job has failed.
    pub fn retry(&self, job_id: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("retry"), |m, _, s| m.retry(s, now))
    }

    pub fn command(&self, job_id: &str, command: JobCommand) -> Result<JobState, AuthorityError> {
        match command {
            JobCommand::Cancel => self.cancel(job_id),
            JobCommand::Confirm => self.confirm(job_id),
            JobCommand::Resume => self.resume(job_id),
            JobCommand::Retry => self.retry(job_id),
            JobCommand::Pause => self.pause(job_id),
        }
    }

    /// Record a failure signalled by upstream processing.
    pub fn fail(&self, job_id: &str, code: &str, message: &str) -> Result<JobState, AuthorityError> {
        let now = self.clock.now();
        self.apply(job_id, now, Some("fail"), |m, _, s| m.fail(s, code, message, now))
    }

    fn apply<F>(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        command: Option<&'static str>,
        f: F,
    ) -> Result<JobState, AuthorityError>
    where
        F: FnOnce(&StateMachine, &JobState, &JobState) -> JobState,
    {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AuthorityError::NotFound(job_id.to_string()))?;

        let caught_up = self.machine.advance(&entry, now);
        if caught_up.step_index != entry.step_index || caught_up.locked != entry.locked {
            tracing::debug!(
                job_id,
                from = %entry.detailed_step,
                to = %caught_up.detailed_step,
                progress = caught_up.progress,
                "Job advanced",
            );
        }

        let next = f(&self.machine, &*entry, &caught_up);
        if let Some(command) = command {
            if next != caught_up {
                tracing::info!(
                    job_id,
                    command,
                    status = %next.status,
                    step = %next.detailed_step,
                    "Job command applied",
                );
            } else {
                tracing::debug!(job_id, command, "Job command was a no-op");
            }
        }

        *entry = next.clone();
        Ok(next)
    }
}
