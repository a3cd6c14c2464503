//! Client-side polling state controller.
//!
//! ```text
//! Idle ──start──▶ Polling ──completed──▶ Complete
//!                  │  ▲  └──failed / lost contact / bad config──▶ Error
//!                  │  └──── retry / confirm / resume ◀── Complete | Error
//!                  └──stop──▶ Idle
//! ```
//!
//! Every status request carries a sequence number. A response is reconciled
//! only if its number is still the latest one issued for the tracked job;
//! anything superseded by a newer poll, a command, `start` or `stop` is
//! dropped without touching the snapshot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{ClientError, JobCommand, StatusResponse};

use super::gateway::JobGateway;
use super::phase::{Phase, PhaseMap, UnmappedStep};
use super::snapshot::JobSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Pause between the end of one poll and the start of the next.
    pub poll_interval: Duration,
    /// Upper bound for a single status request.
    pub request_timeout: Duration,
    /// Consecutive transport failures tolerated before giving up.
    pub max_transport_failures: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            max_transport_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackerState {
    #[default]
    Idle,
    Polling,
    Complete,
    Error,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(String),

    /// The job itself failed; carries the authority's error code.
    #[error("{message}")]
    JobFailed { code: String, message: String },

    /// Contact with the authority was lost; the job may still be running.
    #[error("lost contact with the job authority after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] UnmappedStep),

    #[error("{action} is not offered in phase {phase:?}")]
    NotOffered {
        action: &'static str,
        phase: Option<Phase>,
    },

    #[error("no job is being tracked")]
    NoJob,

    #[error("{command} failed: {message}")]
    Command { command: JobCommand, message: String },
}

impl TrackerError {
    /// Code passed to `on_error` next to the message.
    pub fn code(&self) -> &str {
        match self {
            TrackerError::NotFound(_) => "not_found",
            TrackerError::JobFailed { code, .. } => code,
            TrackerError::Transport { .. } => "transport_error",
            TrackerError::Configuration(_) => "configuration_error",
            TrackerError::NotOffered { .. } => "not_offered",
            TrackerError::NoJob => "no_job",
            TrackerError::Command { .. } => "command_failed",
        }
    }
}

type CompleteCallback = Box<dyn Fn(&JobSnapshot) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

pub struct JobTrackerBuilder<G> {
    gateway: Arc<G>,
    config: TrackerConfig,
    phases: PhaseMap,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl<G: JobGateway> JobTrackerBuilder<G> {
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn phase_map(mut self, phases: PhaseMap) -> Self {
        self.phases = phases;
        self
    }

    /// Called once per polling session that ends in `completed`.
    pub fn on_complete(mut self, f: impl Fn(&JobSnapshot) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called with `(message, code)` once per polling session that ends in
    /// an error.
    pub fn on_error(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn build(self) -> JobTracker<G> {
        let (snapshot_tx, _) = watch::channel(None);
        JobTracker {
            shared: Arc::new(Shared {
                gateway: self.gateway,
                config: self.config,
                phases: self.phases,
                inner: Mutex::new(Inner::default()),
                snapshot_tx,
                on_complete: self.on_complete,
                on_error: self.on_error,
            }),
        }
    }
}

/// Polls one job at a time and exposes its latest [`JobSnapshot`].
///
/// Must be used from within a Tokio runtime. Dropping the tracker stops
/// polling.
pub struct JobTracker<G: JobGateway> {
    shared: Arc<Shared<G>>,
}

struct Shared<G> {
    gateway: Arc<G>,
    config: TrackerConfig,
    phases: PhaseMap,
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<Option<Arc<JobSnapshot>>>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

#[derive(Default)]
struct Inner {
    state: TrackerState,
    job_id: Option<String>,
    latest_seq: u64,
    session: Option<CancellationToken>,
    transport_failures: u32,
    last_error: Option<TrackerError>,
}

impl Inner {
    fn cancel_session(&mut self) {
        if let Some(token) = self.session.take() {
            token.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
    Discarded,
}

enum Notify {
    Complete(Arc<JobSnapshot>),
    Error(TrackerError),
}

impl<G: JobGateway> JobTracker<G> {
    pub fn builder(gateway: Arc<G>) -> JobTrackerBuilder<G> {
        JobTrackerBuilder {
            gateway,
            config: TrackerConfig::default(),
            phases: PhaseMap::default(),
            on_complete: None,
            on_error: None,
        }
    }

    pub fn new(gateway: Arc<G>, config: TrackerConfig) -> Self {
        Self::builder(gateway).config(config).build()
    }

    pub fn state(&self) -> TrackerState {
        self.shared.lock().state
    }

    pub fn job_id(&self) -> Option<String> {
        self.shared.lock().job_id.clone()
    }

    pub fn last_error(&self) -> Option<TrackerError> {
        self.shared.lock().last_error.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<JobSnapshot>> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Receiver that observes every snapshot replacement.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<JobSnapshot>>> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.snapshot().map(|s| s.phase)
    }

    pub fn can_retry(&self) -> bool {
        self.phase() == Some(Phase::Error)
    }

    pub fn can_confirm(&self) -> bool {
        self.phase() == Some(Phase::StructureReview)
    }

    /// Begin polling `job_id` immediately, replacing any running session.
    pub fn start(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        let (token, same_job) = {
            let mut inner = self.shared.lock();
            let same_job = inner.job_id.as_deref() == Some(job_id.as_str());
            inner.job_id = Some(job_id.clone());
            (self.shared.begin_polling(&mut inner), same_job)
        };
        if !same_job {
            self.shared.snapshot_tx.send_replace(None);
        }
        tracing::debug!(job_id = %job_id, "Tracking started");
        self.spawn_session(job_id, token, Duration::ZERO);
    }

    /// Stop polling and forget the job. Idempotent.
    pub fn stop(&self) {
        {
            let mut inner = self.shared.lock();
            inner.cancel_session();
            inner.latest_seq += 1;
            inner.state = TrackerState::Idle;
            inner.job_id = None;
            inner.transport_failures = 0;
            inner.last_error = None;
        }
        self.shared.snapshot_tx.send_replace(None);
    }

    /// Issue one poll outside the regular cadence.
    ///
    /// Follows the same sequencing rule as the loop, so a slower in-flight
    /// loop request is superseded by this one. A transport failure reports
    /// the session's consecutive failure count.
    pub async fn poll_now(&self) -> Result<Option<Arc<JobSnapshot>>, TrackerError> {
        let job_id = self.job_id().ok_or(TrackerError::NoJob)?;
        let seq = self.shared.issue(&job_id).ok_or(TrackerError::NoJob)?;

        let result = self.shared.fetch(&job_id).await;
        let failure = result
            .as_ref()
            .err()
            .map(|e| (e.is_not_found(), e.to_string()));

        let (_, notify) = self.shared.reconcile(&job_id, seq, result);
        self.shared.notify(notify);

        match failure {
            Some((true, _)) => Err(TrackerError::NotFound(job_id)),
            Some((false, message)) => {
                let attempts = self.shared.lock().transport_failures.max(1);
                Err(TrackerError::Transport { attempts, message })
            }
            None => Ok(self.snapshot()),
        }
    }

    /// Pass the manual gate. Only offered in `structure-review`.
    pub async fn confirm(&self) -> Result<(), TrackerError> {
        if !self.can_confirm() {
            return Err(TrackerError::NotOffered {
                action: "confirm",
                phase: self.phase(),
            });
        }
        self.command(JobCommand::Confirm).await
    }

    /// Retry a failed job. Only offered in `error`.
    pub async fn retry(&self) -> Result<(), TrackerError> {
        if !self.can_retry() {
            return Err(TrackerError::NotOffered {
                action: "retry",
                phase: self.phase(),
            });
        }
        self.command(JobCommand::Retry).await
    }

    pub async fn resume(&self) -> Result<(), TrackerError> {
        self.command(JobCommand::Resume).await
    }

    pub async fn pause(&self) -> Result<(), TrackerError> {
        self.command(JobCommand::Pause).await
    }

    /// Cancel the job. Succeeds for jobs that are already finished or gone.
    pub async fn cancel(&self) -> Result<(), TrackerError> {
        match self.command(JobCommand::Cancel).await {
            Ok(()) | Err(TrackerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send `command`, reconcile the state it returns, and resume polling if
    /// that state is not terminal.
    ///
    /// The response is reconciled inside a fresh session, so a terminal state
    /// it reports fires the callbacks even after tracking ended in `Error`.
    /// Cancelling a job whose last snapshot is already terminal only refreshes
    /// the snapshot.
    async fn command(&self, command: JobCommand) -> Result<(), TrackerError> {
        let job_id = self.job_id().ok_or(TrackerError::NoJob)?;
        let sent = tokio::time::timeout(
            self.shared.config.request_timeout,
            self.shared.gateway.send_command(&job_id, command),
        )
        .await;

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_not_found() => return Err(TrackerError::NotFound(job_id)),
            Ok(Err(e)) => {
                return Err(TrackerError::Command {
                    command,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(TrackerError::Command {
                    command,
                    message: ClientError::Timeout.to_string(),
                });
            }
        };
        tracing::info!(job_id = %job_id, %command, step = %response.current_step, "Job command sent");

        let finished = self.phase().is_some_and(|phase| phase.is_terminal());
        if command == JobCommand::Cancel && finished {
            if let Some(seq) = self.shared.issue(&job_id) {
                let (_, notify) = self.shared.reconcile(&job_id, seq, Ok(response));
                self.shared.notify(notify);
            }
            return Ok(());
        }

        let (token, seq) = {
            let mut inner = self.shared.lock();
            if inner.job_id.as_deref() != Some(job_id.as_str()) {
                return Ok(());
            }
            let token = self.shared.begin_polling(&mut inner);
            (token, inner.latest_seq)
        };
        let (flow, notify) = self.shared.reconcile(&job_id, seq, Ok(response));
        self.shared.notify(notify);

        if flow == Flow::Continue {
            self.spawn_session(job_id, token, self.shared.config.poll_interval);
        }
        Ok(())
    }

    fn spawn_session(&self, job_id: String, token: CancellationToken, first_delay: Duration) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.run(job_id, token, first_delay));
    }
}

impl<G: JobGateway> Drop for JobTracker<G> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<G: JobGateway> Shared<G> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| {
            tracing::error!("Tracker mutex poisoned, recovering");
            e.into_inner()
        })
    }

    /// Supersede any running session and arm a new one.
    fn begin_polling(&self, inner: &mut Inner) -> CancellationToken {
        inner.cancel_session();
        inner.latest_seq += 1;
        inner.state = TrackerState::Polling;
        inner.transport_failures = 0;
        inner.last_error = None;
        let token = CancellationToken::new();
        inner.session = Some(token.clone());
        token
    }

    async fn run(self: Arc<Self>, job_id: String, token: CancellationToken, first_delay: Duration) {
        let mut delay = first_delay;
        loop {
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let flow = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                flow = self.poll(&job_id) => flow,
            };
            if flow == Flow::Stop {
                break;
            }
            delay = self.config.poll_interval;
        }
        tracing::debug!(job_id = %job_id, "Polling session ended");
    }

    async fn poll(&self, job_id: &str) -> Flow {
        let Some(seq) = self.issue(job_id) else {
            return Flow::Stop;
        };
        let result = self.fetch(job_id).await;
        let (flow, notify) = self.reconcile(job_id, seq, result);
        self.notify(notify);
        flow
    }

    /// Next sequence number for `job_id`, or `None` if it is no longer tracked.
    fn issue(&self, job_id: &str) -> Option<u64> {
        let mut inner = self.lock();
        if inner.job_id.as_deref() != Some(job_id) {
            return None;
        }
        inner.latest_seq += 1;
        Some(inner.latest_seq)
    }

    async fn fetch(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        match tokio::time::timeout(self.config.request_timeout, self.gateway.fetch_status(job_id)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    fn reconcile(
        &self,
        job_id: &str,
        seq: u64,
        result: Result<StatusResponse, ClientError>,
    ) -> (Flow, Option<Notify>) {
        let mut inner = self.lock();
        if inner.latest_seq != seq || inner.job_id.as_deref() != Some(job_id) {
            tracing::debug!(job_id, seq, latest = inner.latest_seq, "Discarding superseded status response");
            return (Flow::Discarded, None);
        }
        let polling = inner.state == TrackerState::Polling;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                return self.fail(&mut inner, TrackerError::NotFound(job_id.to_string()), polling);
            }
            Err(e) => {
                if !polling {
                    return (Flow::Stop, None);
                }
                inner.transport_failures += 1;
                let attempts = inner.transport_failures;
                tracing::warn!(job_id, attempts, error = %e, "Status poll failed");
                if attempts < self.config.max_transport_failures {
                    return (Flow::Continue, None);
                }
                let error = TrackerError::Transport {
                    attempts,
                    message: e.to_string(),
                };
                return self.fail(&mut inner, error, polling);
            }
        };
        inner.transport_failures = 0;

        let phase = match self.phases.phase_for(response.status, &response.current_step) {
            Ok(phase) => phase,
            Err(unmapped) => {
                tracing::error!(job_id, step = %unmapped.0, "Unmapped detailed step, aborting tracking");
                return self.fail(&mut inner, TrackerError::Configuration(unmapped), polling);
            }
        };

        let snapshot = Arc::new(JobSnapshot::from_response(&response, phase));
        self.publish(&snapshot);

        match phase {
            Phase::Complete => {
                if !polling {
                    return (Flow::Stop, None);
                }
                inner.state = TrackerState::Complete;
                inner.cancel_session();
                (Flow::Stop, Some(Notify::Complete(snapshot)))
            }
            Phase::Error => {
                let error = TrackerError::JobFailed {
                    code: response.error_code.unwrap_or_else(|| "job_failed".to_string()),
                    message: response
                        .error_message
                        .unwrap_or_else(|| "generation failed".to_string()),
                };
                self.fail(&mut inner, error, polling)
            }
            _ if response.locked => {
                let error = TrackerError::JobFailed {
                    code: "locked".to_string(),
                    message: format!("job locked at step {}", response.current_step),
                };
                self.fail(&mut inner, error, polling)
            }
            _ => (Flow::Continue, None),
        }
    }

    /// End a polling session in `Error`. Outside a session nothing changes.
    fn fail(&self, inner: &mut Inner, error: TrackerError, polling: bool) -> (Flow, Option<Notify>) {
        if !polling {
            return (Flow::Stop, None);
        }
        inner.state = TrackerState::Error;
        inner.cancel_session();
        inner.last_error = Some(error.clone());
        (Flow::Stop, Some(Notify::Error(error)))
    }

    /// Replace the snapshot unless the new one is identical.
    fn publish(&self, snapshot: &Arc<JobSnapshot>) {
        self.snapshot_tx.send_if_modified(|current| {
            if current.as_deref() == Some(snapshot.as_ref()) {
                false
            } else {
                *current = Some(Arc::clone(snapshot));
                true
            }
        });
    }

    fn notify(&self, notify: Option<Notify>) {
        match notify {
            Some(Notify::Complete(snapshot)) => {
                tracing::info!(
                    job_id = %snapshot.job_id,
                    result_id = snapshot.result_id.as_deref().unwrap_or("-"),
                    "Job complete",
                );
                if let Some(on_complete) = &self.on_complete {
                    on_complete(&snapshot);
                }
            }
            Some(Notify::Error(error)) => {
                tracing::warn!(code = error.code(), error = %error, "Job tracking ended in error");
                if let Some(on_error) = &self.on_error {
                    on_error(&error.to_string(), error.code());
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::StepStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Status(StatusResponse),
        Delayed(Duration, StatusResponse),
        Unavailable,
        NotFound,
        Hang,
    }

    /// Plays back scripted replies, then repeats the last status forever.
    #[derive(Default)]
    struct ScriptedGateway {
        replies: Mutex<VecDeque<Reply>>,
        last: Mutex<Option<StatusResponse>>,
        command_reply: Mutex<Option<StatusResponse>>,
        commands: Mutex<Vec<JobCommand>>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn push(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl JobGateway for ScriptedGateway {
        async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front();
            let status = match reply {
                Some(Reply::Status(status)) => status,
                Some(Reply::Delayed(delay, status)) => {
                    tokio::time::sleep(delay).await;
                    status
                }
                Some(Reply::Unavailable) => {
                    return Err(ClientError::ApiError {
                        status: 503,
                        message: "unavailable".into(),
                    });
                }
                Some(Reply::NotFound) => return Err(ClientError::NotFound(job_id.into())),
                Some(Reply::Hang) => std::future::pending().await,
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| ClientError::NotFound(job_id.into()))?,
            };
            *self.last.lock().unwrap() = Some(status.clone());
            Ok(status)
        }

        async fn send_command(&self, job_id: &str, command: JobCommand) -> Result<StatusResponse, ClientError> {
            self.commands.lock().unwrap().push(command);
            let reply = self.command_reply.lock().unwrap().clone();
            let reply = reply.ok_or_else(|| ClientError::NotFound(job_id.into()))?;
            *self.last.lock().unwrap() = Some(reply.clone());
            Ok(reply)
        }
    }

    fn status(status: StepStatus, step: &str, progress: u8) -> StatusResponse {
        StatusResponse {
            job_id: "job-1".into(),
            status,
            current_step: step.into(),
            progress,
            problem_id: None,
            error_code: None,
            error_message: None,
            locked: matches!(status, StepStatus::Completed | StepStatus::Failed),
            paused: false,
        }
    }

    fn processing(step: &str, progress: u8) -> Reply {
        Reply::Status(status(StepStatus::Processing, step, progress))
    }

    fn completed() -> StatusResponse {
        let mut done = status(StepStatus::Completed, "completed", 100);
        done.problem_id = Some("problem-job-1".into());
        done
    }

    fn failed(code: &str, message: &str) -> StatusResponse {
        let mut failed = status(StepStatus::Failed, "uploading", 10);
        failed.error_code = Some(code.into());
        failed.error_message = Some(message.into());
        failed
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_millis(300),
            max_transport_failures: 3,
        }
    }

    #[derive(Default)]
    struct Events {
        completed: Mutex<Vec<JobSnapshot>>,
        errors: Mutex<Vec<(String, String)>>,
    }

    fn tracker(gateway: Arc<ScriptedGateway>) -> (JobTracker<ScriptedGateway>, Arc<Events>) {
        let events = Arc::new(Events::default());
        let on_complete = Arc::clone(&events);
        let on_error = Arc::clone(&events);
        let tracker = JobTracker::builder(gateway)
            .config(config())
            .on_complete(move |s| on_complete.completed.lock().unwrap().push(s.clone()))
            .on_error(move |message, code| {
                on_error
                    .errors
                    .lock()
                    .unwrap()
                    .push((message.to_string(), code.to_string()))
            })
            .build();
        (tracker, events)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_sets_phase() {
        let gateway = ScriptedGateway::new(vec![processing("uploading", 10)]);
        let (tracker, _) = tracker(gateway);
        assert_eq!(tracker.state(), TrackerState::Idle);

        tracker.start("job-1");
        settle().await;

        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.phase, Phase::Uploading);
        assert_eq!(snapshot.progress, 10);
        assert_eq!(tracker.state(), TrackerState::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_fixed_interval() {
        let gateway = ScriptedGateway::new(vec![
            processing("uploading", 10),
            processing("extracting", 25),
            processing("generating", 70),
        ]);
        let (tracker, _) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;
        assert_eq!(gateway.calls(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.calls(), 2);
        assert_eq!(tracker.phase(), Some(Phase::Analyzing));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.phase(), Some(Phase::Generating));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_fires_once_and_stops() {
        let gateway = ScriptedGateway::new(vec![
            processing("postprocessing", 90),
            Reply::Status(completed()),
        ]);
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(tracker.state(), TrackerState::Complete);
        assert_eq!(gateway.calls(), 2);
        let completed = events.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].result_id.as_deref(), Some("problem-job-1"));
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_poll_after_completion_changes_nothing() {
        let gateway = ScriptedGateway::new(vec![Reply::Status(completed())]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        settle().await;
        let before = tracker.snapshot().unwrap();
        let mut rx = tracker.subscribe();
        rx.mark_unchanged();

        let after = tracker.poll_now().await.unwrap().unwrap();
        assert_eq!(*after, *before);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(events.completed.lock().unwrap().len(), 1);
        assert_eq!(tracker.state(), TrackerState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn job_failure_reports_code_and_message() {
        let gateway = ScriptedGateway::new(vec![Reply::Status(failed("upload_failed", "file rejected"))]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        settle().await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(tracker.phase(), Some(Phase::Error));
        assert!(tracker.can_retry());
        assert_eq!(
            *events.errors.lock().unwrap(),
            vec![("file rejected".to_string(), "upload_failed".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_failures_are_absorbed() {
        let gateway = ScriptedGateway::new(vec![
            Reply::Unavailable,
            Reply::Unavailable,
            processing("uploading", 10),
        ]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(tracker.state(), TrackerState::Polling);
        assert_eq!(tracker.phase(), Some(Phase::Uploading));
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transport_failures_escalate_distinctly() {
        let gateway = ScriptedGateway::new(vec![
            processing("uploading", 10),
            Reply::Unavailable,
            Reply::Unavailable,
            Reply::Unavailable,
            processing("extracting", 25),
        ]);
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(gateway.calls(), 4);
        // the job did not fail; the last good snapshot stays
        assert_eq!(tracker.phase(), Some(Phase::Uploading));
        assert!(!tracker.can_retry());
        assert!(matches!(tracker.last_error(), Some(TrackerError::Transport { attempts: 3, .. })));
        let errors = events.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, "transport_error");
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_counts_as_transport_failure() {
        let gateway = ScriptedGateway::new(vec![Reply::Hang, Reply::Hang, Reply::Hang]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert!(tracker.snapshot().is_none());
        assert_eq!(events.errors.lock().unwrap()[0].1, "transport_error");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_is_terminal() {
        let gateway = ScriptedGateway::new(vec![Reply::NotFound]);
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("ghost");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(gateway.calls(), 1);
        assert_eq!(events.errors.lock().unwrap()[0].1, "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn unmapped_step_aborts_tracking() {
        let gateway = ScriptedGateway::new(vec![processing("translating", 60)]);
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(gateway.calls(), 1);
        assert!(tracker.snapshot().is_none());
        assert_eq!(
            tracker.last_error(),
            Some(TrackerError::Configuration(UnmappedStep("translating".into())))
        );
        assert_eq!(events.errors.lock().unwrap()[0].1, "configuration_error");
    }

    #[tokio::test(start_paused = true)]
    async fn locked_without_terminal_status_ends_in_error() {
        let mut stuck = status(StepStatus::Processing, "postprocessing", 90);
        stuck.locked = true;
        let gateway = ScriptedGateway::new(vec![Reply::Status(stuck)]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        settle().await;

        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(events.errors.lock().unwrap()[0].1, "locked");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_response() {
        let gateway = ScriptedGateway::new(vec![Reply::Delayed(
            Duration::from_millis(200),
            status(StepStatus::Processing, "uploading", 10),
        )]);
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;
        tracker.stop();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.snapshot().is_none());
        assert!(tracker.job_id().is_none());
        assert_eq!(gateway.calls(), 1);
        assert!(events.errors.lock().unwrap().is_empty());

        // idempotent
        tracker.stop();
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_response_is_discarded() {
        let gateway = ScriptedGateway::new(vec![
            processing("uploading", 10),
            Reply::Delayed(Duration::from_millis(500), status(StepStatus::Processing, "upload_verifying", 15)),
            processing("extracting", 25),
        ]);
        let (tracker, _) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;

        // loop's second poll is now in flight for 500ms
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(gateway.calls(), 2);

        let fresh = tracker.poll_now().await.unwrap().unwrap();
        assert_eq!(fresh.detailed_step, "extracting");

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.detailed_step, "extracting");
        assert_eq!(snapshot.progress, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_previous_session() {
        let gateway = ScriptedGateway::new(vec![processing("uploading", 10)]);
        let (tracker, _) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;

        let mut other = status(StepStatus::Processing, "extracting", 25);
        other.job_id = "job-2".into();
        gateway.push(Reply::Status(other));
        tracker.start("job-2");
        settle().await;

        assert_eq!(tracker.job_id().as_deref(), Some("job-2"));
        assert_eq!(tracker.snapshot().unwrap().job_id, "job-2");

        // only one loop keeps polling
        let calls = gateway.calls();
        tokio::time::sleep(Duration::from_millis(1_005)).await;
        assert_eq!(gateway.calls(), calls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_are_only_offered_in_matching_phase() {
        let gateway = ScriptedGateway::new(vec![processing("uploading", 10)]);
        let (tracker, _) = tracker(gateway.clone());

        assert_eq!(tracker.confirm().await, Err(TrackerError::NotOffered { action: "confirm", phase: None }));

        tracker.start("job-1");
        settle().await;
        assert!(!tracker.can_confirm());
        assert!(!tracker.can_retry());
        assert!(matches!(tracker.retry().await, Err(TrackerError::NotOffered { action: "retry", .. })));
        assert!(gateway.commands.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_at_gate_resumes_polling() {
        let gateway = ScriptedGateway::new(vec![processing("structure_review", 50)]);
        *gateway.command_reply.lock().unwrap() = Some(status(StepStatus::Processing, "waiting_for_slot", 55));
        let (tracker, _) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;
        assert!(tracker.can_confirm());

        tracker.confirm().await.unwrap();
        assert_eq!(*gateway.commands.lock().unwrap(), vec![JobCommand::Confirm]);
        assert_eq!(tracker.phase(), Some(Phase::Generating));
        assert_eq!(tracker.state(), TrackerState::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_polling_lands_in_error() {
        let gateway = ScriptedGateway::new(vec![processing("generating", 70)]);
        let mut cancelled = status(StepStatus::Failed, "generating", 70);
        cancelled.error_code = Some("cancelled".into());
        cancelled.error_message = Some("cancelled by user".into());
        *gateway.command_reply.lock().unwrap() = Some(cancelled);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        settle().await;

        tracker.cancel().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(tracker.phase(), Some(Phase::Error));
        assert_eq!(
            *events.errors.lock().unwrap(),
            vec![("cancelled by user".to_string(), "cancelled".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_of_vanished_job_still_succeeds() {
        let gateway = ScriptedGateway::new(vec![processing("generating", 70)]);
        let (tracker, _) = tracker(gateway);
        tracker.start("job-1");
        settle().await;
        assert_eq!(tracker.cancel().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_failure_polls_again() {
        let gateway = ScriptedGateway::new(vec![
            Reply::Status(failed("upload_failed", "file rejected")),
            processing("uploading", 10),
        ]);
        *gateway.command_reply.lock().unwrap() = Some(status(StepStatus::Queued, "queued", 0));
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        settle().await;
        assert_eq!(tracker.state(), TrackerState::Error);

        tracker.retry().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Polling);
        assert_eq!(tracker.phase(), Some(Phase::Uploading));
        assert!(tracker.last_error().is_none());

        tokio::time::sleep(Duration::from_millis(1_005)).await;
        assert_eq!(tracker.snapshot().unwrap().detailed_step, "uploading");
        assert_eq!(events.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_poll_reports_consecutive_transport_failures() {
        let gateway = ScriptedGateway::new(vec![
            processing("uploading", 10),
            Reply::Unavailable,
            Reply::Unavailable,
        ]);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_millis(1_005)).await;

        let err = tracker.poll_now().await.unwrap_err();
        assert!(matches!(err, TrackerError::Transport { attempts: 2, .. }), "{err:?}");
        assert_eq!(tracker.state(), TrackerState::Polling);
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_transport_escalation_reports_completion() {
        let gateway = ScriptedGateway::new(vec![
            processing("generating", 70),
            Reply::Unavailable,
            Reply::Unavailable,
            Reply::Unavailable,
        ]);
        *gateway.command_reply.lock().unwrap() = Some(completed());
        let (tracker, events) = tracker(gateway.clone());
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.state(), TrackerState::Error);
        assert_eq!(tracker.phase(), Some(Phase::Generating));

        tracker.resume().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Complete);
        assert_eq!(tracker.phase(), Some(Phase::Complete));
        assert!(tracker.last_error().is_none());
        assert_eq!(events.completed.lock().unwrap().len(), 1);

        // no session left running
        let calls = gateway.calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.calls(), calls);
        assert_eq!(events.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_transport_escalation_reports_cancellation() {
        let gateway = ScriptedGateway::new(vec![
            processing("generating", 70),
            Reply::Unavailable,
            Reply::Unavailable,
            Reply::Unavailable,
        ]);
        let mut cancelled = status(StepStatus::Failed, "generating", 70);
        cancelled.error_code = Some("cancelled".into());
        cancelled.error_message = Some("cancelled by user".into());
        *gateway.command_reply.lock().unwrap() = Some(cancelled);
        let (tracker, events) = tracker(gateway);
        tracker.start("job-1");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.state(), TrackerState::Error);

        tracker.cancel().await.unwrap();
        assert_eq!(tracker.phase(), Some(Phase::Error));
        assert_eq!(tracker.last_error().map(|e| e.code().to_string()).as_deref(), Some("cancelled"));
        {
            let errors = events.errors.lock().unwrap();
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[1].1, "cancelled");
        }

        // a repeat on the finished job does not report again
        tracker.cancel().await.unwrap();
        assert_eq!(events.errors.lock().unwrap().len(), 2);
    }

    #[test]
    fn error_codes() {
        assert_eq!(TrackerError::NotFound("x".into()).code(), "not_found");
        assert_eq!(
            TrackerError::JobFailed {
                code: "upload_failed".into(),
                message: "m".into()
            }
            .code(),
            "upload_failed"
        );
        assert_eq!(
            TrackerError::Transport {
                attempts: 3,
                message: "m".into()
            }
            .code(),
            "transport_error"
        );
        assert_eq!(
            TrackerError::Configuration(UnmappedStep("x".into())).code(),
            "configuration_error"
        );
    }
}
