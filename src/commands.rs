//! Runs CLI subcommands against a job authority.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use genpipe::GenpipeError;
use genpipe::api::GenerationClient;
use genpipe::authority::JobAuthority;
use genpipe::cache::TtlCache;
use genpipe::clock::SystemClock;
use genpipe::config::GenpipeConfig;
use genpipe::server;
use genpipe::tracker::{JobSnapshot, JobTracker, Phase, PhaseMap};

use crate::cli::Command;
use crate::ui::{self, JobProgress};

/// How a watched job ended, as reported by the tracker callbacks.
enum Outcome {
    Complete(JobSnapshot),
    Error { message: String, code: String },
}

/// Everything a subcommand needs, composed once in `main`.
pub struct App {
    config: GenpipeConfig,
    client: Arc<GenerationClient>,
    /// Completed results keyed by result id.
    results: TtlCache<String, JobSnapshot>,
}

impl App {
    pub fn new(config: GenpipeConfig) -> Result<Self> {
        let client = GenerationClient::new(config.server_url.clone(), config.request_timeout())
            .context("building HTTP client")?;
        let results = TtlCache::new(config.cache_ttl(), config.cache_capacity, Arc::new(SystemClock));
        Ok(Self {
            config,
            client: Arc::new(client),
            results,
        })
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        if let Some((job_command, job_id)) = command.job_command() {
            let status = self
                .client
                .command(job_id, job_command)
                .await
                .map_err(GenpipeError::from)?;
            ui::print_status(&status);
            return Ok(());
        }

        match command {
            Command::Serve { bind } => self.serve(bind).await,
            Command::Start { job_id, watch } => {
                let started = self.client.start(job_id).await.map_err(GenpipeError::from)?;
                println!("Started job {}", started.job_id);
                if watch {
                    self.watch(&started.job_id, false).await?;
                }
                Ok(())
            }
            Command::Status { job_id } => {
                let status = self.client.status(&job_id).await.map_err(GenpipeError::from)?;
                ui::print_status(&status);
                Ok(())
            }
            Command::Watch { job_id, auto_confirm } => self.watch(&job_id, auto_confirm).await,
            _ => Ok(()),
        }
    }

    async fn serve(&self, bind: Option<String>) -> Result<()> {
        let mut config = self.config.clone();
        if let Some(bind) = bind {
            config.bind = bind;
        }
        let addr = config.bind_addr()?;

        let machine = config.state_machine();
        PhaseMap::generation()
            .check_covers(machine.table())
            .map_err(GenpipeError::from)?;
        let authority = Arc::new(JobAuthority::new(machine, Arc::new(SystemClock)));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
        });

        server::serve(authority, addr, shutdown).await
    }

    /// Tracks `job_id` until it completes, fails or the user interrupts.
    async fn watch(&self, job_id: &str, auto_confirm: bool) -> Result<()> {
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let error_tx = outcome_tx.clone();

        let tracker = JobTracker::builder(Arc::clone(&self.client))
            .config(self.config.tracker_config())
            .on_complete(move |snapshot| {
                let _ = outcome_tx.send(Outcome::Complete(snapshot.clone()));
            })
            .on_error(move |message, code| {
                let _ = error_tx.send(Outcome::Error {
                    message: message.to_string(),
                    code: code.to_string(),
                });
            })
            .build();

        let mut snapshots = tracker.subscribe();
        let progress = JobProgress::start(job_id);
        tracker.start(job_id);
        let mut gate_noticed = false;

        let outcome = loop {
            tokio::select! {
                outcome = outcome_rx.recv() => match outcome {
                    Some(outcome) => break outcome,
                    None => return Ok(()),
                },
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                        continue;
                    };
                    progress.update(&snapshot);
                    if snapshot.phase != Phase::StructureReview {
                        gate_noticed = false;
                        continue;
                    }
                    if auto_confirm {
                        tracker.confirm().await.map_err(GenpipeError::from)?;
                    } else if !gate_noticed {
                        gate_noticed = true;
                        progress.notice(&format!("structure ready for review, run `genpipe confirm {job_id}`"));
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracker.stop();
                    progress.abandon();
                    return Ok(());
                }
            }
        };

        match outcome {
            Outcome::Complete(snapshot) => {
                let key = snapshot
                    .result_id
                    .clone()
                    .unwrap_or_else(|| snapshot.job_id.clone());
                self.results.set(key.clone(), snapshot);
                if let Some(result) = self.results.get(&key) {
                    progress.complete(&result);
                }
                Ok(())
            }
            Outcome::Error { message, code } => {
                progress.error(&message, &code);
                Err(GenpipeError::JobEnded {
                    job_id: job_id.to_string(),
                    code,
                    message,
                }
                .into())
            }
        }
    }
}
