//! Interface de linha de comando do genpipe baseada em clap.
//!
//! Define a struct [`Cli`] com um subcomando [`Command`] por operação da
//! autoridade, além de `serve` e `watch`, e as flags globais `--server` e
//! `--verbose`.

use clap::{Parser, Subcommand};
use genpipe::api::JobCommand;

/// genpipe: executa a autoridade de jobs ou acompanha jobs de geração.
#[derive(Debug, Parser)]
#[command(name = "genpipe", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL base da autoridade. Tem precedência sobre `genpipe.toml` e `GENPIPE_SERVER_URL`.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Habilita logs de depuração (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o servidor HTTP da autoridade de jobs.
    Serve {
        /// Endereço de escuta. Tem precedência sobre `genpipe.toml` e `GENPIPE_BIND`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inicia um novo job.
    Start {
        /// Id do job a usar no lugar de um id gerado.
        #[arg(long)]
        job_id: Option<String>,

        /// Acompanha o job até o fim.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Mostra o status atual de um job.
    Status { job_id: String },

    /// Acompanha um job até concluir ou falhar.
    Watch {
        job_id: String,

        /// Confirma automaticamente a revisão de estrutura.
        #[arg(long, default_value_t = false)]
        auto_confirm: bool,
    },

    /// Cancela um job.
    Cancel { job_id: String },

    /// Libera a revisão de estrutura.
    Confirm { job_id: String },

    /// Retoma um job pausado.
    Resume { job_id: String },

    /// Retenta um job que falhou.
    Retry { job_id: String },

    /// Suspende o avanço por tempo.
    Pause { job_id: String },
}

impl Command {
    /// O comando enviado à autoridade por este subcomando, com o job alvo.
    pub fn job_command(&self) -> Option<(JobCommand, &str)> {
        match self {
            Command::Cancel { job_id } => Some((JobCommand::Cancel, job_id)),
            Command::Confirm { job_id } => Some((JobCommand::Confirm, job_id)),
            Command::Resume { job_id } => Some((JobCommand::Resume, job_id)),
            Command::Retry { job_id } => Some((JobCommand::Retry, job_id)),
            Command::Pause { job_id } => Some((JobCommand::Pause, job_id)),
            Command::Serve { .. } | Command::Start { .. } | Command::Status { .. } | Command::Watch { .. } => {
                None
            }
        }
    }
}
