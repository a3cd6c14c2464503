//! Interface de terminal do genpipe: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para estilização
//! com cores. O [`JobProgress`] acompanha visualmente um job rastreado.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use genpipe::api::StatusResponse;
use genpipe::tracker::{JobSnapshot, Phase};

/// Indicador de progresso para um job rastreado no terminal.
///
/// Verde para conclusão, vermelho para erros do job e amarelo para avisos
/// que pedem a atenção do usuário.
pub struct JobProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia a barra com o id do job, antes do primeiro status.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(format!("{job_id}: waiting for first status"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza posição e mensagem a partir do snapshot mais recente.
    pub fn update(&self, snapshot: &JobSnapshot) {
        self.pb.set_position(u64::from(snapshot.progress));
        self.pb.set_message(describe(snapshot));
    }

    /// Imprime uma linha acima da barra sem interrompê-la.
    pub fn notice(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("!")));
    }

    /// Finaliza a barra e exibe o id do resultado.
    pub fn complete(&self, snapshot: &JobSnapshot) {
        self.pb.finish_and_clear();
        let result = snapshot.result_id.as_deref().unwrap_or("-");
        println!(
            "  {} Job {} completed, result {result}",
            self.green.apply_to("✓"),
            snapshot.job_id
        );
    }

    pub fn error(&self, message: &str, code: &str) {
        self.pb.abandon();
        println!("  {} {message} ({code})", self.red.apply_to("✗"));
    }

    pub fn abandon(&self) {
        self.pb.abandon_with_message("stopped watching");
    }
}

/// Descrição em uma linha: fase, etapa detalhada e marcadores de pausa e revisão.
pub fn describe(snapshot: &JobSnapshot) -> String {
    let mut line = format!("{} · {}", snapshot.phase, snapshot.detailed_step);
    if snapshot.paused {
        line.push_str(" (paused)");
    }
    if snapshot.phase == Phase::StructureReview {
        line.push_str(" (awaiting confirmation)");
    }
    line
}

/// Exibe uma resposta de status como JSON formatado, colorido pelo status.
pub fn print_status(status: &StatusResponse) {
    let style = match status.status {
        genpipe::state_machine::StepStatus::Completed => Style::new().green().bold(),
        genpipe::state_machine::StepStatus::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!("{}", style.apply_to(format!("─── {} ───", status.job_id)));
    println!("{}", serde_json::to_string_pretty(status).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: Phase, step: &str, paused: bool) -> JobSnapshot {
        JobSnapshot {
            job_id: "job-1".into(),
            phase,
            detailed_step: step.into(),
            progress: 50,
            result_id: None,
            error_code: None,
            error_message: None,
            paused,
        }
    }

    #[test]
    fn describe_shows_phase_and_step() {
        assert_eq!(describe(&snapshot(Phase::Analyzing, "sectioning", false)), "analyzing · sectioning");
    }

    #[test]
    fn describe_marks_paused_and_gate() {
        assert_eq!(
            describe(&snapshot(Phase::StructureReview, "structure_review", true)),
            "structure-review · structure_review (paused) (awaiting confirmation)"
        );
    }
}
