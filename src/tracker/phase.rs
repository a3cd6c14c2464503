use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine::{MANUAL_GATE_STEP, StepStatus, StepTable};

/// Coarse, UI-facing stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Uploading,
    Analyzing,
    StructureReview,
    Generating,
    Complete,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Uploading => write!(f, "uploading"),
            Phase::Analyzing => write!(f, "analyzing"),
            Phase::StructureReview => write!(f, "structure-review"),
            Phase::Generating => write!(f, "generating"),
            Phase::Complete => write!(f, "complete"),
            Phase::Error => write!(f, "error"),
        }
    }
}

/// A detailed step with no phase assigned. Always a programming error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no phase mapped for detailed step `{0}`")]
pub struct UnmappedStep(pub String);

/// Fixed lookup from detailed step to [`Phase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMap {
    phases: HashMap<String, Phase>,
}

impl PhaseMap {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Phase)>,
        S: Into<String>,
    {
        Self {
            phases: pairs.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        }
    }

    /// Phases for [`StepTable::generation`].
    pub fn generation() -> Self {
        Self::from_pairs([
            ("queued", Phase::Uploading),
            ("uploading", Phase::Uploading),
            ("upload_verifying", Phase::Uploading),
            ("extracting", Phase::Analyzing),
            ("sectioning", Phase::Analyzing),
            ("structure_detecting", Phase::Analyzing),
            (MANUAL_GATE_STEP, Phase::StructureReview),
            ("waiting_for_slot", Phase::Generating),
            ("generating", Phase::Generating),
            ("postprocessing", Phase::Generating),
            ("completed", Phase::Complete),
            ("failed", Phase::Error),
        ])
    }

    pub fn lookup(&self, detailed_step: &str) -> Result<Phase, UnmappedStep> {
        self.phases
            .get(detailed_step)
            .copied()
            .ok_or_else(|| UnmappedStep(detailed_step.to_string()))
    }

    /// Phase of a status response. Terminal statuses win over the step name,
    /// since a cancelled job keeps the step it was cancelled on.
    pub fn phase_for(&self, status: StepStatus, detailed_step: &str) -> Result<Phase, UnmappedStep> {
        match status {
            StepStatus::Completed => Ok(Phase::Complete),
            StepStatus::Failed => Ok(Phase::Error),
            StepStatus::Queued | StepStatus::Processing => self.lookup(detailed_step),
        }
    }

    /// First step of `table` without a phase, if any.
    pub fn check_covers(&self, table: &StepTable) -> Result<(), UnmappedStep> {
        for step in table.steps() {
            self.lookup(&step.detailed_step)?;
        }
        Ok(())
    }
}

impl Default for PhaseMap {
    fn default() -> Self {
        Self::generation()
    }
}
