use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detailed step that suspends time-driven advancement until a confirm.
pub const MANUAL_GATE_STEP: &str = "structure_review";

/// Coarse status reported for every step of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Queued => write!(f, "queued"),
            StepStatus::Processing => write!(f, "processing"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One immutable entry of the ordered step table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub status: StepStatus,
    pub detailed_step: String,
    /// Percentage reported while the job sits on this step (0-100).
    pub progress: u8,
    /// Time the step needs before it may auto-advance. Stands in for an
    /// upstream completion signal.
    pub settle_delay: Duration,
}

impl StepDefinition {
    pub fn new(status: StepStatus, detailed_step: &str, progress: u8, settle_ms: i64) -> Self {
        Self {
            status,
            detailed_step: detailed_step.to_string(),
            progress,
            settle_delay: Duration::milliseconds(settle_ms),
        }
    }

    pub fn is_gate(&self) -> bool {
        self.detailed_step == MANUAL_GATE_STEP
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepTableError {
    #[error("step table must contain at least one step")]
    Empty,

    #[error("step {index} ({step}) reports progress {progress} above 100")]
    ProgressOutOfRange {
        index: usize,
        step: String,
        progress: u8,
    },

    #[error("step {index} ({step}) lowers progress from {previous} to {progress}")]
    ProgressDecreases {
        index: usize,
        step: String,
        previous: u8,
        progress: u8,
    },

    #[error("step {index} ({step}) has a negative settle delay")]
    NegativeDelay { index: usize, step: String },
}

/// The fixed, ordered sequence of steps a job walks through.
///
/// Index position is the only ordering truth. Construction rejects tables
/// whose progress would ever decrease, so `progress` stays a monotonic
/// function of the step index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTable {
    steps: Vec<StepDefinition>,
}

impl StepTable {
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, StepTableError> {
        if steps.is_empty() {
            return Err(StepTableError::Empty);
        }

        let mut previous = 0u8;
        for (index, step) in steps.iter().enumerate() {
            if step.progress > 100 {
                return Err(StepTableError::ProgressOutOfRange {
                    index,
                    step: step.detailed_step.clone(),
                    progress: step.progress,
                });
            }
            if step.progress < previous {
                return Err(StepTableError::ProgressDecreases {
                    index,
                    step: step.detailed_step.clone(),
                    previous,
                    progress: step.progress,
                });
            }
            if step.settle_delay < Duration::zero() {
                return Err(StepTableError::NegativeDelay {
                    index,
                    step: step.detailed_step.clone(),
                });
            }
            previous = step.progress;
        }

        Ok(Self { steps })
    }

    /// The upload → structure extraction → review → generation pipeline.
    pub fn generation() -> Self {
        use StepStatus::*;
        Self {
            steps: vec![
                StepDefinition::new(Queued, "queued", 0, 500),
                StepDefinition::new(Processing, "uploading", 10, 1_500),
                StepDefinition::new(Processing, "upload_verifying", 15, 1_000),
                StepDefinition::new(Processing, "extracting", 25, 2_000),
                StepDefinition::new(Processing, "sectioning", 30, 1_500),
                StepDefinition::new(Processing, "structure_detecting", 40, 2_000),
                StepDefinition::new(Processing, MANUAL_GATE_STEP, 50, 0),
                StepDefinition::new(Processing, "waiting_for_slot", 55, 1_000),
                StepDefinition::new(Processing, "generating", 70, 4_000),
                StepDefinition::new(Processing, "postprocessing", 90, 1_500),
                StepDefinition::new(Completed, "completed", 100, 0),
            ],
        }
    }

    /// Clamp every settle delay to at most `cap`.
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        for step in &mut self.steps {
            if step.settle_delay > cap {
                step.settle_delay = cap;
            }
        }
        self
    }

    pub fn first(&self) -> &StepDefinition {
        // non-empty by construction
        &self.steps[0]
    }

    pub fn get(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }
}

impl Default for StepTable {
    fn default() -> Self {
        Self::generation()
    }
}
