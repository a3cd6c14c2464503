mod job;
mod state;
mod step;

pub use job::{JobState, RetryPolicy, result_id_for};
pub use state::{CANCELLED_CODE, CANCELLED_MESSAGE, StateMachine};
pub use step::{MANUAL_GATE_STEP, StepDefinition, StepStatus, StepTable, StepTableError};
