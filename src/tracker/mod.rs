//! Client-side job tracking: polls a [`JobGateway`] and maps each status
//! response onto a coarse [`Phase`].

mod gateway;
mod phase;
mod poller;
mod snapshot;

pub use gateway::JobGateway;
pub use phase::{Phase, PhaseMap, UnmappedStep};
pub use poller::{JobTracker, JobTrackerBuilder, TrackerConfig, TrackerError, TrackerState};
pub use snapshot::JobSnapshot;
