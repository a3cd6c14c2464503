//! Generation job pipeline.
//!
//! A [`JobAuthority`](authority::JobAuthority) owns job state and advances it
//! lazily through a fixed step table; a [`JobTracker`](tracker::JobTracker)
//! polls it and exposes a coarse phase to the application.

pub mod api;
pub mod authority;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod server;
pub mod state_machine;
pub mod tracker;

pub use error::GenpipeError;
