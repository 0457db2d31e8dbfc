//! Delayed job scheduling.
//!
//! Spreads one action over many accounts at fixed offsets and keeps an
//! in-memory record of every job.

mod runner;
mod state;

pub use runner::{JobRunner, Reciprocal, StaggerPlan};
pub use state::{JobError, JobId, JobRecord, JobStatus, JobTable};
