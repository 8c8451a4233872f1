//! Batch job trait.
//!
//! RULE: A batch job never holds a unit of work across items.
//! `run` opens one unit of work per due item; a failing item is logged,
//! counted and skipped so it cannot block the rest of the batch.

use crate::error::LedgerResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;

/// The contract every scheduled job must fulfill.
pub trait BatchJob: Send {
    /// Unique stable name, also the trigger name.
    fn name(&self) -> &'static str;

    /// Process every item due at `now`. Safe to call again at any time:
    /// items already handled are no longer due.
    fn run(&self, now: DateTime<Utc>) -> LedgerResult<JobReport>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: String,
    /// Items changed by this run.
    pub processed: u32,
    /// Items that were no longer due when their unit of work began.
    pub skipped: u32,
    /// Items whose unit of work rolled back.
    pub failed: u32,
}

impl JobReport {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Self::default()
        }
    }
}
