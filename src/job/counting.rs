use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use crate::job::{ControlFlags, Job, JobContext, StepOutcome};

/// A job that does nothing but count units at a fixed pace. Used to exercise
/// and demonstrate the lifecycle machinery: its unit counter is remotely
/// observable, freezes while paused, and rewinds on a bounce.
#[derive(Debug)]
pub struct CountingJob {
    target: Option<u64>,
    unit_millis: u64,
    done: u64,
}

impl CountingJob {
    pub fn new(target: Option<u64>, unit_millis: u64) -> Self {
        CountingJob { target, unit_millis, done: 0 }
    }

    /// Params: `target` (optional unit total; unbounded when absent) and
    /// `unitMillis` (per-unit processing time, default 10).
    pub fn from_params(params: &BTreeMap<String, String>) -> Self {
        let target = params.get("target").and_then(|v| v.parse().ok());
        let unit_millis = params
            .get("unitMillis")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        CountingJob::new(target, unit_millis)
    }
}

impl Job for CountingJob {
    fn describe(&self) -> String {
        match self.target {
            Some(target) => format!("CountingJob({}/{})", self.done, target),
            None => format!("CountingJob({})", self.done),
        }
    }

    fn initialize(&mut self, _ctx: &JobContext, resume_from: u64) -> bool {
        self.done = resume_from;
        true
    }

    fn next_unit(&mut self, _ctx: &JobContext, _flags: &ControlFlags) -> StepOutcome {
        if let Some(target) = self.target {
            if self.done >= target {
                return StepOutcome::Finished;
            }
        }
        thread::sleep(Duration::from_millis(self.unit_millis));
        self.done += 1;
        StepOutcome::Continue
    }
}
