pub mod counting;
pub mod manager;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::console::Console;
use crate::topology::NodeId;

/// The closed set of job states. `Stopped` is terminal; a bounce travels
/// `Running|Paused -> Initializing -> Running` and may rewind the unit
/// counter to the last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
}

impl JobStatus {
    pub fn name(self) -> &'static str {
        match self {
            JobStatus::Initializing => "INITIALIZING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(name: &str) -> Option<JobStatus> {
        match name {
            "INITIALIZING" => Some(JobStatus::Initializing),
            "RUNNING" => Some(JobStatus::Running),
            "PAUSED" => Some(JobStatus::Paused),
            "STOPPED" => Some(JobStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == JobStatus::Stopped
    }

    /// Explicit transition table; commands refuse anything not listed here.
    pub fn can_become(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Initializing, Paused)
                | (Running, Paused)
                | (Running, Initializing)
                | (Paused, Running)
                | (Paused, Initializing)
                | (_, Stopped)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Cooperative cancellation token threaded through job loops and pipeline
/// workers. Both flags are checked at unit boundaries only, so pause/cancel
/// latency is bounded by one unit's processing time.
#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::SeqCst);
    }
}

/// What a job reports after one pass through its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A unit of work completed; the unit counter advances.
    Continue,
    /// Nothing to do right now; the loop sleeps briefly without counting.
    Idle,
    /// All work is done.
    Finished,
    /// The job cannot continue; logged and treated as finished.
    Failed,
}

/// Everything a running job may reach: its identity, a console for talking
/// to other nodes, the manager that owns it, and a runtime handle for
/// blocking on network calls from the job thread.
#[derive(Clone)]
pub struct JobContext {
    pub node: NodeId,
    pub job_id: u32,
    pub job_name: String,
    pub data_dir: PathBuf,
    pub console: Arc<Console>,
    pub manager: Arc<manager::JobManager>,
    pub runtime: tokio::runtime::Handle,
    /// The job's own cancellation token; shared with any worker pools the
    /// job starts so pause/cancel reaches every thread of the stage.
    pub flags: ControlFlags,
}

/// A pausable/resumable/bounceable unit-loop job.
///
/// `initialize` is called before every run of the loop, including after a
/// bounce, with the unit count to resume from (the last durable checkpoint;
/// on a bounce this may be earlier than the progress already made; work
/// since the checkpoint is deliberately redone).
pub trait Job: Send {
    fn describe(&self) -> String;

    fn initialize(&mut self, ctx: &JobContext, resume_from: u64) -> bool;

    fn next_unit(&mut self, ctx: &JobContext, flags: &ControlFlags) -> StepOutcome;

    /// Called once, after the job loop has exited for good.
    fn close(&mut self, _ctx: &JobContext) {}
}

type JobFactory =
    Box<dyn Fn(&BTreeMap<String, String>) -> Option<Box<dyn Job>> + Send + Sync>;

/// Explicit name-to-factory table consulted when a `StartJobMessage`
/// arrives; registering a job type is a call, not a dynamic class load.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, job_type: &str, factory: F)
    where
        F: Fn(&BTreeMap<String, String>) -> Option<Box<dyn Job>> + Send + Sync + 'static,
    {
        self.factories.insert(job_type.to_string(), Box::new(factory));
    }

    pub fn build(&self, job_type: &str, params: &BTreeMap<String, String>) -> Option<Box<dyn Job>> {
        self.factories.get(job_type)?(params)
    }
}

/// Registry with the crate's built-in job types.
pub fn standard_jobs() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register("counting", |params| {
        Some(Box::new(counting::CountingJob::from_params(params)))
    });
    registry
}
