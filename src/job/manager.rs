use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::console::Console;
use crate::job::{ControlFlags, Job, JobContext, JobRegistry, JobStatus, StepOutcome};
use crate::message::types::{JobCommand, WorkCommand, WorkResponseMessage, WorkStatus};
use crate::topology::NodeId;
use crate::work::server::{QueueWorkServer, WorkServer};

/// Sleep between loop passes when a job reports `Idle`.
const IDLE_INTERVAL: Duration = Duration::from_millis(20);

/// How often a paused job re-checks its flags while waiting.
const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

const DEFAULT_CHECKPOINT_INTERVAL: u64 = 16;

/// Result of a job command, shaped for the expected-outcome error model:
/// a missing job or refused transition is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Status(String),
    Accepted(bool),
    NotFound,
}

/// Shared, remotely observable state of one job: status under its own lock,
/// the unit counter, and the last durable checkpoint the counter rewinds to
/// on a bounce.
pub struct JobHandle {
    pub id: u32,
    pub uid: String,
    pub name: String,
    status: Mutex<JobStatus>,
    status_changed: Condvar,
    counter: AtomicU64,
    checkpoint: AtomicU64,
    flags: ControlFlags,
    bounce_requested: AtomicBool,
    checkpoint_interval: u64,
}

impl JobHandle {
    fn new(id: u32, name: &str, checkpoint_interval: u64) -> Self {
        JobHandle {
            id,
            uid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: Mutex::new(JobStatus::Initializing),
            status_changed: Condvar::new(),
            counter: AtomicU64::new(0),
            checkpoint: AtomicU64::new(0),
            flags: ControlFlags::new(),
            bounce_requested: AtomicBool::new(false),
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    pub fn units_done(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn set_status(&self, next: JobStatus) {
        *self.status.lock().unwrap() = next;
        self.status_changed.notify_all();
    }

    fn take_bounce(&self) -> bool {
        self.bounce_requested.swap(false, Ordering::SeqCst)
    }

    /// Block the job thread while paused; wakes on resume, stop or bounce.
    fn wait_while_paused(&self) {
        let mut status = self.status.lock().unwrap();
        while self.flags.paused() && !self.flags.cancelled() {
            let (guard, _) = self
                .status_changed
                .wait_timeout(status, PAUSE_CHECK_INTERVAL)
                .unwrap();
            status = guard;
        }
    }
}

type FlushHook = Box<dyn Fn(Option<&[u8]>) -> bool + Send + Sync>;

/// Per-node registry of running jobs. Owns the job state machine: spawns
/// each job's loop on a dedicated thread, applies commands under the job's
/// lock, and retires jobs from the active registry once their thread exits.
pub struct JobManager {
    node: NodeId,
    registry: JobRegistry,
    console: Arc<Console>,
    runtime: tokio::runtime::Handle,
    data_dir: PathBuf,
    next_id: AtomicU32,
    jobs: Mutex<HashMap<u32, Arc<JobHandle>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    work_servers: Mutex<HashMap<String, Arc<QueueWorkServer>>>,
    flush_hooks: Mutex<HashMap<u32, FlushHook>>,
}

impl JobManager {
    pub fn new(
        node: NodeId,
        registry: JobRegistry,
        console: Arc<Console>,
        runtime: tokio::runtime::Handle,
        data_dir: PathBuf,
    ) -> Self {
        JobManager {
            node,
            registry,
            console,
            runtime,
            data_dir,
            next_id: AtomicU32::new(1),
            jobs: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
            work_servers: Mutex::new(HashMap::new()),
            flush_hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Instantiate and start a registered job type. Returns the local job id,
    /// or -1 when the type is unknown or refuses construction.
    pub fn spawn(
        self: &Arc<Self>,
        job_type: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> i64 {
        let Some(job) = self.registry.build(job_type, params) else {
            log::warn!("{}: no job factory produced '{}' ({})", self.node, name, job_type);
            return -1;
        };

        let checkpoint_interval = params
            .get("checkpointInterval")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(JobHandle::new(id, name, checkpoint_interval));
        self.jobs.lock().unwrap().insert(id, handle.clone());

        let ctx = JobContext {
            node: self.node.clone(),
            job_id: id,
            job_name: name.to_string(),
            data_dir: self.data_dir.join(format!("job-{}", id)),
            console: self.console.clone(),
            manager: Arc::clone(self),
            runtime: self.runtime.clone(),
            flags: handle.flags.clone(),
        };

        let manager = Arc::clone(self);
        let thread = thread::Builder::new()
            .name(format!("{}-job-{}", self.node, id))
            .spawn(move || run_job(manager, handle, job, ctx))
            .expect("failed to spawn job thread");
        self.threads.lock().unwrap().push(thread);

        log::info!("{}: registered job '{}' (localId={})", self.node, name, id);
        id as i64
    }

    /// Apply a command to a job, resolving concurrent commands through the
    /// per-job status lock (last writer wins; there is no command queue).
    pub fn handle_command(
        &self,
        command: JobCommand,
        id: u32,
        payload: Option<&[u8]>,
    ) -> CommandOutcome {
        let Some(handle) = self.jobs.lock().unwrap().get(&id).cloned() else {
            log::debug!("{}: command {:?} for unknown job {}", self.node, command, id);
            return CommandOutcome::NotFound;
        };

        match command {
            JobCommand::Status => CommandOutcome::Status(handle.status().name().to_string()),

            JobCommand::Pause => {
                let mut status = handle.status.lock().unwrap();
                match *status {
                    JobStatus::Stopped => CommandOutcome::Accepted(false),
                    JobStatus::Paused => CommandOutcome::Accepted(true),
                    JobStatus::Running => {
                        handle.flags.set_paused(true);
                        *status = JobStatus::Paused;
                        CommandOutcome::Accepted(true)
                    }
                    JobStatus::Initializing => {
                        // takes effect as soon as the loop starts
                        handle.flags.set_paused(true);
                        CommandOutcome::Accepted(true)
                    }
                }
            }

            JobCommand::Resume => {
                let mut status = handle.status.lock().unwrap();
                match *status {
                    JobStatus::Stopped => CommandOutcome::Accepted(false),
                    JobStatus::Running => CommandOutcome::Accepted(true),
                    JobStatus::Paused | JobStatus::Initializing => {
                        handle.flags.set_paused(false);
                        if *status == JobStatus::Paused {
                            *status = JobStatus::Running;
                        }
                        handle.status_changed.notify_all();
                        CommandOutcome::Accepted(true)
                    }
                }
            }

            JobCommand::Bounce => {
                let status = handle.status.lock().unwrap();
                if !status.can_become(JobStatus::Initializing) {
                    return CommandOutcome::Accepted(false);
                }
                handle.bounce_requested.store(true, Ordering::SeqCst);
                handle.flags.request_cancel();
                handle.flags.set_paused(false);
                handle.status_changed.notify_all();
                CommandOutcome::Accepted(true)
            }

            JobCommand::Stop => {
                let mut status = handle.status.lock().unwrap();
                *status = JobStatus::Stopped;
                handle.flags.request_cancel();
                handle.flags.set_paused(false);
                handle.status_changed.notify_all();
                CommandOutcome::Accepted(true)
            }

            JobCommand::Flush => {
                let hooks = self.flush_hooks.lock().unwrap();
                let accepted = match hooks.get(&id) {
                    Some(flush) => flush(payload),
                    None => true,
                };
                CommandOutcome::Accepted(accepted)
            }
        }
    }

    /// Current unit count of an active job.
    pub fn unit_count(&self, id: u32) -> Option<u64> {
        self.jobs.lock().unwrap().get(&id).map(|h| h.units_done())
    }

    pub fn active_jobs(&self) -> Vec<Arc<JobHandle>> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Route a work request to the named work server on this node. A name
    /// nothing registered under answers `Down`; drained servers stay
    /// registered so late requests still observe `Done`.
    pub fn work_request(&self, job_name: &str, command: &WorkCommand) -> WorkResponseMessage {
        let server = self.work_servers.lock().unwrap().get(job_name).cloned();
        match server {
            Some(server) => server.process(command),
            None => WorkResponseMessage::status(WorkStatus::Down),
        }
    }

    /// Expose a work server under a job name; re-registration (e.g. after a
    /// bounce) replaces the previous instance.
    pub fn register_work_server(&self, job_name: &str, server: Arc<QueueWorkServer>) {
        self.work_servers.lock().unwrap().insert(job_name.to_string(), server);
    }

    pub fn register_flush(&self, id: u32, hook: FlushHook) {
        self.flush_hooks.lock().unwrap().insert(id, hook);
    }

    fn retire(&self, id: u32) {
        self.jobs.lock().unwrap().remove(&id);
        self.flush_hooks.lock().unwrap().remove(&id);
        log::info!("{}: retired job {}", self.node, id);
    }

    /// Cancel every job and wait for the job threads to exit.
    pub fn shutdown(&self) {
        for handle in self.active_jobs() {
            handle.flags.request_cancel();
            handle.flags.set_paused(false);
            handle.status_changed.notify_all();
        }
        let threads: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for thread in threads {
            if let Err(e) = thread.join() {
                log::warn!("{}: job thread panicked: {:?}", self.node, e);
            }
        }
    }
}

/// The per-job loop thread: initialize (possibly from a checkpoint), run
/// units until finished/cancelled, honoring pause and bounce requests at
/// unit boundaries only.
fn run_job(manager: Arc<JobManager>, handle: Arc<JobHandle>, mut job: Box<dyn Job>, ctx: JobContext) {
    log::info!("{}: job {} '{}' thread started", ctx.node, handle.id, handle.name);

    'lifecycle: loop {
        // (Re-)initialize from the last durable checkpoint. After a bounce the
        // counter visibly rewinds here: work since the checkpoint is redone.
        let resume_from = handle.checkpoint.load(Ordering::SeqCst);
        handle.counter.store(resume_from, Ordering::SeqCst);
        if !job.initialize(&ctx, resume_from) {
            log::warn!("{}: job {} '{}' failed to initialize", ctx.node, handle.id, handle.name);
            break 'lifecycle;
        }

        {
            let mut status = handle.status.lock().unwrap();
            if status.is_terminal() {
                break 'lifecycle;
            }
            *status = if handle.flags.paused() { JobStatus::Paused } else { JobStatus::Running };
        }

        loop {
            if handle.flags.cancelled() {
                if handle.take_bounce() {
                    log::info!(
                        "{}: bouncing job {} '{}' back to {} units",
                        ctx.node,
                        handle.id,
                        handle.name,
                        handle.checkpoint.load(Ordering::SeqCst)
                    );
                    handle.flags.clear_cancel();
                    handle.set_status(JobStatus::Initializing);
                    continue 'lifecycle;
                }
                break 'lifecycle;
            }

            if handle.flags.paused() {
                handle.wait_while_paused();
                continue;
            }

            match job.next_unit(&ctx, &handle.flags) {
                StepOutcome::Continue => {
                    let done = handle.counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % handle.checkpoint_interval == 0 {
                        handle.checkpoint.store(done, Ordering::SeqCst);
                    }
                }
                StepOutcome::Idle => thread::sleep(IDLE_INTERVAL),
                StepOutcome::Finished => break 'lifecycle,
                StepOutcome::Failed => {
                    log::error!("{}: job {} '{}' failed", ctx.node, handle.id, handle.name);
                    break 'lifecycle;
                }
            }
        }
    }

    handle.set_status(JobStatus::Stopped);
    job.close(&ctx);
    manager.retire(handle.id);
    log::info!("{}: job {} '{}' thread exiting", ctx.node, handle.id, handle.name);
}
