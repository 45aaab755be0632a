use std::sync::Arc;

use crate::job::{ControlFlags, Job, JobContext, StepOutcome};
use crate::topology::NodeId;
use crate::work::client::{Fetch, WorkClient};
use crate::work::pool::{FailedWorkLog, WorkPool};
use crate::work::server::{QueueWorkServer, WorkServer};
use crate::work::{PartitionRouting, WorkItem, Worker};

const DEFAULT_THREADS: usize = 1;
const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// One stage of a work pipeline, run as a job.
///
/// A stage may serve work (a queue fed locally or by its own workers), fetch
/// work from an upstream stage through the console, and transform items with
/// a pool of worker threads. Any combination works, so stages chain:
/// server₁ → client₁/server₂ → client₂/server₃ → … → terminal drain.
///
/// Unit accounting: each item fetched from upstream counts one unit.
pub struct WorkJob {
    seed: Vec<WorkItem>,
    serve: bool,
    seed_complete: bool,
    upstream: Option<(NodeId, String)>,
    worker: Option<Arc<dyn Worker>>,
    num_threads: usize,
    queue_capacity: usize,
    routing: Option<Arc<PartitionRouting>>,

    server: Option<Arc<QueueWorkServer>>,
    client: Option<WorkClient>,
    pool: Option<WorkPool>,
    draining: bool,
}

impl WorkJob {
    pub fn new() -> Self {
        WorkJob {
            seed: Vec::new(),
            serve: false,
            seed_complete: false,
            upstream: None,
            worker: None,
            num_threads: DEFAULT_THREADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            routing: None,
            server: None,
            client: None,
            pool: None,
            draining: false,
        }
    }

    /// Serve a work queue under this job's name.
    pub fn serving(mut self) -> Self {
        self.serve = true;
        self
    }

    /// Serve a queue pre-loaded with a fixed batch; no-more-work is signaled
    /// right after seeding (the batch-producer head of a pipeline).
    pub fn seeded(mut self, items: Vec<WorkItem>) -> Self {
        self.serve = true;
        self.seed = items;
        self.seed_complete = true;
        self
    }

    /// Fetch work from the named work job on an upstream node.
    pub fn fetching_from(mut self, node: NodeId, job_name: impl Into<String>) -> Self {
        self.upstream = Some((node, job_name.into()));
        self
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>, num_threads: usize) -> Self {
        self.worker = Some(worker);
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_routing(mut self, routing: PartitionRouting) -> Self {
        self.routing = Some(Arc::new(routing));
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

impl Default for WorkJob {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for WorkJob {
    fn describe(&self) -> String {
        let role = match (&self.upstream, self.serve) {
            (Some(_), true) => "client+server",
            (Some(_), false) => "client",
            (None, true) => "server",
            (None, false) => "empty",
        };
        format!("WorkJob[{}]", role)
    }

    fn initialize(&mut self, ctx: &JobContext, _resume_from: u64) -> bool {
        // After a bounce the previous pool may still exist; let it drain its
        // already-accepted items, then rebuild everything. In-flight output
        // of the old run is discarded with its old server.
        if let Some(old_pool) = self.pool.take() {
            old_pool.finish();
        }
        self.draining = false;

        if self.upstream.is_some() && self.worker.is_none() {
            log::error!("{}: a fetching stage needs a worker", ctx.job_name);
            return false;
        }

        if self.serve {
            let server = Arc::new(QueueWorkServer::new(ctx.job_name.clone()));
            for item in &self.seed {
                server.add_work(item.clone());
            }
            if self.seed_complete {
                server.set_no_more_work();
            }
            ctx.manager.register_work_server(&ctx.job_name, server.clone());
            self.server = Some(server);
        }

        if let Some(worker) = &self.worker {
            if !worker.initialize(ctx) {
                log::error!("{}: worker refused to initialize", ctx.job_name);
                return false;
            }
            let flush_worker = worker.clone();
            ctx.manager
                .register_flush(ctx.job_id, Box::new(move |payload| flush_worker.flush(payload)));
        }

        if let Some((node, job_name)) = &self.upstream {
            self.client = Some(WorkClient::new(node.clone(), job_name.clone()));
            let worker = self.worker.clone().expect("checked above");
            let failed_log =
                Arc::new(FailedWorkLog::open(&ctx.data_dir.join("failedWork.log")));
            self.pool = Some(WorkPool::start(
                &ctx.job_name,
                self.num_threads,
                self.queue_capacity,
                worker,
                ctx.flags.clone(),
                self.routing.clone(),
                self.server.clone(),
                Some(failed_log),
            ));
        }

        true
    }

    fn next_unit(&mut self, ctx: &JobContext, flags: &ControlFlags) -> StepOutcome {
        if self.draining {
            // wait for downstream stages to empty the served queue
            return match &self.server {
                Some(server) if !server.is_drained() => StepOutcome::Idle,
                _ => StepOutcome::Finished,
            };
        }

        let Some(client) = &self.client else {
            // pure server stage: stays up until its queue is emptied
            return match &self.server {
                Some(server) if !server.is_drained() => StepOutcome::Idle,
                _ => StepOutcome::Finished,
            };
        };

        match client.fetch(ctx, flags) {
            Fetch::Item(item) => {
                let pool = self.pool.as_ref().expect("fetching stage has a pool");
                if !pool.submit(item) {
                    log::warn!("{}: pool rejected a fetched item", ctx.job_name);
                }
                StepOutcome::Continue
            }
            Fetch::Waiting => StepOutcome::Idle,
            Fetch::Done => {
                log::info!("{}: upstream drained; finishing stage", ctx.job_name);
                if let Some(pool) = self.pool.take() {
                    pool.finish();
                }
                if let Some(worker) = &self.worker {
                    worker.flush(None);
                }
                if let Some(server) = &self.server {
                    server.set_no_more_work();
                }
                self.draining = true;
                StepOutcome::Idle
            }
        }
    }

    fn close(&mut self, ctx: &JobContext) {
        if let Some(pool) = self.pool.take() {
            pool.finish();
        }
        if let Some(worker) = &self.worker {
            worker.close();
        }
        log::info!("{}: work stage closed", ctx.job_name);
    }
}
