use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::job::ControlFlags;
use crate::work::queue::WorkQueue;
use crate::work::server::QueueWorkServer;
use crate::work::{PartitionRouting, WorkItem, Worker};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PAUSE_CHECK: Duration = Duration::from_millis(20);

/// Append-only record of items a worker reported failure on. The pipeline
/// does not retry them; the log is for the operator.
pub struct FailedWorkLog {
    file: Mutex<Option<File>>,
}

impl FailedWorkLog {
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = OpenOptions::new().create(true).append(true).open(path);
        if let Err(e) = &file {
            log::warn!("failed-work log '{}' unavailable: {}", path.display(), e);
        }
        FailedWorkLog { file: Mutex::new(file.ok()) }
    }

    pub fn record(&self, item: &WorkItem) {
        let mut guard = self.file.lock().unwrap();
        if let Some(file) = guard.as_mut() {
            let text = item.as_text().unwrap_or("<binary>");
            let _ = writeln!(file, "{}\t{}", item.key, text);
            let _ = file.flush();
        }
    }
}

/// N independently scheduled worker threads draining one stage's inbound
/// queue. The pool's inbound queue is bounded, which back-pressures the
/// stage loop that feeds it.
///
/// A stage is finished only when the upstream said no-more-work, this queue
/// is empty, and every worker thread has returned from its last
/// `perform_work`, which is exactly what `finish` waits for.
pub struct WorkPool {
    inbound: Arc<WorkQueue>,
    flags: ControlFlags,
    threads: Vec<thread::JoinHandle<()>>,
}

const SUBMIT_WAIT: Duration = Duration::from_millis(100);

impl WorkPool {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        pool_id: &str,
        num_threads: usize,
        queue_capacity: usize,
        worker: Arc<dyn Worker>,
        flags: ControlFlags,
        routing: Option<Arc<PartitionRouting>>,
        dest: Option<Arc<QueueWorkServer>>,
        failed_log: Option<Arc<FailedWorkLog>>,
    ) -> Self {
        let inbound = Arc::new(WorkQueue::bounded(format!("{}-inbound", pool_id), queue_capacity));
        let mut threads = Vec::with_capacity(num_threads.max(1));

        for thread_num in 0..num_threads.max(1) {
            let inbound = inbound.clone();
            let worker = worker.clone();
            let flags = flags.clone();
            let routing = routing.clone();
            let dest = dest.clone();
            let failed_log = failed_log.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", pool_id, thread_num))
                .spawn(move || {
                    worker_loop(&inbound, worker.as_ref(), &flags, routing.as_deref(), dest.as_deref(), failed_log.as_deref())
                })
                .expect("failed to spawn pool worker thread");
            threads.push(handle);
        }

        WorkPool { inbound, flags, threads }
    }

    /// Hand an item to the pool. Blocks while the inbound queue is full, but
    /// keeps honoring the cancellation token so a stopped stage never wedges
    /// against idle workers.
    pub fn submit(&self, item: WorkItem) -> bool {
        let mut item = item;
        loop {
            if self.flags.cancelled() {
                return false;
            }
            match self.inbound.offer(item, SUBMIT_WAIT) {
                Ok(()) => return true,
                Err(back) => {
                    if self.inbound.no_more_work() {
                        return false;
                    }
                    item = back;
                }
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.inbound.len()
    }

    /// Signal that no further items will be submitted and block until every
    /// worker thread has returned from its last unit.
    pub fn finish(self) {
        self.inbound.set_no_more_work();
        for handle in self.threads {
            if let Err(e) = handle.join() {
                log::warn!("pool worker thread panicked: {:?}", e);
            }
        }
    }
}

fn worker_loop(
    inbound: &WorkQueue,
    worker: &dyn Worker,
    flags: &ControlFlags,
    routing: Option<&PartitionRouting>,
    dest: Option<&QueueWorkServer>,
    failed_log: Option<&FailedWorkLog>,
) {
    loop {
        if flags.cancelled() {
            break;
        }
        // cooperative pause, only ever between items
        if flags.paused() {
            thread::sleep(PAUSE_CHECK);
            continue;
        }

        match inbound.next(POLL_INTERVAL) {
            Some(item) => {
                if !worker.perform_work(&item, flags, routing, dest) {
                    log::warn!(
                        "queue '{}': work unit {} failed and will not be retried",
                        inbound.name(),
                        item.key
                    );
                    if let Some(log) = failed_log {
                        log.record(&item);
                    }
                }
            }
            None => {
                if inbound.is_drained() {
                    break;
                }
            }
        }
    }
}
