use std::thread;
use std::time::Duration;

use crate::job::{ControlFlags, JobContext};
use crate::message::downcast;
use crate::message::types::{WorkCommand, WorkRequestMessage, WorkResponseMessage, WorkStatus};
use crate::topology::NodeId;
use crate::work::WorkItem;

/// What one fetch attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    Item(WorkItem),
    /// Upstream had nothing (yet), or could not be reached within the retry
    /// budget; ask again later.
    Waiting,
    /// Upstream has drained for good.
    Done,
}

/// Polls a (possibly remote) work server through the console from a stage's
/// job thread. Retries are bounded; persistent silence degrades to
/// `Waiting` so the stage keeps its cadence and the caller decides when to
/// give up.
pub struct WorkClient {
    upstream_node: NodeId,
    upstream_job: String,
    retries: u32,
    retry_sleep: Duration,
    timeout: Duration,
}

impl WorkClient {
    pub fn new(upstream_node: NodeId, upstream_job: impl Into<String>) -> Self {
        WorkClient {
            upstream_node,
            upstream_job: upstream_job.into(),
            retries: 3,
            retry_sleep: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn upstream(&self) -> (&NodeId, &str) {
        (&self.upstream_node, &self.upstream_job)
    }

    /// Ask the upstream server for the next unit of work. Checks the
    /// cancellation token between attempts, never mid-request.
    pub fn fetch(&self, ctx: &JobContext, flags: &ControlFlags) -> Fetch {
        for attempt in 0..self.retries {
            if flags.cancelled() || flags.paused() {
                return Fetch::Waiting;
            }

            match self.request(ctx, WorkCommand::Get) {
                Some(response) => match response.status {
                    WorkStatus::Work => match response.item {
                        Some(item) => return Fetch::Item(item),
                        None => {
                            log::warn!(
                                "{}: upstream '{}' sent WORK without an item",
                                ctx.job_name,
                                self.upstream_job
                            );
                            return Fetch::Waiting;
                        }
                    },
                    WorkStatus::Done => return Fetch::Done,
                    // Down covers the window before the upstream job has
                    // registered its server; both are retried from the
                    // stage loop, not here.
                    WorkStatus::Waiting | WorkStatus::Down | WorkStatus::Ok => {
                        return Fetch::Waiting;
                    }
                },
                None => {
                    log::debug!(
                        "{}: no response from upstream '{}' on {} (attempt {}/{})",
                        ctx.job_name,
                        self.upstream_job,
                        self.upstream_node,
                        attempt + 1,
                        self.retries
                    );
                    thread::sleep(self.retry_sleep);
                }
            }
        }
        Fetch::Waiting
    }

    fn request(&self, ctx: &JobContext, command: WorkCommand) -> Option<WorkResponseMessage> {
        let message = WorkRequestMessage {
            job: self.upstream_job.clone(),
            requester: format!("{}:{}", ctx.node, ctx.job_name),
            command,
        };
        let reply = ctx
            .runtime
            .block_on(ctx.console.send_to_node(&message, &self.upstream_node, self.timeout))
            .ok()?;
        downcast::<WorkResponseMessage>(reply.as_ref()).cloned()
    }
}
