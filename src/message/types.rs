use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::message::{Message, WireMessage};
use crate::node::context::NodeContext;
use crate::work::WorkItem;

/// Liveness probe; answered with a positive `BooleanResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping;

impl WireMessage for Ping {
    const WIRE_ID: u32 = 1;

    fn on_response(&self, _ctx: &NodeContext) -> Option<Box<dyn Message>> {
        Some(Box::new(BooleanResponse { value: true }))
    }
}

/// Generic accepted/rejected reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanResponse {
    pub value: bool,
}

impl BooleanResponse {
    pub fn ack() -> Self {
        BooleanResponse { value: true }
    }
}

impl WireMessage for BooleanResponse {
    const WIRE_ID: u32 = 2;
}

/// Free-form textual reply, used for job status strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub value: String,
}

impl WireMessage for StatusResponse {
    const WIRE_ID: u32 = 3;
}

/// Numeric reply: spawned job ids, unit-counter probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntResponse {
    pub value: i64,
}

impl WireMessage for IntResponse {
    const WIRE_ID: u32 = 4;
}

/// The job command surface. Every command addresses one local job id on the
/// receiving node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCommand {
    Status,
    Pause,
    Resume,
    Bounce,
    Stop,
    Flush,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCommandMessage {
    pub command: JobCommand,
    pub job: u32,
    pub payload: Option<Vec<u8>>,
}

impl JobCommandMessage {
    pub fn new(command: JobCommand, job: u32) -> Self {
        JobCommandMessage { command, job, payload: None }
    }
}

impl WireMessage for JobCommandMessage {
    const WIRE_ID: u32 = 5;

    fn on_response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        use crate::job::manager::CommandOutcome::*;

        let outcome = ctx.manager().handle_command(self.command, self.job, self.payload.as_deref());
        let reply: Box<dyn Message> = match outcome {
            Status(status) => Box::new(StatusResponse { value: status }),
            Accepted(value) => Box::new(BooleanResponse { value }),
            // Addressing a missing job is an expected outcome, not an error:
            // commands report "not accepted", status reports NOT_FOUND.
            NotFound if self.command == JobCommand::Status => {
                Box::new(StatusResponse { value: "NOT_FOUND".to_string() })
            }
            NotFound => Box::new(BooleanResponse { value: false }),
        };
        Some(reply)
    }
}

/// Reads a job's unit counter, `-1` when the job is unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProbeMessage {
    pub job: u32,
}

impl WireMessage for JobProbeMessage {
    const WIRE_ID: u32 = 8;

    fn on_response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        let count = ctx.manager().unit_count(self.job).map(|c| c as i64).unwrap_or(-1);
        Some(Box::new(IntResponse { value: count }))
    }
}

/// Instantiates a registered job type on the receiving node. Replies with the
/// spawned local job id, or `-1` when the type is unknown or construction
/// fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobMessage {
    pub job_type: String,
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl WireMessage for StartJobMessage {
    const WIRE_ID: u32 = 6;

    fn on_response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        let id = ctx.manager().spawn(&self.job_type, &self.name, &self.params);
        Some(Box::new(IntResponse { value: id }))
    }
}

/// Asks a node who it is; answered with the node's own id. Useful for
/// verifying reachability and response ordering against the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyMessage;

impl WireMessage for IdentifyMessage {
    const WIRE_ID: u32 = 10;

    fn on_response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        Some(Box::new(StatusResponse { value: ctx.node().to_string() }))
    }
}

/// Operations a work client may ask of a (remote) work server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkCommand {
    Get,
    Peek,
    AddFirst(WorkItem),
    AddLast(WorkItem),
    Find(i64),
    Delete(i64),
}

/// A work request addressed to the named work job on the receiving node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequestMessage {
    pub job: String,
    pub requester: String,
    pub command: WorkCommand,
}

impl WireMessage for WorkRequestMessage {
    const WIRE_ID: u32 = 7;

    fn on_response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        Some(Box::new(ctx.manager().work_request(&self.job, &self.command)))
    }
}

/// Outcome of a work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    /// A unit of work accompanies the response.
    Work,
    /// The server has drained and no more work will ever arrive.
    Done,
    /// Nothing available right now; ask again later.
    Waiting,
    /// No such work server on this node (not registered, or not serving).
    Down,
    /// Acknowledgement of a mutation request.
    Ok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResponseMessage {
    pub status: WorkStatus,
    pub item: Option<WorkItem>,
}

impl WorkResponseMessage {
    pub fn status(status: WorkStatus) -> Self {
        WorkResponseMessage { status, item: None }
    }

    pub fn work(item: WorkItem) -> Self {
        WorkResponseMessage { status: WorkStatus::Work, item: Some(item) }
    }
}

impl WireMessage for WorkResponseMessage {
    const WIRE_ID: u32 = 9;
}
