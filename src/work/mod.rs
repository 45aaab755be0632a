pub mod client;
pub mod job;
pub mod partition;
pub mod pool;
pub mod queue;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::job::{ControlFlags, JobContext};
use partition::{PartitionFunction, StringKeyFunction};
use server::QueueWorkServer;

pub use client::WorkClient;
pub use job::WorkJob;
pub use pool::WorkPool;
pub use queue::WorkQueue;

/// One keyed unit of payload moving through a pipeline stage. The key both
/// routes the item to a stable partition and orders/joins it across stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: i64,
    pub payload: Vec<u8>,
}

impl WorkItem {
    pub fn new(key: i64, payload: Vec<u8>) -> Self {
        WorkItem { key, payload }
    }

    pub fn text(key: i64, value: &str) -> Self {
        WorkItem { key, payload: value.as_bytes().to_vec() }
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Stable key-to-partition routing handed to workers that write partitioned
/// output: the same logical key always lands in the same partition, which is
/// what makes later joins and dedup by key possible.
pub struct PartitionRouting {
    pub partitions: usize,
    partition_fn: Box<dyn PartitionFunction>,
    key_fn: Box<dyn StringKeyFunction>,
}

impl PartitionRouting {
    pub fn new(
        partitions: usize,
        partition_fn: Box<dyn PartitionFunction>,
        key_fn: Box<dyn StringKeyFunction>,
    ) -> Self {
        PartitionRouting { partitions, partition_fn, key_fn }
    }

    pub fn route(&self, key: i64) -> usize {
        self.partition_fn.partition(key, self.partitions)
    }

    pub fn key_of(&self, value: &str) -> i64 {
        self.key_fn.key(value)
    }
}

/// The pure transform at the heart of a pipeline stage. A single worker
/// instance is shared by all of a pool's threads, so implementations must
/// synchronize any internal mutable state (e.g. one mutex per output
/// handle).
///
/// `perform_work` returning `false` means the item was not successfully
/// processed; the pipeline records it and moves on. Retry policy, if any,
/// is the worker's own business.
pub trait Worker: Send + Sync {
    fn initialize(&self, _ctx: &JobContext) -> bool {
        true
    }

    fn perform_work(
        &self,
        item: &WorkItem,
        flags: &ControlFlags,
        routing: Option<&PartitionRouting>,
        dest: Option<&QueueWorkServer>,
    ) -> bool;

    fn flush(&self, _payload: Option<&[u8]>) -> bool {
        true
    }

    fn close(&self) {}

    fn status_string(&self) -> Option<String> {
        None
    }
}
