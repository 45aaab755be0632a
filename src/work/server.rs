use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::message::types::{WorkCommand, WorkResponseMessage, WorkStatus};
use crate::work::queue::WorkQueue;
use crate::work::WorkItem;

/// A pipeline stage's serving side: holds keyed items and answers work
/// requests arriving (usually over the wire) from downstream clients.
pub trait WorkServer: Send + Sync {
    fn process(&self, command: &WorkCommand) -> WorkResponseMessage;

    fn set_no_more_work(&self);

    fn pending(&self) -> usize;

    fn is_drained(&self) -> bool;
}

/// In-memory queue-backed work server. Fed locally through `add_work` (or
/// remotely through `AddFirst`/`AddLast` requests); `set_no_more_work` is
/// called exactly once after the last item, after which a drained queue
/// answers `Done` instead of `Waiting`.
pub struct QueueWorkServer {
    queue: WorkQueue,
    served: AtomicU64,
}

impl QueueWorkServer {
    pub fn new(name: impl Into<String>) -> Self {
        QueueWorkServer { queue: WorkQueue::new(name), served: AtomicU64::new(0) }
    }

    pub fn add_work(&self, item: WorkItem) -> bool {
        self.queue.add(item)
    }

    /// Units handed out to clients so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Block briefly waiting for the queue to drain; used by stage shutdown
    /// loops that must not busy-wait.
    pub fn await_drained(&self, wait: Duration) -> bool {
        if self.is_drained() {
            return true;
        }
        std::thread::sleep(wait);
        self.is_drained()
    }
}

impl WorkServer for QueueWorkServer {
    fn process(&self, command: &WorkCommand) -> WorkResponseMessage {
        match command {
            WorkCommand::Get => match self.queue.try_next() {
                Some(item) => {
                    self.served.fetch_add(1, Ordering::SeqCst);
                    WorkResponseMessage::work(item)
                }
                None if self.queue.no_more_work() => WorkResponseMessage::status(WorkStatus::Done),
                None => WorkResponseMessage::status(WorkStatus::Waiting),
            },

            WorkCommand::Peek => match self.queue.peek() {
                Some(item) => WorkResponseMessage::work(item),
                None if self.queue.no_more_work() => WorkResponseMessage::status(WorkStatus::Done),
                None => WorkResponseMessage::status(WorkStatus::Waiting),
            },

            WorkCommand::AddLast(item) => {
                let status =
                    if self.queue.add(item.clone()) { WorkStatus::Ok } else { WorkStatus::Done };
                WorkResponseMessage::status(status)
            }

            WorkCommand::AddFirst(item) => {
                let status =
                    if self.queue.add_first(item.clone()) { WorkStatus::Ok } else { WorkStatus::Done };
                WorkResponseMessage::status(status)
            }

            WorkCommand::Find(key) => match self.queue.find(*key) {
                Some(item) => WorkResponseMessage::work(item),
                None if self.queue.no_more_work() => WorkResponseMessage::status(WorkStatus::Done),
                None => WorkResponseMessage::status(WorkStatus::Waiting),
            },

            WorkCommand::Delete(key) => {
                self.queue.remove(*key);
                WorkResponseMessage::status(WorkStatus::Ok)
            }
        }
    }

    fn set_no_more_work(&self) {
        self.queue.set_no_more_work();
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn is_drained(&self) -> bool {
        self.queue.is_drained()
    }
}
