use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::work::WorkItem;

struct QueueState {
    items: VecDeque<WorkItem>,
    no_more_work: bool,
}

/// Ordered, thread-safe holder of work items for one pipeline stage.
///
/// Items are delivered to consumers in FIFO order relative to insertion (no
/// ordering is promised across concurrently consuming threads). The
/// `no_more_work` flag is set exactly once, after the last item has been
/// added; the queue is then drainable to completion and `is_drained`
/// eventually becomes true.
pub struct WorkQueue {
    name: String,
    capacity: Option<usize>,
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name, None)
    }

    /// A bounded queue: `add` blocks while the queue is full, which is the
    /// pipeline's flow control between a fetching stage loop and its
    /// worker pool.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name, Some(capacity.max(1)))
    }

    fn build(name: impl Into<String>, capacity: Option<usize>) -> Self {
        WorkQueue {
            name: name.into(),
            capacity,
            state: Mutex::new(QueueState { items: VecDeque::new(), no_more_work: false }),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an item, blocking while a bounded queue is at capacity.
    /// Returns false when the queue no longer accepts work.
    pub fn add(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(cap) = self.capacity {
            while state.items.len() >= cap && !state.no_more_work {
                state = self.changed.wait(state).unwrap();
            }
        }
        if state.no_more_work {
            log::warn!("queue '{}' rejected work after no-more-work", self.name);
            return false;
        }
        state.items.push_back(item);
        self.changed.notify_all();
        true
    }

    /// Like `add`, but gives the item back instead of blocking past
    /// `timeout`, so a feeding loop can keep checking its cancellation
    /// token while the queue is full.
    pub fn offer(&self, item: WorkItem, timeout: Duration) -> Result<(), WorkItem> {
        let mut state = self.state.lock().unwrap();
        if let Some(cap) = self.capacity {
            let deadline = Instant::now() + timeout;
            while state.items.len() >= cap && !state.no_more_work {
                let now = Instant::now();
                if now >= deadline {
                    return Err(item);
                }
                let (guard, _) = self.changed.wait_timeout(state, deadline - now).unwrap();
                state = guard;
            }
        }
        if state.no_more_work {
            return Err(item);
        }
        state.items.push_back(item);
        self.changed.notify_all();
        Ok(())
    }

    /// Put an item at the front of the queue (redelivery of reclaimed work).
    pub fn add_first(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.no_more_work {
            return false;
        }
        state.items.push_front(item);
        self.changed.notify_all();
        true
    }

    /// Pop the next item, waiting up to `timeout`. `None` means the wait
    /// timed out or the queue is drained; check `is_drained` to tell the
    /// two apart.
    pub fn next(&self, timeout: Duration) -> Option<WorkItem> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.changed.notify_all();
                return Some(item);
            }
            if state.no_more_work {
                return None;
            }
            let (guard, wait) = self.changed.wait_timeout(state, timeout).unwrap();
            state = guard;
            if wait.timed_out() && state.items.is_empty() {
                return None;
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_next(&self) -> Option<WorkItem> {
        let mut state = self.state.lock().unwrap();
        let item = state.items.pop_front();
        if item.is_some() {
            self.changed.notify_all();
        }
        item
    }

    pub fn peek(&self) -> Option<WorkItem> {
        self.state.lock().unwrap().items.front().cloned()
    }

    pub fn find(&self, key: i64) -> Option<WorkItem> {
        let state = self.state.lock().unwrap();
        state.items.iter().find(|item| item.key == key).cloned()
    }

    pub fn remove(&self, key: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.items.len();
        state.items.retain(|item| item.key != key);
        before != state.items.len()
    }

    /// Signal that no further items will ever arrive. Meant to be called
    /// exactly once; repeated calls are ignored with a warning.
    pub fn set_no_more_work(&self) {
        let mut state = self.state.lock().unwrap();
        if state.no_more_work {
            log::warn!("queue '{}': no-more-work signaled more than once", self.name);
            return;
        }
        state.no_more_work = true;
        self.changed.notify_all();
    }

    pub fn no_more_work(&self) -> bool {
        self.state.lock().unwrap().no_more_work
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once no more work will arrive and everything queued was taken.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.no_more_work && state.items.is_empty()
    }
}
