//! Bounded-discipline scan queue for the real-time monitor.
//!
//! Ordering is priority-descending, FIFO within a priority. There is no
//! hard size cap; duplicate suppression keeps the queue from ballooning
//! under editor save-storms: a path already queued at equal-or-higher
//! priority is not enqueued again, and a strictly higher-priority
//! enqueue supersedes the queued one.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub(crate) struct ScanRequest {
    pub path: PathBuf,
    pub priority: u32,
    /// Enqueue order; ties within a priority resolve oldest-first.
    pub seq: u64,
}

impl PartialEq for ScanRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ScanRequest {}

impl Ord for ScanRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower seq (older) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScanRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<ScanRequest>,
    /// Highest priority currently queued per path. Superseded heap
    /// entries stay behind and are dropped lazily at pop time.
    queued: HashMap<PathBuf, u32>,
    next_seq: u64,
    closed: bool,
}

pub(crate) struct ScanQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ScanQueue {
    pub fn new() -> Self {
        ScanQueue {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a path. Returns false when suppressed as a duplicate or
    /// when the queue is closed.
    pub fn push(&self, path: PathBuf, priority: u32) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if let Some(&queued) = state.queued.get(&path) {
            if queued >= priority {
                return false;
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queued.insert(path.clone(), priority);
        state.heap.push(ScanRequest {
            path,
            priority,
            seq,
        });
        drop(state);
        self.available.notify_one();
        true
    }

    /// Block until a request is available or the queue is closed.
    /// Returns `None` on shutdown, dropping any remaining items.
    pub fn pop_blocking(&self) -> Option<ScanRequest> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            // Skip heap entries superseded by a later, higher-priority
            // enqueue of the same path.
            while let Some(req) = state.heap.pop() {
                match state.queued.get(&req.path) {
                    Some(&p) if p == req.priority => {
                        state.queued.remove(&req.path);
                        return Some(req);
                    }
                    _ => continue,
                }
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Live (non-superseded) queue length.
    pub fn len(&self) -> usize {
        self.lock().queued.len()
    }

    /// Wake every waiter for shutdown. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }
}
