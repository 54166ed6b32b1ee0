//! # Task Queue
//!
//! This module provides the serialized task queue that funnels every mutation
//! and query against the spatial work index through a single worker thread.
//!
//! ## Architecture Overview
//!
//! - `TaskQueue`: thread-safe priority queue plus one dedicated worker thread
//! - `Task`: a unit of work that runs against the worker-owned [`WorkRegistry`]
//!
//! Producers on any thread enqueue boxed tasks with `offer()`, which never
//! blocks. The worker pops the lowest-priority task (FIFO among equals),
//! runs it, and repeats until it pops a terminate signal. Because the worker
//! is the only code that ever touches the registry, index access needs no
//! further locking and all queued operations observe each other in queue
//! order.
//!
//! ## Ordering Guarantee
//!
//! Tasks execute strictly in ascending priority order among currently queued
//! tasks; equal priorities run in arrival order. There is no dependency
//! tracking beyond this — a caller that needs "mutation X visible to query Y"
//! must enqueue X before Y (the standard priorities make that automatic,
//! since every mutation priority is below [`task::priority::FIND_WORK`]).
//!
//! ## Failure Containment
//!
//! A task that panics is caught, logged, and dropped; the worker keeps
//! draining the queue. One malformed task must not stop all future work
//! assignment.

pub mod task;

use log::{debug, error, info};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::index::WorkRegistry;
use task::{Task, TerminateTask};

/// A queued task together with the ordering key it was enqueued under.
///
/// The priority is sampled once at `offer()` time; the sequence number makes
/// equal-priority ordering stable FIFO.
struct QueuedTask {
    priority: i32,
    seq: u64,
    task: Box<dyn Task>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Reversed so the std max-heap pops the lowest (priority, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
    shut_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Thread-safe priority queue draining onto one dedicated worker thread.
///
/// The worker thread owns the [`WorkRegistry`] passed to [`TaskQueue::new`];
/// it is moved into the thread and can only be reached through tasks.
///
/// Dropping the queue shuts it down: a terminate signal is enqueued at the
/// lowest priority value and the worker is joined. Tasks still queued at that
/// point are discarded, not drained — callers that need pending effects
/// applied should enqueue a final barrier-style query before shutting down.
pub struct TaskQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    /// Spawns the worker thread and hands it ownership of `registry`.
    pub fn new(registry: WorkRegistry) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shut_down: false,
            }),
            available: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("work-index-queue".to_string())
            .spawn(move || worker_loop(worker_shared, registry))
            .expect("failed to spawn work index worker thread");

        info!("work index task queue started");
        TaskQueue {
            shared,
            worker: Some(worker),
        }
    }

    /// Enqueues a task from any thread.
    ///
    /// Never blocks. Returns `false` (and logs at debug level) when the queue
    /// has already been shut down; the task is dropped unexecuted.
    pub fn offer(&self, task: Box<dyn Task>) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.shut_down {
            debug!("rejecting task '{}': queue is shut down", task.name());
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedTask {
            priority: task.priority(),
            seq,
            task,
        });
        drop(state);
        self.shared.available.notify_one();
        true
    }

    /// Marks the queue shut down and enqueues the terminate signal.
    ///
    /// Returns immediately; the worker stops as soon as it pops the signal
    /// (which preempts everything still queued). Later `offer()` calls are
    /// rejected. Idempotent.
    pub fn request_shutdown(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedTask {
            priority: task::priority::SHUTDOWN,
            seq,
            task: Box::new(TerminateTask),
        });
        drop(state);
        self.shared.available.notify_one();
    }

    /// Requests shutdown and joins the worker thread.
    pub fn shutdown(&mut self) {
        self.request_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, mut registry: WorkRegistry) {
    loop {
        let mut entry = {
            let mut state = shared.state.lock().unwrap();
            loop {
                match state.heap.pop() {
                    Some(entry) => break entry,
                    None => state = shared.available.wait(state).unwrap(),
                }
            }
        };

        if entry.task.is_terminate_signal() {
            let discarded = shared.state.lock().unwrap().heap.len();
            info!("work index worker stopping ({} queued tasks discarded)", discarded);
            break;
        }

        let name = entry.task.name();
        debug!("running task '{}' (priority {})", name, entry.priority);
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.task.run(&mut registry)));
        if outcome.is_err() {
            error!("task '{}' panicked and was dropped; worker continues", name);
        }
    }
}
