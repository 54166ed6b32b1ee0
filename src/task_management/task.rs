//! # Task System Core Traits
//!
//! This module defines the unit of serialized work ([`Task`]) and the
//! priority contract that orders tasks on the queue.
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and scheduled via `TaskQueue::offer()`
//! 2. The queue pops tasks in ascending priority order (FIFO within a
//!    priority) on its single worker thread
//! 3. The task's `run()` method executes against the worker-owned
//!    [`WorkRegistry`]
//! 4. The task is discarded; there are no retries and no partial execution
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred to the worker thread
//! - `run()` is the only place index state may be touched

use crate::index::WorkRegistry;

/// Priority values for the standard task kinds. Lower runs first.
///
/// The gap below [`FIND_WORK`] guarantees that every mutation enqueued before
/// a find-work query is applied before that query executes: read-after-write
/// consistency relative to queued order, not wall-clock order.
pub mod priority {
    /// Terminate signal; beats everything so shutdown is prompt.
    pub const SHUTDOWN: i32 = -1;
    /// World-region invalidation.
    pub const WORLD_CHANGED: i32 = 0;
    /// Candidate added, activated, or changed.
    pub const CANDIDATE_CHANGED: i32 = 1;
    /// Candidate about to be removed.
    pub const CANDIDATE_REMOVED: i32 = 2;
    /// Agent find-work query; runs after all pending mutations.
    pub const FIND_WORK: i32 = 10;
}

/// A unit of work serialized onto the index worker thread.
///
/// Tasks are short-lived: created per notification or query, run once, then
/// dropped. Implementations own all the data they need.
pub trait Task: Send {
    /// Queue priority; lower values run first. See [`priority`].
    fn priority(&self) -> i32;

    /// Diagnostic name used in worker logs.
    fn name(&self) -> &'static str;

    /// Executes the task against the worker-owned registry.
    fn run(&mut self, registry: &mut WorkRegistry);

    /// Terminate-signal tasks stop the worker loop instead of running.
    fn is_terminate_signal(&self) -> bool {
        false
    }
}

/// Stops the worker loop. Queued with [`priority::SHUTDOWN`] so it preempts
/// all pending tasks; anything still queued when it pops is discarded.
pub(crate) struct TerminateTask;

impl Task for TerminateTask {
    fn priority(&self) -> i32 {
        priority::SHUTDOWN
    }

    fn name(&self) -> &'static str {
        "terminate"
    }

    fn run(&mut self, _registry: &mut WorkRegistry) {}

    fn is_terminate_signal(&self) -> bool {
        true
    }
}
