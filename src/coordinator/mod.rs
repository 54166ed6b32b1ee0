//! # Work Coordinator
//!
//! This module provides the `WorkCoordinator` struct, the public surface of
//! the crate. It translates lifecycle notifications from the entity layer and
//! find-work requests from agents into prioritized tasks on the serialized
//! queue.
//!
//! ## Data Flow
//!
//! ```text
//! lifecycle notification ─► WorkCoordinator ─► mutation task ─► TaskQueue
//!                                                                  │
//! agent find-work request ─► WorkCoordinator ─► query task ────────┤
//!                                                                  ▼
//!                                                 worker thread: WorkIndex /
//!                                                 SpatialCluster, callback
//! ```
//!
//! ## Callback Threading Contract
//!
//! Find-work callbacks execute on the queue's worker thread, not on the
//! thread that made the request and not synchronized with the simulation
//! loop. A callback that writes state shared with other subsystems is
//! responsible for its own synchronization.

pub mod tasks;

use cgmath::Point3;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::index::{CandidateId, WorkDescriptor, WorkRegistry};
use crate::task_management::TaskQueue;
use tasks::{FindWorkTask, InvalidateTask, RemoveCandidateTask, UpdateCandidateTask};

/// A concrete piece of work offered to an agent.
#[derive(Clone, Debug)]
pub struct WorkOffer {
    /// The candidate the work would be performed on.
    pub candidate: CandidateId,
    /// The target position nearest the agent's anchor.
    pub position: Point3<i32>,
    /// Centroid of the cluster leaf the position came from; a cheap summary
    /// of where the surrounding work is concentrated.
    pub cluster_centroid: Point3<f64>,
    /// Suggested wait before the agent asks for this work kind again.
    pub cooldown: Duration,
}

/// Callback delivering the result of a find-work query.
///
/// Invoked exactly once, on the worker thread. `None` means no work is
/// available (never an error). Returning `true` claims the offer: the
/// candidate stops being offered to other agents until the entity layer
/// reports it changed again.
pub type FindWorkCallback = Box<dyn FnOnce(Option<WorkOffer>) -> bool + Send>;

/// Facade over the task queue and the worker-owned work registry.
///
/// All methods are safe to call from any thread and never block: each one
/// enqueues a task and returns whether the queue accepted it (`false` only
/// after shutdown). Effects become visible to queries in queue order.
pub struct WorkCoordinator {
    queue: TaskQueue,
}

impl WorkCoordinator {
    /// Creates a coordinator with default configuration and starts its
    /// worker thread.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Creates a coordinator with explicit configuration.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        WorkCoordinator {
            queue: TaskQueue::new(WorkRegistry::with_config(config.cluster)),
        }
    }

    /// Notification: a candidate entity appeared.
    pub fn candidate_added(&self, work: Arc<dyn WorkDescriptor>, candidate: CandidateId) -> bool {
        self.queue
            .offer(Box::new(UpdateCandidateTask::new(work, candidate, "candidate-added")))
    }

    /// Notification: a candidate entity became active.
    pub fn candidate_activated(
        &self,
        work: Arc<dyn WorkDescriptor>,
        candidate: CandidateId,
    ) -> bool {
        self.queue.offer(Box::new(UpdateCandidateTask::new(
            work,
            candidate,
            "candidate-activated",
        )))
    }

    /// Notification: a candidate entity's relevant state changed.
    pub fn candidate_changed(&self, work: Arc<dyn WorkDescriptor>, candidate: CandidateId) -> bool {
        self.queue.offer(Box::new(UpdateCandidateTask::new(
            work,
            candidate,
            "candidate-changed",
        )))
    }

    /// Notification: a candidate entity is about to be removed.
    pub fn candidate_removed(&self, work: Arc<dyn WorkDescriptor>, candidate: CandidateId) -> bool {
        self.queue
            .offer(Box::new(RemoveCandidateTask::new(work, candidate)))
    }

    /// Notification: a world region changed in a way that may affect any
    /// candidate. Every open candidate of every work kind is re-evaluated.
    /// Region granularity is not tracked; the re-evaluation is global.
    pub fn world_region_changed(&self) -> bool {
        self.queue.offer(Box::new(InvalidateTask))
    }

    /// Asks for the nearest outstanding work of the given kind.
    ///
    /// `anchor` is the agent's current anchor position. The callback runs on
    /// the worker thread once all previously enqueued mutations have been
    /// applied; see the module documentation for the threading contract.
    pub fn find_work(
        &self,
        anchor: Point3<i32>,
        work: Arc<dyn WorkDescriptor>,
        callback: FindWorkCallback,
    ) -> bool {
        self.queue
            .offer(Box::new(FindWorkTask::new(anchor, work, callback)))
    }

    /// Stops the worker thread. Queued tasks are discarded, not drained;
    /// enqueue a final find-work barrier first if pending effects matter.
    /// Also runs on drop.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
    }
}

impl Default for WorkCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod coordinator_tests {
    use super::*;
    use crate::index::work::tests::{TableEntry, TableWork};
    use std::sync::mpsc::channel;

    fn entry(targets: Vec<Point3<i32>>) -> TableEntry {
        TableEntry {
            assignable: true,
            requestable: true,
            targets,
        }
    }

    #[test]
    fn nearest_candidate_is_offered_and_claim_narrows_the_pool() {
        let work = Arc::new(TableWork::new("test:mine"));
        work.set(CandidateId(1), entry(vec![Point3::new(0, 0, 0)]));
        work.set(CandidateId(2), entry(vec![Point3::new(10, 0, 0)]));
        work.set(CandidateId(3), entry(vec![Point3::new(100, 0, 0)]));

        let coordinator = WorkCoordinator::new();
        for id in 1..=3 {
            coordinator.candidate_added(work.clone(), CandidateId(id));
        }

        let anchor = Point3::new(1, 0, 0);

        let (tx, rx) = channel();
        coordinator.find_work(
            anchor,
            work.clone(),
            Box::new(move |offer| {
                tx.send(offer).unwrap();
                true // claim it
            }),
        );
        let first = rx.recv().unwrap().expect("expected an offer");
        assert_eq!(first.candidate, CandidateId(1));
        assert_eq!(first.position, Point3::new(0, 0, 0));

        let (tx, rx) = channel();
        coordinator.find_work(
            anchor,
            work.clone(),
            Box::new(move |offer| {
                tx.send(offer).unwrap();
                false
            }),
        );
        let second = rx.recv().unwrap().expect("expected a second offer");
        assert_eq!(second.candidate, CandidateId(2));
        assert_eq!(second.position, Point3::new(10, 0, 0));
    }

    #[test]
    fn no_work_reports_empty_offer() {
        let work = Arc::new(TableWork::new("test:mine"));
        let coordinator = WorkCoordinator::new();

        let (tx, rx) = channel();
        coordinator.find_work(
            Point3::new(0, 0, 0),
            work,
            Box::new(move |offer| {
                tx.send(offer.is_none()).unwrap();
                false
            }),
        );
        assert!(rx.recv().unwrap());
    }
}
