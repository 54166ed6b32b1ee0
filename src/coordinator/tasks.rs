//! # Coordinator Tasks
//!
//! The concrete [`Task`] implementations the coordinator enqueues: candidate
//! re-evaluation, candidate removal, whole-world invalidation, and the
//! find-work query.

use cgmath::Point3;
use log::error;
use std::sync::Arc;

use super::{FindWorkCallback, WorkOffer};
use crate::index::cluster::euclidean;
use crate::index::{CandidateId, WorkDescriptor, WorkRegistry};
use crate::task_management::task::{priority, Task};

/// Re-evaluates one candidate against its work descriptor.
///
/// Enqueued for candidate-added, candidate-activated, and candidate-changed
/// notifications; the `name` field records which one for worker logs.
pub struct UpdateCandidateTask {
    work: Arc<dyn WorkDescriptor>,
    candidate: CandidateId,
    name: &'static str,
}

impl UpdateCandidateTask {
    /// Creates a re-evaluation task; `name` is the notification it came from.
    pub fn new(work: Arc<dyn WorkDescriptor>, candidate: CandidateId, name: &'static str) -> Self {
        UpdateCandidateTask {
            work,
            candidate,
            name,
        }
    }
}

impl Task for UpdateCandidateTask {
    fn priority(&self) -> i32 {
        priority::CANDIDATE_CHANGED
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, registry: &mut WorkRegistry) {
        registry.get_or_create(&self.work).update(self.candidate);
    }
}

/// Fully removes one candidate from its work index.
pub struct RemoveCandidateTask {
    work: Arc<dyn WorkDescriptor>,
    candidate: CandidateId,
}

impl RemoveCandidateTask {
    /// Creates a removal task for one candidate of one work kind.
    pub fn new(work: Arc<dyn WorkDescriptor>, candidate: CandidateId) -> Self {
        RemoveCandidateTask { work, candidate }
    }
}

impl Task for RemoveCandidateTask {
    fn priority(&self) -> i32 {
        priority::CANDIDATE_REMOVED
    }

    fn name(&self) -> &'static str {
        "candidate-removed"
    }

    fn run(&mut self, registry: &mut WorkRegistry) {
        // Nothing to remove if the kind was never registered.
        if let Some(index) = registry.get(self.work.uri()) {
            index.remove(self.candidate);
        }
    }
}

/// Re-evaluates every open candidate of every work kind.
///
/// Enqueued on world-region changes. Runs at the lowest normal priority so a
/// burst of invalidations settles before any per-candidate notifications and
/// queries queued behind it.
pub struct InvalidateTask;

impl Task for InvalidateTask {
    fn priority(&self) -> i32 {
        priority::WORLD_CHANGED
    }

    fn name(&self) -> &'static str {
        "world-changed"
    }

    fn run(&mut self, registry: &mut WorkRegistry) {
        for index in registry.iter_mut() {
            let candidates: Vec<CandidateId> = index.open_candidates().collect();
            for candidate in candidates {
                index.update(candidate);
            }
        }
    }
}

/// Resolves the nearest outstanding target for one agent and delivers it
/// through the callback.
///
/// Runs at [`priority::FIND_WORK`], above every mutation priority, so all
/// previously queued index changes are visible to the query.
pub struct FindWorkTask {
    anchor: Point3<i32>,
    work: Arc<dyn WorkDescriptor>,
    callback: Option<FindWorkCallback>,
}

impl FindWorkTask {
    /// Creates a query task for the agent anchored at `anchor`. The callback
    /// is invoked exactly once, on the worker thread.
    pub fn new(anchor: Point3<i32>, work: Arc<dyn WorkDescriptor>, callback: FindWorkCallback) -> Self {
        FindWorkTask {
            anchor,
            work,
            callback: Some(callback),
        }
    }
}

impl Task for FindWorkTask {
    fn priority(&self) -> i32 {
        priority::FIND_WORK
    }

    fn name(&self) -> &'static str {
        "find-work"
    }

    fn run(&mut self, registry: &mut WorkRegistry) {
        let callback = match self.callback.take() {
            Some(callback) => callback,
            None => return,
        };

        let index = registry.get_or_create(&self.work);
        let (target, cluster_centroid) = {
            let leaf = index.find_nearest_cluster(self.anchor);
            (leaf.find_nearest(self.anchor, euclidean), leaf.centroid())
        };

        let position = match target {
            Some(position) => position,
            None => {
                // No work available is a normal outcome, reported as empty.
                callback(None);
                return;
            }
        };

        let candidate = match index.candidate_for_target(position) {
            Some(candidate) => candidate,
            None => {
                // An indexed position must map back to its owning candidate.
                // This indicates a caller mutated state outside the queue;
                // fail fast on the task, keep the worker alive, and still
                // answer the caller so it never waits forever.
                error!(
                    "work {}: indexed position {:?} has no owning candidate, dropping find-work task",
                    self.work.uri(),
                    position
                );
                callback(None);
                return;
            }
        };

        let offer = WorkOffer {
            candidate,
            position,
            cluster_centroid,
            cooldown: self.work.cooldown(),
        };
        if callback(Some(offer)) {
            index.remove_requestable(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::work::tests::{TableEntry, TableWork};
    use std::sync::mpsc::channel;

    #[test]
    fn orphaned_position_still_answers_the_caller() {
        let work = Arc::new(TableWork::new("test:mine"));
        let candidate = CandidateId(1);
        let target = Point3::new(2, 0, 0);
        work.set(
            candidate,
            TableEntry {
                assignable: true,
                requestable: true,
                targets: vec![target],
            },
        );

        // Index the candidate, then corrupt the owner record so the nearest
        // target no longer maps back to anyone.
        let mut registry = WorkRegistry::new();
        let descriptor: Arc<dyn WorkDescriptor> = work;
        registry.get_or_create(&descriptor).update(candidate);
        registry
            .get(descriptor.uri())
            .unwrap()
            .forget_target(target);

        let (tx, rx) = channel();
        let mut task = FindWorkTask::new(
            Point3::new(0, 0, 0),
            descriptor,
            Box::new(move |offer| {
                tx.send(offer.is_none()).unwrap();
                false
            }),
        );
        task.run(&mut registry);

        assert!(rx.recv().expect("callback was never invoked"));
    }
}
