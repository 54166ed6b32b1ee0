//! # Work Descriptors and the Per-Kind Index
//!
//! This module defines the boundary contract with the entity layer (the
//! [`WorkDescriptor`] trait) and the bookkeeping kept for each distinct kind
//! of work (the [`WorkIndex`] struct).
//!
//! A `WorkIndex` tracks which candidates are currently open (assignable at
//! all) and which subset is requestable (open, unassigned, and offerable
//! right now). Only the requestable subset is mirrored into the spatial
//! cluster: its target positions are what agents search through, and each
//! indexed position maps back to the candidate that owns it.

use cgmath::Point3;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::cluster::SpatialCluster;
use crate::config::ClusterConfig;

/// Opaque identity of an entity eligible to have work performed on it.
///
/// Identities are minted by the entity layer outside this crate; the index
/// only compares and stores them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub u64);

/// Capability object describing one kind of work.
///
/// Implemented by the game layer, one instance per work kind ("break a
/// block", "place a block", ...). All methods are called exclusively on the
/// index worker thread, but the backing state they consult is usually shared
/// with the simulation, so implementations must be `Send + Sync`.
pub trait WorkDescriptor: Send + Sync {
    /// Stable unique identity of this work kind. Two descriptors with equal
    /// URIs are treated as the same kind.
    fn uri(&self) -> &str;

    /// Whether the candidate can have this work performed on it at all.
    fn is_assignable(&self, candidate: CandidateId) -> bool;

    /// Whether the candidate is open, unassigned, and currently offerable.
    fn is_requestable(&self, candidate: CandidateId) -> bool;

    /// The world positions from which this candidate's work can be carried
    /// out. Empty when the candidate has no reachable targets.
    ///
    /// Each position must belong to at most one requestable candidate of a
    /// work kind at a time: the index tracks a single owner per position, and
    /// a later candidate reporting an already-indexed position takes over
    /// ownership of it.
    fn target_positions(&self, candidate: CandidateId) -> Vec<Point3<i32>>;

    /// How long an agent should wait before asking for this kind of work
    /// again after an offer. Surfaced to agents through
    /// [`crate::coordinator::WorkOffer`].
    fn cooldown(&self) -> Duration;
}

/// Bookkeeping for one kind of work.
///
/// Owns the open and requestable candidate sets, the position → candidate
/// map, and one [`SpatialCluster`] indexing only requestable positions.
///
/// Not internally synchronized: every method must be called from the single
/// task-queue worker thread (see [`crate::task_management::TaskQueue`]).
pub struct WorkIndex {
    work: Arc<dyn WorkDescriptor>,
    open: HashSet<CandidateId>,
    requestable: HashSet<CandidateId>,
    position_to_candidate: HashMap<Point3<i32>, CandidateId>,
    cluster: SpatialCluster,
}

impl WorkIndex {
    /// Creates an empty index for the given work kind with default cluster
    /// tuning.
    pub fn new(work: Arc<dyn WorkDescriptor>) -> Self {
        Self::with_config(work, &ClusterConfig::default())
    }

    /// Creates an empty index with explicit cluster tuning.
    pub fn with_config(work: Arc<dyn WorkDescriptor>, config: &ClusterConfig) -> Self {
        WorkIndex {
            work,
            open: HashSet::new(),
            requestable: HashSet::new(),
            position_to_candidate: HashMap::new(),
            cluster: SpatialCluster::new(config.split_threshold, config.fan_out),
        }
    }

    /// The descriptor this index was built for.
    pub fn work(&self) -> &Arc<dyn WorkDescriptor> {
        &self.work
    }

    /// Re-evaluates a candidate against the descriptor's predicates.
    ///
    /// - Not assignable: the candidate is fully removed.
    /// - Assignable but not requestable (claimed, blocked, or cooling down):
    ///   the candidate stays open but its positions are withdrawn from the
    ///   cluster.
    /// - Assignable and requestable: the candidate joins both sets and every
    ///   one of its current target positions is inserted into the cluster and
    ///   the position map, replacing whatever set was indexed before.
    pub fn update(&mut self, candidate: CandidateId) {
        if !self.work.is_assignable(candidate) {
            self.remove(candidate);
            return;
        }

        self.open.insert(candidate);
        if !self.work.is_requestable(candidate) {
            self.remove_requestable(candidate);
            return;
        }

        // Targets may have moved since the last update; withdraw the stale
        // set before indexing the descriptor's current one.
        self.withdraw_positions(candidate);
        self.requestable.insert(candidate);
        for position in self.work.target_positions(candidate) {
            self.cluster.add(position);
            self.position_to_candidate.insert(position, candidate);
        }
        debug!(
            "work {}: candidate {:?} is requestable ({} indexed positions)",
            self.work.uri(),
            candidate,
            self.position_to_candidate.len()
        );
    }

    /// Fully removes a candidate: both sets, and every target position from
    /// the cluster and the position map. Idempotent; removing an absent
    /// candidate is a no-op.
    pub fn remove(&mut self, candidate: CandidateId) {
        self.open.remove(&candidate);
        self.remove_requestable(candidate);
    }

    /// Withdraws a candidate's positions without closing it.
    ///
    /// Used once a candidate has been handed out to a worker: it stays in the
    /// open set (still tracked, no re-scan needed) but is no longer offerable,
    /// which prevents double assignment.
    pub fn remove_requestable(&mut self, candidate: CandidateId) {
        if !self.requestable.remove(&candidate) {
            return;
        }
        self.withdraw_positions(candidate);
    }

    /// Purges every position the candidate owns from the cluster and the
    /// position map. Positions owned by other candidates are untouched.
    fn withdraw_positions(&mut self, candidate: CandidateId) {
        let cluster = &mut self.cluster;
        self.position_to_candidate.retain(|position, owner| {
            if *owner == candidate {
                cluster.remove(*position);
                false
            } else {
                true
            }
        });
    }

    /// Drops the owner record for one indexed position while leaving the
    /// cluster entry behind, simulating index state mutated outside the
    /// worker thread.
    #[cfg(test)]
    pub(crate) fn forget_target(&mut self, position: Point3<i32>) {
        self.position_to_candidate.remove(&position);
    }

    /// Nearest indexed target position to `position`, or `None` when nothing
    /// is requestable. Approximate: cluster-guided descent plus a linear leaf
    /// scan.
    pub fn find_nearest_target(&mut self, position: Point3<i32>) -> Option<Point3<i32>> {
        let leaf = self.cluster.find_nearest_cluster(position);
        leaf.find_nearest(position, super::cluster::euclidean)
    }

    /// Nearest cluster node for `position`, rebuilding the tree if needed.
    pub fn find_nearest_cluster(&mut self, position: Point3<i32>) -> &SpatialCluster {
        self.cluster.find_nearest_cluster(position)
    }

    /// The candidate owning an indexed target position.
    pub fn candidate_for_target(&self, position: Point3<i32>) -> Option<CandidateId> {
        self.position_to_candidate.get(&position).copied()
    }

    /// Whether the candidate is currently open (assignable, possibly claimed).
    pub fn is_open(&self, candidate: CandidateId) -> bool {
        self.open.contains(&candidate)
    }

    /// Whether the candidate is currently offerable.
    pub fn is_requestable(&self, candidate: CandidateId) -> bool {
        self.requestable.contains(&candidate)
    }

    /// Iterates over the open candidates, in no particular order.
    pub fn open_candidates(&self) -> impl Iterator<Item = CandidateId> + '_ {
        self.open.iter().copied()
    }

    /// Number of positions currently indexed.
    pub fn indexed_positions(&self) -> usize {
        self.position_to_candidate.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::MtResource;
    use std::collections::HashMap;

    /// In-memory work kind for tests: a table of candidates with explicit
    /// assignable/requestable flags and target positions.
    pub(crate) struct TableWork {
        pub table: MtResource<HashMap<CandidateId, TableEntry>>,
        uri: String,
    }

    #[derive(Clone)]
    pub(crate) struct TableEntry {
        pub assignable: bool,
        pub requestable: bool,
        pub targets: Vec<Point3<i32>>,
    }

    impl TableWork {
        pub fn new(uri: &str) -> Self {
            TableWork {
                table: MtResource::new(HashMap::new()),
                uri: uri.to_string(),
            }
        }

        pub fn set(&self, candidate: CandidateId, entry: TableEntry) {
            self.table.get_mut().insert(candidate, entry);
        }
    }

    impl WorkDescriptor for TableWork {
        fn uri(&self) -> &str {
            &self.uri
        }

        fn is_assignable(&self, candidate: CandidateId) -> bool {
            self.table
                .get()
                .get(&candidate)
                .map_or(false, |e| e.assignable)
        }

        fn is_requestable(&self, candidate: CandidateId) -> bool {
            self.table
                .get()
                .get(&candidate)
                .map_or(false, |e| e.assignable && e.requestable)
        }

        fn target_positions(&self, candidate: CandidateId) -> Vec<Point3<i32>> {
            self.table
                .get()
                .get(&candidate)
                .map_or(Vec::new(), |e| e.targets.clone())
        }

        fn cooldown(&self) -> Duration {
            Duration::from_secs(3)
        }
    }

    fn open_entry(targets: Vec<Point3<i32>>) -> TableEntry {
        TableEntry {
            assignable: true,
            requestable: true,
            targets,
        }
    }

    #[test]
    fn update_indexes_requestable_targets() {
        let work = Arc::new(TableWork::new("test:dig"));
        let c = CandidateId(1);
        work.set(c, open_entry(vec![Point3::new(3, 0, 0), Point3::new(4, 0, 0)]));

        let mut index = WorkIndex::new(work);
        index.update(c);

        assert!(index.is_open(c));
        assert!(index.is_requestable(c));
        assert_eq!(index.indexed_positions(), 2);
        assert_eq!(index.candidate_for_target(Point3::new(3, 0, 0)), Some(c));
        assert_eq!(index.find_nearest_target(Point3::new(0, 0, 0)), Some(Point3::new(3, 0, 0)));
    }

    #[test]
    fn changed_targets_are_reindexed() {
        let work = Arc::new(TableWork::new("test:dig"));
        let c = CandidateId(3);
        work.set(c, open_entry(vec![Point3::new(3, 0, 0)]));

        let mut index = WorkIndex::new(work.clone());
        index.update(c);

        work.table.get_mut().get_mut(&c).unwrap().targets = vec![Point3::new(50, 0, 0)];
        index.update(c);

        assert_eq!(index.candidate_for_target(Point3::new(50, 0, 0)), Some(c));
        assert_eq!(index.candidate_for_target(Point3::new(3, 0, 0)), None);
        assert_eq!(index.indexed_positions(), 1);
        assert_eq!(index.find_nearest_target(Point3::new(0, 0, 0)), Some(Point3::new(50, 0, 0)));
    }

    #[test]
    fn remove_is_idempotent() {
        let work = Arc::new(TableWork::new("test:dig"));
        let c = CandidateId(1);
        work.set(c, open_entry(vec![Point3::new(1, 2, 3)]));

        let mut index = WorkIndex::new(work);
        index.update(c);
        index.remove(c);
        let positions_after_first = index.indexed_positions();
        index.remove(c);

        assert_eq!(positions_after_first, 0);
        assert_eq!(index.indexed_positions(), 0);
        assert!(!index.is_open(c));
        assert!(index.find_nearest_target(Point3::new(0, 0, 0)).is_none());
    }

    #[test]
    fn remove_requestable_keeps_candidate_open() {
        let work = Arc::new(TableWork::new("test:dig"));
        let c = CandidateId(7);
        work.set(c, open_entry(vec![Point3::new(5, 5, 5)]));

        let mut index = WorkIndex::new(work);
        index.update(c);
        index.remove_requestable(c);

        assert!(index.is_open(c));
        assert!(!index.is_requestable(c));
        assert!(index.find_nearest_target(Point3::new(5, 5, 5)).is_none());
    }

    #[test]
    fn unassignable_candidate_is_fully_removed() {
        let work = Arc::new(TableWork::new("test:dig"));
        let c = CandidateId(2);
        work.set(c, open_entry(vec![Point3::new(9, 0, 0)]));

        let mut index = WorkIndex::new(work.clone());
        index.update(c);

        work.table.get_mut().get_mut(&c).unwrap().assignable = false;
        index.update(c);

        assert!(!index.is_open(c));
        assert_eq!(index.indexed_positions(), 0);
    }

    #[test]
    fn claim_narrowing_leaves_other_candidates_offerable() {
        let work = Arc::new(TableWork::new("test:dig"));
        let a = CandidateId(1);
        let b = CandidateId(2);
        work.set(a, open_entry(vec![Point3::new(0, 0, 0)]));
        work.set(b, open_entry(vec![Point3::new(10, 0, 0)]));

        let mut index = WorkIndex::new(work);
        index.update(a);
        index.update(b);
        index.remove_requestable(a);

        assert_eq!(index.find_nearest_target(Point3::new(1, 0, 0)), Some(Point3::new(10, 0, 0)));
        assert_eq!(index.candidate_for_target(Point3::new(10, 0, 0)), Some(b));
    }
}
