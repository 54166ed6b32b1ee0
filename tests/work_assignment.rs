//! End-to-end scenarios for the work index: raw cluster queries, the
//! coordinator offer/claim cycle, and the cross-thread ordering guarantee.

use cgmath::Point3;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use work_index::coordinator::tasks::{FindWorkTask, InvalidateTask};
use work_index::core::MtResource;
use work_index::index::cluster::euclidean;
use work_index::task_management::task::{priority, Task};
use work_index::{
    CandidateId, ClusterConfig, SpatialCluster, TaskQueue, WorkCoordinator, WorkDescriptor,
    WorkRegistry,
};

/// Test work kind backed by a shared table of candidate entries.
struct MiningWork {
    table: MtResource<HashMap<CandidateId, MiningEntry>>,
}

#[derive(Clone)]
struct MiningEntry {
    assignable: bool,
    claimed: bool,
    target: Point3<i32>,
}

impl MiningWork {
    fn new() -> Arc<Self> {
        Arc::new(MiningWork {
            table: MtResource::new(HashMap::new()),
        })
    }

    fn add(&self, candidate: CandidateId, target: Point3<i32>) {
        self.table.get_mut().insert(
            candidate,
            MiningEntry {
                assignable: true,
                claimed: false,
                target,
            },
        );
    }

    fn set_assignable(&self, candidate: CandidateId, assignable: bool) {
        if let Some(entry) = self.table.get_mut().get_mut(&candidate) {
            entry.assignable = assignable;
        }
    }

    fn claim(&self, candidate: CandidateId) {
        if let Some(entry) = self.table.get_mut().get_mut(&candidate) {
            entry.claimed = true;
        }
    }
}

impl WorkDescriptor for MiningWork {
    fn uri(&self) -> &str {
        "test:mine"
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
            .map_or(false, |e| e.assignable && !e.claimed)
    }

    fn target_positions(&self, candidate: CandidateId) -> Vec<Point3<i32>> {
        self.table
            .get()
            .get(&candidate)
            .map_or(Vec::new(), |e| vec![e.target])
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(1)
    }
}

/// Asks the coordinator for work and waits for the worker thread's answer.
fn query(
    coordinator: &WorkCoordinator,
    anchor: Point3<i32>,
    work: Arc<MiningWork>,
    claim: bool,
) -> Option<(CandidateId, Point3<i32>)> {
    let (tx, rx) = channel();
    let claimer = work.clone();
    coordinator.find_work(
        anchor,
        work,
        Box::new(move |offer| {
            if let (true, Some(offer)) = (claim, &offer) {
                claimer.claim(offer.candidate);
            }
            tx.send(offer).unwrap();
            claim
        }),
    );
    rx.recv_timeout(Duration::from_secs(5))
        .expect("no callback from worker")
        .map(|offer| (offer.candidate, offer.position))
}

/// Scenario A: dense insertions, then a spread of queries; every query must
/// come back with a point that was actually inserted, never an empty-tree
/// false negative.
#[test]
fn dense_region_queries_always_find_an_inserted_point() {
    fastrand::seed(42);
    let mut cluster = SpatialCluster::new(8.0, 4);
    let mut points = Vec::new();
    for _ in 0..100 {
        let p = Point3::new(fastrand::i32(0..50), 0, fastrand::i32(0..50));
        cluster.add(p);
        points.push(p);
    }

    for _ in 0..20 {
        let target = Point3::new(fastrand::i32(0..50), 0, fastrand::i32(0..50));
        let leaf = cluster.find_nearest_cluster(target);
        let found = leaf
            .find_nearest(target, euclidean)
            .expect("query came back empty despite 100 indexed points");
        assert!(points.contains(&found));
        assert!((0..50).contains(&found.x) && (0..50).contains(&found.z));
    }
}

/// Scenario B: the nearest candidate is offered first; claiming it narrows
/// the pool so the next query gets the next-nearest one.
#[test]
fn claiming_work_moves_to_the_next_nearest_candidate() {
    let work = MiningWork::new();
    work.add(CandidateId(1), Point3::new(0, 0, 0));
    work.add(CandidateId(2), Point3::new(10, 0, 0));
    work.add(CandidateId(3), Point3::new(100, 0, 0));

    let coordinator = WorkCoordinator::new();
    for id in 1..=3 {
        coordinator.candidate_added(work.clone(), CandidateId(id));
    }

    let anchor = Point3::new(1, 0, 0);
    let first = query(&coordinator, anchor, work.clone(), true).expect("no first offer");
    assert_eq!(first, (CandidateId(1), Point3::new(0, 0, 0)));

    let second = query(&coordinator, anchor, work.clone(), false).expect("no second offer");
    assert_eq!(second, (CandidateId(2), Point3::new(10, 0, 0)));
}

#[test]
fn removed_candidate_is_never_offered() {
    let work = MiningWork::new();
    work.add(CandidateId(1), Point3::new(5, 0, 5));

    let coordinator = WorkCoordinator::new();
    coordinator.candidate_added(work.clone(), CandidateId(1));
    coordinator.candidate_removed(work.clone(), CandidateId(1));

    assert!(query(&coordinator, Point3::new(0, 0, 0), work, false).is_none());
}

/// Holds the worker busy so tasks offered meanwhile pile up in the queue.
struct GateTask {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Task for GateTask {
    fn priority(&self) -> i32 {
        priority::WORLD_CHANGED
    }

    fn name(&self) -> &'static str {
        "gate"
    }

    fn run(&mut self, _registry: &mut WorkRegistry) {
        self.entered.send(()).unwrap();
        let _ = self.release.recv();
    }
}

/// Scenario C: a world invalidation and a find-work query enqueued
/// concurrently from two threads. Whenever both are queued together, the
/// invalidation (priority 0) must be applied before the query (priority 10),
/// so the query never sees the stale candidate.
#[test]
fn concurrent_invalidate_is_always_visible_to_find_work() {
    for _ in 0..10 {
        let work = MiningWork::new();
        let candidate = CandidateId(1);
        work.add(candidate, Point3::new(5, 5, 5));

        // Index the candidate, then invalidate its backing state outside the
        // queue so only the world-changed task can notice.
        let mut registry = WorkRegistry::with_config(ClusterConfig::default());
        let descriptor: Arc<dyn WorkDescriptor> = work.clone();
        registry.get_or_create(&descriptor).update(candidate);
        work.set_assignable(candidate, false);

        let queue = TaskQueue::new(registry);
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        queue.offer(Box::new(GateTask {
            entered: entered_tx,
            release: release_rx,
        }));
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never picked up the gate task");

        let queue = Arc::new(queue);
        let barrier = Arc::new(Barrier::new(2));
        let (offer_tx, offer_rx) = channel();

        let invalidator = {
            let queue = queue.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                queue.offer(Box::new(InvalidateTask));
            })
        };
        let finder = {
            let queue = queue.clone();
            let barrier = barrier.clone();
            let descriptor: Arc<dyn WorkDescriptor> = work.clone();
            thread::spawn(move || {
                barrier.wait();
                queue.offer(Box::new(FindWorkTask::new(
                    Point3::new(0, 0, 0),
                    descriptor,
                    Box::new(move |offer| {
                        offer_tx.send(offer).unwrap();
                        false
                    }),
                )));
            })
        };
        invalidator.join().unwrap();
        finder.join().unwrap();
        release_tx.send(()).unwrap();

        let offer = offer_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("no callback from worker");
        assert!(
            offer.is_none(),
            "find-work observed a candidate the invalidation should have removed"
        );
    }
}
