#![warn(missing_docs)]

//! # Work Index
//!
//! A spatial work-assignment index for voxel worlds.
//!
//! Discrete units of labor ("break this block", "place this block") are
//! scattered across a large, dynamically changing 3D world. This crate
//! answers "which open work item is nearest to this agent?" cheaply and
//! repeatedly while agents and world state keep changing.
//!
//! ## Key Modules
//!
//! * `index` - The hierarchical clustering index over work target positions
//! * `task_management` - The serialized priority queue and its worker thread
//! * `coordinator` - The public facade: notifications in, offers out
//! * `config` - Tuning knobs, loadable from JSON
//! * `core` - Shared-state primitives for descriptor backing stores
//!
//! ## Architecture
//!
//! All mutable index state is owned by a single worker thread; every other
//! thread communicates exclusively by enqueueing prioritized tasks. Mutations
//! carry lower priority values than queries, so any query observes every
//! mutation enqueued before it — read-after-write consistency in queue order.
//!
//! The nearest-work search is deliberately approximate: a greedy descent
//! through cluster centroids followed by a linear scan of one leaf. Agents
//! re-query every tick, so occasional near-misses are cheaper than an exact
//! index would be to maintain incrementally.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cgmath::Point3;
//! use work_index::{CandidateId, WorkCoordinator};
//! # fn descriptor() -> Arc<dyn work_index::WorkDescriptor> { unimplemented!() }
//!
//! let coordinator = WorkCoordinator::new();
//! let dig = descriptor();
//!
//! coordinator.candidate_added(dig.clone(), CandidateId(1));
//! coordinator.find_work(
//!     Point3::new(0, 64, 0),
//!     dig,
//!     Box::new(|offer| {
//!         // runs on the worker thread
//!         offer.is_some()
//!     }),
//! );
//! ```

pub mod config;
pub mod coordinator;
pub mod core;
pub mod index;
pub mod task_management;

pub use config::{ClusterConfig, ConfigError, CoordinatorConfig};
pub use coordinator::{FindWorkCallback, WorkCoordinator, WorkOffer};
pub use index::{CandidateId, SpatialCluster, WorkDescriptor, WorkIndex, WorkRegistry};
pub use task_management::TaskQueue;

use cgmath::Point3;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::MtResource;

/// Runs the demo simulation: a mock block-digging work kind, a scattering of
/// marked blocks, and a handful of agent threads competing for the nearest
/// work until none is left.
///
/// Initializes `env_logger` (reading `RUST_LOG`) and loads `work-index.json`
/// from the working directory when present.
pub fn run_demo() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let config = match CoordinatorConfig::load(Path::new("work-index.json")) {
        Ok(config) => config,
        Err(err) => {
            info!("using default configuration ({})", err);
            CoordinatorConfig::default()
        }
    };

    let dig = Arc::new(DigWork::new());
    let coordinator = Arc::new(WorkCoordinator::with_config(config));

    // Mark a scattering of blocks for digging.
    let block_count = 48;
    for id in 0..block_count {
        let position = Point3::new(fastrand::i32(0..96), 64, fastrand::i32(0..96));
        dig.mark_block(CandidateId(id), position);
        coordinator.candidate_added(dig.clone(), CandidateId(id));
    }
    info!("marked {} blocks for digging", block_count);

    // Agents race for the nearest work from their own anchors.
    let mut agents = Vec::new();
    for agent in 0..4u32 {
        let coordinator = coordinator.clone();
        let dig = dig.clone();
        let anchor = Point3::new(fastrand::i32(0..96), 64, fastrand::i32(0..96));
        agents.push(thread::spawn(move || run_agent(agent, anchor, coordinator, dig)));
    }

    let mut total = 0;
    for agent in agents {
        total += agent.join().unwrap_or(0);
    }
    info!("all agents idle; {} blocks dug in total", total);
}

fn run_agent(
    agent: u32,
    anchor: Point3<i32>,
    coordinator: Arc<WorkCoordinator>,
    dig: Arc<DigWork>,
) -> usize {
    let mut dug = 0;
    loop {
        let (tx, rx) = channel();
        let claimer = dig.clone();
        let accepted = coordinator.find_work(
            anchor,
            dig.clone(),
            Box::new(move |offer| {
                // Worker thread: claim the block in the shared table before
                // reporting the work as taken.
                let claimed = match &offer {
                    Some(offer) => claimer.claim(offer.candidate, agent),
                    None => false,
                };
                let _ = tx.send((offer, claimed));
                claimed
            }),
        );
        if !accepted {
            return dug;
        }

        match rx.recv() {
            Ok((Some(offer), true)) => {
                info!(
                    "agent {}: digging block {:?} at {:?} (cluster around {:?})",
                    agent, offer.candidate, offer.position, offer.cluster_centroid
                );
                dig.finish(offer.candidate);
                coordinator.candidate_removed(dig.clone(), offer.candidate);
                dug += 1;
            }
            Ok((Some(offer), false)) => {
                // Someone else holds the claim; let the index re-evaluate.
                coordinator.candidate_changed(dig.clone(), offer.candidate);
            }
            Ok((None, _)) => {
                info!("agent {}: no work left", agent);
                return dug;
            }
            Err(_) => return dug,
        }
    }
}

struct BlockState {
    position: Point3<i32>,
    claimed_by: Option<u32>,
}

/// Demo work kind: dig marked blocks. Backed by an [`MtResource`] table that
/// the simulation side mutates while the worker thread evaluates predicates.
struct DigWork {
    blocks: MtResource<HashMap<CandidateId, BlockState>>,
}

impl DigWork {
    fn new() -> Self {
        DigWork {
            blocks: MtResource::new(HashMap::new()),
        }
    }

    fn mark_block(&self, candidate: CandidateId, position: Point3<i32>) {
        self.blocks.get_mut().insert(
            candidate,
            BlockState {
                position,
                claimed_by: None,
            },
        );
    }

    fn claim(&self, candidate: CandidateId, agent: u32) -> bool {
        match self.blocks.get_mut().get_mut(&candidate) {
            Some(block) if block.claimed_by.is_none() => {
                block.claimed_by = Some(agent);
                true
            }
            _ => false,
        }
    }

    fn finish(&self, candidate: CandidateId) {
        self.blocks.get_mut().remove(&candidate);
    }
}

impl WorkDescriptor for DigWork {
    fn uri(&self) -> &str {
        "demo:dig"
    }

    fn is_assignable(&self, candidate: CandidateId) -> bool {
        self.blocks.get().contains_key(&candidate)
    }

    fn is_requestable(&self, candidate: CandidateId) -> bool {
        self.blocks
            .get()
            .get(&candidate)
            .map_or(false, |block| block.claimed_by.is_none())
    }

    fn target_positions(&self, candidate: CandidateId) -> Vec<Point3<i32>> {
        self.blocks
            .get()
            .get(&candidate)
            .map_or(Vec::new(), |block| vec![block.position])
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(3)
    }
}
