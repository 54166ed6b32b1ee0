//! # Spatial Work Index
//!
//! The incrementally maintained index over available work: a hierarchical
//! clustering structure per work kind ([`cluster::SpatialCluster`]), the
//! per-kind candidate bookkeeping ([`work::WorkIndex`]), and the lazy
//! registry that holds one index per kind ([`registry::WorkRegistry`]).
//!
//! Nothing in this module is synchronized. All mutable state is owned by the
//! task-queue worker thread; see [`crate::task_management`].

pub mod cluster;
pub mod registry;
pub mod work;

pub use cluster::SpatialCluster;
pub use registry::WorkRegistry;
pub use work::{CandidateId, WorkDescriptor, WorkIndex};
