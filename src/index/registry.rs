//! # Work Registry
//!
//! One [`WorkIndex`] per distinct work kind, created lazily on first use.

use std::collections::HashMap;
use std::sync::Arc;

use super::work::{WorkDescriptor, WorkIndex};
use crate::config::ClusterConfig;

/// Holds every per-kind [`WorkIndex`], keyed by the descriptor's URI.
///
/// Not thread-safe by itself: the registry is owned by the task-queue worker
/// thread and must only ever be touched from tasks running there.
pub struct WorkRegistry {
    indices: HashMap<String, WorkIndex>,
    cluster_config: ClusterConfig,
}

impl WorkRegistry {
    /// Creates an empty registry with default cluster tuning.
    pub fn new() -> Self {
        Self::with_config(ClusterConfig::default())
    }

    /// Creates an empty registry; new indices use the given cluster tuning.
    pub fn with_config(cluster_config: ClusterConfig) -> Self {
        WorkRegistry {
            indices: HashMap::new(),
            cluster_config,
        }
    }

    /// The index for the given work kind, created on first request.
    ///
    /// Memoized by `work.uri()`: a later call with a different descriptor
    /// instance carrying the same URI returns the existing index.
    pub fn get_or_create(&mut self, work: &Arc<dyn WorkDescriptor>) -> &mut WorkIndex {
        let config = &self.cluster_config;
        self.indices
            .entry(work.uri().to_string())
            .or_insert_with(|| WorkIndex::with_config(work.clone(), config))
    }

    /// The index for a work kind that has already been registered.
    pub fn get(&mut self, uri: &str) -> Option<&mut WorkIndex> {
        self.indices.get_mut(uri)
    }

    /// Iterates over every registered index.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkIndex> {
        self.indices.values_mut()
    }

    /// Number of registered work kinds.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` when no work kind has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl Default for WorkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
