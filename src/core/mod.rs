//! # Core Module
//!
//! Shared-state primitives used at the boundary between the index worker
//! thread and the rest of the game.
//!
//! ## Key Components
//! - `MtResource`: Thread-safe reference-counted resource with read-write locking

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` provides synchronized access to a value of type `T` that can be
/// shared across threads. It uses an `Arc<RwLock<T>>` internally.
///
/// Work descriptors typically keep their backing state (block tables, claim
/// maps) in an `MtResource` so the simulation side can mutate it while the
/// index worker thread evaluates predicates against it.
///
/// # Examples
///
/// ```
/// use work_index::core::MtResource;
///
/// let claims = MtResource::new(0u32);
///
/// *claims.get_mut() += 1;
/// assert_eq!(*claims.get(), 1);
/// ```
///
/// # Performance Considerations
/// - Read operations (`get()`) can occur concurrently
/// - Write operations (`get_mut()`) are exclusive and will block other operations
pub struct MtResource<T: Send + Sync> {
    resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync + 'static> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard for the contained value.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap()
    }

    /// Returns a mutable guard for the contained value.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap()
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}
