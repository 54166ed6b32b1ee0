//! # Spatial Cluster
//!
//! This module provides the `SpatialCluster` struct, a node in a recursive
//! k-means-style tree over 3D integer coordinates. The tree indexes the
//! positions of outstanding work targets and answers "which indexed position is
//! near this point?" by greedy descent through child centroids.
//!
//! ## Architecture
//!
//! Each node owns the full set of points assigned to its subtree, plus a cached
//! distance from each point to the centroid of the child it was last assigned
//! to. When a node's maximum cached distance exceeds its split threshold, the
//! node is re-clustered with Lloyd's algorithm: children are seeded near the
//! parent centroid, points are repeatedly reassigned to the nearest child
//! centroid, and centroids are recomputed until they stop moving.
//!
//! ## Laziness
//!
//! Inserts and removals only mark the affected nodes dirty. The tree is
//! rebalanced in one batch the next time a query arrives, amortizing the
//! clustering cost across bursts of world changes. The rebuild walks the tree
//! with an explicit stack so its memory use is bounded regardless of depth.
//!
//! ## Accuracy
//!
//! `find_nearest_cluster` is a coarse, greedy descent: at every level it
//! follows the single child whose centroid is nearest the target. When sibling
//! clusters overlap, the leaf it lands in is not guaranteed to hold the
//! globally nearest point. That trade-off is deliberate — callers re-query
//! every tick, and incremental maintenance stays cheap — but it means the
//! result must be treated as "a near point", not "the nearest point".

use cgmath::{EuclideanSpace, MetricSpace, Point3, Vector3};
use std::collections::HashMap;

/// Cached distance value for a point that has not been assigned to a child
/// centroid since it was inserted. Forces a re-cluster of any split node that
/// received new points.
const UNASSIGNED: f64 = f64::INFINITY;

/// Lloyd iteration stops once the total centroid movement in one pass drops
/// below this.
const CONVERGENCE_LIMIT: f64 = 0.1;

/// Hard cap on Lloyd iterations per split. Convergence normally takes a
/// handful of passes; the cap only guards against oscillating distance ties.
const MAX_LLOYD_ITERATIONS: usize = 32;

/// Default number of children a node splits into.
pub const DEFAULT_FAN_OUT: usize = 4;

/// A node in the hierarchical spatial index.
///
/// The root is created with [`SpatialCluster::new`]; interior and leaf nodes
/// are created internally when a node splits. A node with no children owns all
/// of its points directly and is scanned linearly by [`find_nearest`].
///
/// [`find_nearest`]: SpatialCluster::find_nearest
pub struct SpatialCluster {
    /// Mean position of all points owned by this subtree. Kept incrementally
    /// up to date on add/remove; for a fresh empty child this holds the seed
    /// position chosen during the parent's split.
    centroid: Point3<f64>,
    /// Every point owned by this subtree, mapped to the cached distance to its
    /// assigned child centroid. The cached value is only meaningful while the
    /// node has children.
    owned_points: HashMap<Point3<i32>, f64>,
    children: Vec<SpatialCluster>,
    split_threshold: f64,
    fan_out: usize,
    depth: u32,
    dirty: bool,
}

impl SpatialCluster {
    /// Creates a new empty root cluster.
    ///
    /// # Arguments
    /// * `split_threshold` - Maximum spread (distance from a point to its
    ///   assigned centroid) a node tolerates before re-clustering
    /// * `fan_out` - Number of children a node splits into (at least 2)
    pub fn new(split_threshold: f64, fan_out: usize) -> Self {
        SpatialCluster {
            centroid: Point3::new(0.0, 0.0, 0.0),
            owned_points: HashMap::new(),
            children: Vec::new(),
            split_threshold,
            fan_out: fan_out.max(2),
            depth: 0,
            dirty: false,
        }
    }

    fn child_at(seed: Point3<f64>, split_threshold: f64, fan_out: usize, depth: u32) -> Self {
        SpatialCluster {
            centroid: seed,
            owned_points: HashMap::new(),
            children: Vec::new(),
            split_threshold,
            fan_out,
            depth,
            dirty: false,
        }
    }

    /// Inserts a point into this subtree and marks it dirty.
    ///
    /// The point is not assigned to a child until the next rebuild; until then
    /// it carries an "unassigned" distance sentinel. Inserting a point that is
    /// already present is a no-op.
    pub fn add(&mut self, point: Point3<i32>) {
        if self.owned_points.contains_key(&point) {
            return;
        }
        self.owned_points.insert(point, UNASSIGNED);
        let n = self.owned_points.len() as f64;
        let p = point_to_f64(point);
        self.centroid += (p - self.centroid) / n;
        self.dirty = true;
    }

    /// Removes a point from this node and, recursively, from all children.
    ///
    /// Removing a point that is not present is a no-op and does not mark the
    /// tree dirty.
    pub fn remove(&mut self, point: Point3<i32>) {
        if self.owned_points.remove(&point).is_none() {
            return;
        }
        let n = self.owned_points.len() as f64;
        if n > 0.0 {
            let p = point_to_f64(point);
            self.centroid += (self.centroid - p) / n;
        }
        self.dirty = true;
        for child in &mut self.children {
            child.remove(point);
        }
    }

    /// Number of points owned by this subtree.
    pub fn len(&self) -> usize {
        self.owned_points.len()
    }

    /// Returns `true` when this subtree owns no points.
    pub fn is_empty(&self) -> bool {
        self.owned_points.is_empty()
    }

    /// Mean position of all points owned by this subtree.
    pub fn centroid(&self) -> Point3<f64> {
        self.centroid
    }

    /// Depth of this node; the root is 0.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns `true` when the subtree has unapplied mutations.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebalances every dirty node in the subtree.
    ///
    /// Walks the tree with an explicit stack of child-index paths. Each node
    /// whose maximum point distance exceeds its split threshold is
    /// re-clustered with [`Self::split`]; children that still exceed the
    /// threshold afterwards are pushed back onto the stack. Clears the dirty
    /// flag on the whole subtree once it is balanced.
    pub fn rebuild(&mut self) {
        if !self.dirty {
            return;
        }

        let mut stack: Vec<Vec<usize>> = vec![Vec::new()];
        while let Some(path) = stack.pop() {
            let node = self.node_mut(&path);
            if !node.needs_split() {
                continue;
            }
            node.split();
            for (index, child) in node.children.iter().enumerate() {
                if child.needs_split() {
                    let mut child_path = path.clone();
                    child_path.push(index);
                    stack.push(child_path);
                }
            }
        }

        self.clear_dirty();
    }

    /// Descends to the leaf-most cluster whose centroid chain is nearest to
    /// `target`, rebuilding first if the tree is dirty.
    ///
    /// At each level the single non-empty child with the nearest centroid is
    /// followed. A node with no non-empty children is returned as-is. This is
    /// an approximate search; see the module documentation.
    pub fn find_nearest_cluster(&mut self, target: Point3<i32>) -> &SpatialCluster {
        self.rebuild();

        let target = point_to_f64(target);
        let mut node: &SpatialCluster = self;
        loop {
            let mut best: Option<(usize, f64)> = None;
            for (index, child) in node.children.iter().enumerate() {
                if child.is_empty() {
                    continue;
                }
                let d = child.centroid.distance2(target);
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((index, d));
                }
            }
            match best {
                Some((index, _)) => node = &node.children[index],
                None => return node,
            }
        }
    }

    /// Linear scan of this node's owned points under a caller-supplied metric.
    ///
    /// The metric receives the target and a candidate point and may return
    /// `f64::INFINITY` to veto a point without it being removed from the
    /// index. Returns `None` when the node is empty or every point is vetoed.
    pub fn find_nearest<F>(&self, target: Point3<i32>, metric: F) -> Option<Point3<i32>>
    where
        F: Fn(Point3<i32>, Point3<i32>) -> f64,
    {
        let mut best: Option<(Point3<i32>, f64)> = None;
        for &point in self.owned_points.keys() {
            let d = metric(target, point);
            if !d.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((point, d));
            }
        }
        best.map(|(point, _)| point)
    }

    /// Resolves a child-index path from this node. An empty path is the node
    /// itself.
    fn node_mut(&mut self, path: &[usize]) -> &mut SpatialCluster {
        let mut node = self;
        for &index in path {
            node = &mut node.children[index];
        }
        node
    }

    /// A node needs splitting when it owns at least two points and its
    /// maximum point distance exceeds the split threshold. Childless nodes
    /// measure against their own centroid; split nodes use the cached
    /// per-point distances (a fresh point's sentinel forces a re-cluster).
    fn needs_split(&self) -> bool {
        if self.owned_points.len() < 2 {
            return false;
        }
        self.max_point_distance() > self.split_threshold
    }

    fn max_point_distance(&self) -> f64 {
        if self.children.is_empty() {
            self.owned_points
                .keys()
                .map(|&p| self.centroid.distance(point_to_f64(p)))
                .fold(0.0, f64::max)
        } else {
            self.owned_points.values().fold(0.0, |acc, &d| acc.max(d))
        }
    }

    /// Re-clusters this node's points across its children with Lloyd's
    /// algorithm.
    ///
    /// Missing children (up to `min(fan_out, point_count)`) are seeded at
    /// random positions within ±`split_threshold`/2 of the parent centroid.
    /// Each pass reassigns every owned point to the nearest child centroid,
    /// then recomputes each child's centroid as the mean of its assigned
    /// points; the loop ends once the total centroid movement of one pass
    /// falls below [`CONVERGENCE_LIMIT`].
    fn split(&mut self) {
        let wanted = self.fan_out.min(self.owned_points.len());
        while self.children.len() < wanted {
            let seed = Point3::new(
                self.centroid.x + self.jitter(),
                self.centroid.y + self.jitter(),
                self.centroid.z + self.jitter(),
            );
            self.children.push(SpatialCluster::child_at(
                seed,
                self.split_threshold,
                self.fan_out,
                self.depth + 1,
            ));
        }

        for _ in 0..MAX_LLOYD_ITERATIONS {
            let movement = self.assign_points_to_children();
            if movement < CONVERGENCE_LIMIT {
                break;
            }
        }
    }

    fn jitter(&self) -> f64 {
        (fastrand::f64() - 0.5) * self.split_threshold
    }

    /// One Lloyd pass: reassign every point to the nearest child centroid,
    /// refresh the cached distances, rebuild each child's point set, and
    /// recompute child centroids. Returns the total distance the centroids
    /// moved.
    fn assign_points_to_children(&mut self) -> f64 {
        let old_centroids: Vec<Point3<f64>> =
            self.children.iter().map(|child| child.centroid).collect();

        let mut buckets: Vec<Vec<Point3<i32>>> = vec![Vec::new(); self.children.len()];
        for (&point, cached) in self.owned_points.iter_mut() {
            let p = point_to_f64(point);
            let mut nearest = 0;
            let mut nearest_distance = f64::INFINITY;
            for (index, centroid) in old_centroids.iter().enumerate() {
                let d = centroid.distance(p);
                if d < nearest_distance {
                    nearest = index;
                    nearest_distance = d;
                }
            }
            buckets[nearest].push(point);
            *cached = nearest_distance;
        }

        let mut movement = 0.0;
        for (index, (child, points)) in self.children.iter_mut().zip(buckets).enumerate() {
            child.adopt(points);
            movement += child.centroid.distance(old_centroids[index]);
        }
        movement
    }

    /// Replaces this node's point set with the given points, recomputing the
    /// centroid as their mean. Empty point sets keep the previous centroid so
    /// an unused child retains its seed position. Stale grandchildren are
    /// discarded; the node re-splits later if it still exceeds the threshold.
    fn adopt(&mut self, points: Vec<Point3<i32>>) {
        self.owned_points.clear();
        self.children.clear();
        if points.is_empty() {
            return;
        }

        let mut sum = Vector3::new(0.0, 0.0, 0.0);
        let n = points.len() as f64;
        for point in points {
            sum += point_to_f64(point).to_vec();
            self.owned_points.insert(point, UNASSIGNED);
        }
        self.centroid = Point3::from_vec(sum / n);
        self.dirty = true;
    }

    fn clear_dirty(&mut self) {
        let mut stack: Vec<Vec<usize>> = vec![Vec::new()];
        while let Some(path) = stack.pop() {
            let node = self.node_mut(&path);
            node.dirty = false;
            for index in 0..node.children.len() {
                let mut child_path = path.clone();
                child_path.push(index);
                stack.push(child_path);
            }
        }
    }
}

fn point_to_f64(point: Point3<i32>) -> Point3<f64> {
    Point3::new(point.x as f64, point.y as f64, point.z as f64)
}

/// Euclidean metric for [`SpatialCluster::find_nearest`].
pub fn euclidean(target: Point3<i32>, point: Point3<i32>) -> f64 {
    point_to_f64(target).distance(point_to_f64(point))
}
