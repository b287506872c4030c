//! Spatial index for nearest-neighbour and ball queries.
//!
//! Partitions 3-D space using a recursive **Octree** whose leaves keep each
//! point together with its index in the source cloud, so query results can
//! be mapped back onto the original ordered point set.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Octree`]   | Spatial index; ball queries and radius-bounded nearest.   |
//!
//! # Example
//!
//! ```rust
//! use imprint_perception::octree::Octree;
//! use nalgebra::Point3;
//!
//! let tree = Octree::from_points(&[
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(0.01, 0.0, 0.0),
//! ]);
//!
//! // Ball query: which reference points lie within 5 mm?
//! assert_eq!(tree.within(&Point3::new(0.012, 0.0, 0.0), 0.005), vec![1]);
//! assert!(!tree.any_within(&Point3::new(0.1, 0.0, 0.0), 0.005));
//! ```

use nalgebra::Point3;

/// Points per leaf before subdivision is attempted.
const DEFAULT_CAPACITY: usize = 16;
/// Subdivision stops at this depth; deeper leaves simply grow.
const DEFAULT_MAX_DEPTH: usize = 10;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Aabb {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// The smallest box enclosing every finite point, grown by `padding` on
    /// each side.  `None` when there is no finite point.
    fn enclosing(points: &[Point3<f64>], padding: f64) -> Option<Self> {
        let mut finite = points.iter().filter(|p| p.coords.iter().all(|c| c.is_finite()));
        let first = *finite.next()?;
        let (min, max) = finite.fold((first, first), |(lo, hi), p| (lo.inf(p), hi.sup(p)));
        let pad = nalgebra::Vector3::repeat(padding);
        Some(Self::new(min - pad, max + pad))
    }

    /// Return the centre point of the box.
    fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// True when the point lies inside or on the boundary of the box.
    fn contains_point(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Squared distance from `p` to the closest point of the box (zero when
    /// `p` is inside).
    fn distance_squared(&self, p: &Point3<f64>) -> f64 {
        (0..3)
            .map(|i| {
                let d = (self.min[i] - p[i]).max(0.0).max(p[i] - self.max[i]);
                d * d
            })
            .sum()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Octree
// ────────────────────────────────────────────────────────────────────────────

/// A recursive spatial index that subdivides 3-D space into eight octants.
///
/// Points are stored in the deepest node whose bounding box still contains
/// them.  Subdividing stops when either
/// - the number of points in a node is ≤ `capacity`, or
/// - `max_depth` levels have already been created.
///
/// The index is read-only once built with [`Octree::from_points`]; query it
/// with [`Octree::within`], [`Octree::any_within`] or
/// [`Octree::nearest_within`].
#[derive(Debug, Clone)]
pub struct Octree {
    root: OctreeNode,
    max_depth: usize,
}

impl Octree {
    /// Empty tree covering `bounds`; `capacity` is the leaf size before
    /// subdivision is attempted.
    fn new(bounds: Aabb, capacity: usize, max_depth: usize) -> Self {
        Self {
            root: OctreeNode::new(bounds, capacity.max(1)),
            max_depth,
        }
    }

    /// Index `points`, tagging each with its position in the slice.
    ///
    /// Non-finite points are skipped and can never be returned by a query.
    pub fn from_points(points: &[Point3<f64>]) -> Self {
        let bounds = Aabb::enclosing(points, 1e-6)
            .unwrap_or_else(|| Aabb::new(Point3::origin(), Point3::origin()));
        let mut tree = Self::new(bounds, DEFAULT_CAPACITY, DEFAULT_MAX_DEPTH);
        for (index, p) in points.iter().enumerate() {
            tree.insert(*p, index);
        }
        tree
    }

    /// Insert a point carrying `index`.
    ///
    /// Points outside the root bounding box are silently ignored.
    fn insert(&mut self, point: Point3<f64>, index: usize) {
        self.root.insert(Entry { point, index }, self.max_depth, 0);
    }

    /// Return the total number of points stored in the tree.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    /// True when the tree contains no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ball query: indices of every stored point within `radius` of `p`,
    /// sorted ascending.
    pub fn within(&self, p: &Point3<f64>, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        self.root.collect_within(p, radius * radius, &mut out);
        out.sort_unstable();
        out
    }

    /// True when at least one stored point lies within `radius` of `p`.
    pub fn any_within(&self, p: &Point3<f64>, radius: f64) -> bool {
        self.root.any_within(p, radius * radius)
    }

    /// The closest stored point to `p` no farther than `radius`, as
    /// `(index, distance)`.
    pub fn nearest_within(&self, p: &Point3<f64>, radius: f64) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        self.root.nearest(p, radius * radius, &mut best);
        best.map(|(index, d2)| (index, d2.sqrt()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OctreeNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Entry {
    point: Point3<f64>,
    index: usize,
}

#[derive(Debug, Clone)]
struct OctreeNode {
    bounds: Aabb,
    capacity: usize,
    /// Entries stored at this node (only non-empty when the node is a leaf).
    entries: Vec<Entry>,
    /// Eight children; `None` while this node is a leaf.
    children: Option<Box<[OctreeNode; 8]>>,
}

impl OctreeNode {
    fn new(bounds: Aabb, capacity: usize) -> Self {
        Self {
            bounds,
            capacity,
            entries: Vec::new(),
            children: None,
        }
    }

    fn count(&self) -> usize {
        match &self.children {
            None => self.entries.len(),
            Some(children) => children.iter().map(|c| c.count()).sum(),
        }
    }

    fn insert(&mut self, entry: Entry, max_depth: usize, depth: usize) {
        if !self.bounds.contains_point(&entry.point) {
            return;
        }

        match self.children.as_mut() {
            None => {
                self.entries.push(entry);
                // Subdivide when over capacity and depth budget remains.
                if self.entries.len() > self.capacity && depth < max_depth {
                    self.subdivide(max_depth, depth);
                }
            }
            Some(children) => {
                if let Some(child) = children
                    .iter_mut()
                    .find(|c| c.bounds.contains_point(&entry.point))
                {
                    child.insert(entry, max_depth, depth + 1);
                }
            }
        }
    }

    fn collect_within(&self, p: &Point3<f64>, r2: f64, out: &mut Vec<usize>) {
        if self.bounds.distance_squared(p) > r2 {
            return;
        }
        match &self.children {
            None => out.extend(
                self.entries
                    .iter()
                    .filter(|e| nalgebra::distance_squared(&e.point, p) <= r2)
                    .map(|e| e.index),
            ),
            Some(children) => {
                for child in children.iter() {
                    child.collect_within(p, r2, out);
                }
            }
        }
    }

    fn any_within(&self, p: &Point3<f64>, r2: f64) -> bool {
        if self.bounds.distance_squared(p) > r2 {
            return false;
        }
        match &self.children {
            None => self
                .entries
                .iter()
                .any(|e| nalgebra::distance_squared(&e.point, p) <= r2),
            Some(children) => children.iter().any(|c| c.any_within(p, r2)),
        }
    }

    /// `best` holds `(index, squared distance)` of the closest entry so far.
    fn nearest(&self, p: &Point3<f64>, r2: f64, best: &mut Option<(usize, f64)>) {
        let bound = best.map_or(r2, |(_, d2)| d2);
        if self.bounds.distance_squared(p) > bound {
            return;
        }
        match &self.children {
            None => {
                for e in &self.entries {
                    let d2 = nalgebra::distance_squared(&e.point, p);
                    let limit = best.map_or(r2, |(_, b)| b);
                    // Ties resolve to the lowest index.
                    let better = d2 < limit
                        || (d2 == limit && best.is_none_or(|(i, _)| e.index < i));
                    if better && d2 <= r2 {
                        *best = Some((e.index, d2));
                    }
                }
            }
            Some(children) => {
                // Visit the octant holding `p` first so the bound tightens early.
                let mut order: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
                order.sort_by(|&a, &b| {
                    children[a]
                        .bounds
                        .distance_squared(p)
                        .total_cmp(&children[b].bounds.distance_squared(p))
                });
                for i in order {
                    children[i].nearest(p, r2, best);
                }
            }
        }
    }

    /// Split this leaf into eight children and redistribute existing entries.
    fn subdivide(&mut self, max_depth: usize, depth: usize) {
        let c = self.bounds.centre();
        let min = self.bounds.min;
        let max = self.bounds.max;

        // Build the eight octant AABBs around the centre point.
        let octants = [
            Aabb::new(min, c),
            Aabb::new(Point3::new(c.x, min.y, min.z), Point3::new(max.x, c.y, c.z)),
            Aabb::new(Point3::new(min.x, c.y, min.z), Point3::new(c.x, max.y, c.z)),
            Aabb::new(Point3::new(c.x, c.y, min.z), Point3::new(max.x, max.y, c.z)),
            Aabb::new(Point3::new(min.x, min.y, c.z), Point3::new(c.x, c.y, max.z)),
            Aabb::new(Point3::new(c.x, min.y, c.z), Point3::new(max.x, c.y, max.z)),
            Aabb::new(Point3::new(min.x, c.y, c.z), Point3::new(c.x, max.y, max.z)),
            Aabb::new(c, max),
        ];

        let cap = self.capacity;
        let mut children = Box::new(octants.map(|b| OctreeNode::new(b, cap)));

        let entries = std::mem::take(&mut self.entries);
        for e in entries {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.contains_point(&e.point)) {
                child.insert(e, max_depth, depth + 1);
            }
        }

        self.children = Some(children);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
