//! # Point octree (3D)
//!
//! Auxiliary point-location structure used by the thread-safe velocity
//! sampler: when a query point has no particle inside its smoothing support,
//! the velocity of the nearest particle is returned instead, and finding that
//! particle must not degrade into an O(N) scan per query.
//!
//! ## Layout
//!
//! - Space is recursively subdivided into 8 octants.
//! - Nodes live in one `Vec` and refer to children by index.
//! - Leaves hold up to `LEAF_CAPACITY` points. Leaves at `MAX_DEPTH` hold any
//!   number, so coincident points cannot cause endless subdivision.
//!
//! The tree is immutable once built and is shared read-only between workers.

use super::states::NVec3;

const LEAF_CAPACITY: usize = 8;
const MAX_DEPTH: usize = 24;

/// A single octree node.
///
/// A node is either a leaf (`children` all `None`, points in `points`) or an
/// internal node (`points` empty, at least one child).
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub bbox_min: NVec3,
    pub bbox_max: NVec3,
    pub children: [Option<usize>; 8], // indices into PointOctree::nodes
    pub points: Vec<usize>,           // point indices held by this leaf
}

impl OctreeNode {
    fn leaf(bbox_min: NVec3, bbox_max: NVec3) -> Self {
        Self {
            bbox_min,
            bbox_max,
            children: [None; 8],
            points: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }
}

/// Octree over a snapshot of point positions.
#[derive(Debug, Clone, Default)]
pub struct PointOctree {
    pub nodes: Vec<OctreeNode>,
    pub root: usize,
    positions: Vec<NVec3>,
}

impl PointOctree {
    /// Build the tree over `positions`.
    ///
    /// 1. Compute a cubic bounding box enclosing every point.
    /// 2. Insert each point, splitting leaves that exceed `LEAF_CAPACITY`.
    ///
    /// Non-finite positions are skipped; they can never be the nearest point.
    pub fn build(positions: &[NVec3]) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: 0,
            positions: positions.to_vec(),
        };
        let Some((bbox_min, bbox_max)) = compute_global_bbox(positions) else {
            return tree;
        };
        tree.nodes.push(OctreeNode::leaf(bbox_min, bbox_max));

        for (i, p) in positions.iter().enumerate() {
            if is_finite(p) {
                tree.insert_point(tree.root, i, 0);
            }
        }
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the point closest to `p`, or `None` for an empty tree.
    ///
    /// Descends into the child containing `p` first, then visits the other
    /// children only if their box is closer than the best match so far.
    pub fn nearest(&self, p: &NVec3) -> Option<usize> {
        if self.nodes.is_empty() || !is_finite(p) {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        self.nearest_in(self.root, p, &mut best);
        best.map(|(i, _)| i)
    }

    // helpers ==============================================================================

    fn insert_point(&mut self, node_idx: usize, point_idx: usize, depth: usize) {
        let bbox_min = self.nodes[node_idx].bbox_min;
        let bbox_max = self.nodes[node_idx].bbox_max;

        // Case 1: leaf with room, or too deep to split: store here
        if self.nodes[node_idx].is_leaf() {
            if self.nodes[node_idx].points.len() < LEAF_CAPACITY || depth >= MAX_DEPTH {
                self.nodes[node_idx].points.push(point_idx);
                return;
            }
            // Case 2: full leaf, push its points one level down
            let existing = std::mem::take(&mut self.nodes[node_idx].points);
            for idx in existing {
                self.insert_into_child(node_idx, idx, &bbox_min, &bbox_max, depth);
            }
        }

        // Case 3: internal node, forward to the child octant
        self.insert_into_child(node_idx, point_idx, &bbox_min, &bbox_max, depth);
    }

    fn insert_into_child(&mut self, node_idx: usize, point_idx: usize, bbox_min: &NVec3, bbox_max: &NVec3, depth: usize) {
        let pos = self.positions[point_idx];
        let child_idx = child_index_for_point(&pos, bbox_min, bbox_max);
        let child_node_idx = match self.nodes[node_idx].children[child_idx] {
            Some(idx) => idx,
            None => {
                let (cmin, cmax) = child_bbox(bbox_min, bbox_max, child_idx);
                let new_idx = self.nodes.len();
                self.nodes.push(OctreeNode::leaf(cmin, cmax));
                self.nodes[node_idx].children[child_idx] = Some(new_idx);
                new_idx
            }
        };
        self.insert_point(child_node_idx, point_idx, depth + 1);
    }

    fn nearest_in(&self, node_idx: usize, p: &NVec3, best: &mut Option<(usize, f64)>) {
        let node = &self.nodes[node_idx];
        if let Some((_, best_d2)) = *best {
            if box_distance2(p, &node.bbox_min, &node.bbox_max) > best_d2 {
                return;
            }
        }

        for &idx in &node.points {
            let d2 = (self.positions[idx] - p).norm_squared();
            if best.map_or(true, |(_, b)| d2 < b) {
                *best = Some((idx, d2));
            }
        }

        // the octant containing p is most likely to hold the answer
        let first = child_index_for_point(p, &node.bbox_min, &node.bbox_max);
        if let Some(child) = node.children[first] {
            self.nearest_in(child, p, best);
        }
        for (octant, child) in node.children.iter().enumerate() {
            if octant == first {
                continue;
            }
            if let Some(child_idx) = *child {
                self.nearest_in(child_idx, p, best);
            }
        }
    }
}

// helpers ===========================================================================

fn is_finite(p: &NVec3) -> bool {
    p.x.is_finite() && p.y.is_finite() && p.z.is_finite()
}

/// Cubic bounding box around all finite points, `None` if there are none
fn compute_global_bbox(positions: &[NVec3]) -> Option<(NVec3, NVec3)> {
    let mut min = NVec3::repeat(f64::INFINITY);
    let mut max = NVec3::repeat(f64::NEG_INFINITY);
    let mut any = false;

    for p in positions.iter().filter(|p| is_finite(p)) {
        min = min.inf(p);
        max = max.sup(p);
        any = true;
    }
    if !any {
        return None;
    }

    // expand to a cube, padded so points never sit exactly on the boundary
    let center = (min + max) * 0.5;
    let half = ((max - min) * 0.5).max().max(1e-9) * 1.0001;
    let half = NVec3::repeat(half);
    Some((center - half, center + half))
}

/// Octant of `p`: bit 0 = x, bit 1 = y, bit 2 = z (set when >= center)
fn child_index_for_point(p: &NVec3, bbox_min: &NVec3, bbox_max: &NVec3) -> usize {
    let center = (bbox_min + bbox_max) * 0.5;
    let mut idx = 0;
    if p.x >= center.x { idx |= 1; }
    if p.y >= center.y { idx |= 2; }
    if p.z >= center.z { idx |= 4; }
    idx
}

/// Bounding box of octant `child_idx`, same bit encoding as above
fn child_bbox(parent_min: &NVec3, parent_max: &NVec3, child_idx: usize) -> (NVec3, NVec3) {
    let center = (parent_min + parent_max) * 0.5;
    let mut min = *parent_min;
    let mut max = *parent_max;
    for axis in 0..3 {
        if child_idx & (1 << axis) == 0 {
            max[axis] = center[axis];
        } else {
            min[axis] = center[axis];
        }
    }
    (min, max)
}

/// Squared distance from `p` to the box, zero inside
fn box_distance2(p: &NVec3, bbox_min: &NVec3, bbox_max: &NVec3) -> f64 {
    let mut d2 = 0.0;
    for axis in 0..3 {
        let v = p[axis];
        let d = if v < bbox_min[axis] {
            bbox_min[axis] - v
        } else if v > bbox_max[axis] {
            v - bbox_max[axis]
        } else {
            0.0
        };
        d2 += d * d;
    }
    d2
}
