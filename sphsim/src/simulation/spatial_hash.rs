//! Uniform-grid spatial hash for neighbour queries
//!
//! Space is cut into cubic cells of side `cell_width`. Every particle is
//! filed under the cell containing its position at the last `rebuild`; the
//! hash keeps a copy of those positions so queries within one epoch always
//! see the same geometry, even if the caller moves particles afterwards.
//!
//! Queries walk the ring of cells whose Chebyshev distance covers the query
//! radius, so any radius works, not only radii up to one cell.
//!
//! Rebuild needs `&mut self`. After it, any number of threads may query
//! through `&self`; the read path takes no locks.

use std::collections::HashMap;

use super::states::NVec3;

type CellKey = (i64, i64, i64);

#[derive(Debug, Clone, Default)]
pub struct SpatialHash {
    cell_width: f64,
    inv_cell_width: f64,
    cells: HashMap<CellKey, Vec<usize>>,
    positions: Vec<NVec3>, // positions as of the last rebuild
    epoch: u64,
}

impl SpatialHash {
    /// Empty hash with the given cell width
    pub fn new(cell_width: f64) -> Self {
        let mut hash = Self::default();
        hash.set_cell_width(cell_width);
        hash
    }

    /// Clear and refile every position. O(N).
    ///
    /// A non-positive or non-finite `cell_width` leaves the hash empty, and
    /// every query on it returns nothing.
    pub fn rebuild(&mut self, positions: &[NVec3], cell_width: f64) {
        self.set_cell_width(cell_width);
        // keep bucket allocations across epochs
        for bucket in self.cells.values_mut() {
            bucket.clear();
        }
        self.positions.clear();
        self.epoch += 1;

        if !self.is_valid() {
            return;
        }

        self.positions.extend_from_slice(positions);
        for (i, p) in positions.iter().enumerate() {
            let key = self.cell_of(p);
            self.cells.entry(key).or_default().push(i);
        }

        // drop buckets left empty by particles that moved away
        self.cells.retain(|_, bucket| !bucket.is_empty());
    }

    /// File one more point; its index is the next position slot
    pub fn insert(&mut self, p: NVec3) -> usize {
        let i = self.positions.len();
        self.positions.push(p);
        if self.is_valid() {
            let key = self.cell_of(&p);
            self.cells.entry(key).or_default().push(i);
        }
        i
    }

    /// Indices of filed points within `radius` of `point` (exact distance)
    pub fn query(&self, point: &NVec3, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        self.query_into(point, radius, &mut out);
        out
    }

    /// Same as [`SpatialHash::query`], appending into a reused buffer.
    /// `out` is cleared first.
    pub fn query_into(&self, point: &NVec3, radius: f64, out: &mut Vec<usize>) {
        out.clear();
        let r2 = radius * radius;
        self.for_each_candidate(point, radius, |j| {
            let d = self.positions[j] - point;
            if d.norm_squared() <= r2 {
                out.push(j);
            }
        });
    }

    /// Every index in the cells covering `radius` around `point`, unfiltered.
    /// `out` is cleared first.
    pub fn candidates_into(&self, point: &NVec3, radius: f64, out: &mut Vec<usize>) {
        out.clear();
        self.for_each_candidate(point, radius, |j| out.push(j));
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    /// Number of filed points
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of rebuilds so far
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Positions as filed by the last rebuild
    pub fn positions(&self) -> &[NVec3] {
        &self.positions
    }

    pub fn is_valid(&self) -> bool {
        self.cell_width > 0.0 && self.cell_width.is_finite()
    }

    // helpers ==============================================================================

    fn set_cell_width(&mut self, cell_width: f64) {
        self.cell_width = cell_width;
        self.inv_cell_width = if cell_width > 0.0 && cell_width.is_finite() {
            cell_width.recip()
        } else {
            0.0
        };
    }

    #[inline]
    fn cell_of(&self, p: &NVec3) -> CellKey {
        (
            (p.x * self.inv_cell_width).floor() as i64,
            (p.y * self.inv_cell_width).floor() as i64,
            (p.z * self.inv_cell_width).floor() as i64,
        )
    }

    /// Call `visit` for every index in the cells covering `radius` around `point`
    pub fn for_each_candidate(&self, point: &NVec3, radius: f64, mut visit: impl FnMut(usize)) {
        if !self.is_valid() || self.cells.is_empty() || !(radius >= 0.0) || !radius.is_finite() {
            return;
        }
        let (cx, cy, cz) = self.cell_of(point);
        // rings of cells needed to cover the radius in every axis
        let k = (radius * self.inv_cell_width).ceil() as i64;

        // for huge radii scanning the buckets beats walking empty cells
        let ring_cells = k.saturating_mul(2).saturating_add(1).saturating_pow(3) as u128;
        if ring_cells > self.cells.len() as u128 {
            for (&(x, y, z), bucket) in &self.cells {
                if x.abs_diff(cx) <= k as u64 && y.abs_diff(cy) <= k as u64 && z.abs_diff(cz) <= k as u64 {
                    bucket.iter().for_each(|&j| visit(j));
                }
            }
            return;
        }

        for dz in -k..=k {
            for dy in -k..=k {
                for dx in -k..=k {
                    if let Some(bucket) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) {
                        bucket.iter().for_each(|&j| visit(j));
                    }
                }
            }
        }
    }
}
