//! Precomputed neighbour lists
//!
//! One immutable snapshot per epoch: every particle's neighbours are stored
//! back to back in a single arena, addressed through an offset table. The
//! snapshot is handed out as `Arc<NeighborLists>` so worker threads share it
//! read-only and never mutate it; a new epoch builds a new snapshot.
//!
//! The list for particle `i` holds exactly the particles `j != i` with
//! `|x_i - x_j| < cutoff(i, j)` as of the build, where `cutoff` is either
//! `radius_scale * (radius_i + radius_j)` or a fixed value.

use rayon::prelude::*;

use super::spatial_hash::SpatialHash;
use super::states::NVec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborEntry {
    pub index: usize,
    pub dist2: f64,
}

/// How the per-pair cutoff distance is chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cutoff {
    /// `radius_scale * (radius_i + radius_j)`
    RadiusScaled(f64),
    /// One distance for every pair
    Fixed(f64),
}

impl Cutoff {
    #[inline]
    pub fn distance(&self, radius_i: f64, radius_j: f64) -> f64 {
        match *self {
            Cutoff::RadiusScaled(scale) => scale * (radius_i + radius_j),
            Cutoff::Fixed(d) => d,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeighborLists {
    offsets: Vec<usize>, // len = n + 1
    entries: Vec<NeighborEntry>,
    epoch: u64,
}

impl NeighborLists {
    /// Build lists for every position in `hash`.
    ///
    /// `radii` must have one entry per filed position; otherwise every list
    /// is empty. The hash is queried with the largest possible cutoff for
    /// particle `i` and then filtered per pair.
    pub fn build(hash: &SpatialHash, radii: &[f64], cutoff: Cutoff) -> Self {
        let positions = hash.positions();
        let n = positions.len();
        if radii.len() != n {
            tracing::warn!(positions = n, radii = radii.len(), "radius count does not match the hash, lists left empty");
            return Self {
                epoch: hash.epoch(),
                ..Self::empty(n)
            };
        }
        let max_radius = radii.iter().copied().fold(0.0_f64, f64::max);

        let per_particle: Vec<Vec<NeighborEntry>> = (0..n)
            .into_par_iter()
            .map_init(Vec::new, |scratch, i| {
                let xi = positions[i];
                let reach = cutoff.distance(radii[i], max_radius);
                hash.candidates_into(&xi, reach, scratch);

                let mut list: Vec<NeighborEntry> = scratch
                    .iter()
                    .copied()
                    .filter(|&j| j != i)
                    .filter_map(|j| {
                        let d: NVec3 = positions[j] - xi;
                        let dist2 = d.norm_squared();
                        let c = cutoff.distance(radii[i], radii[j]);
                        (dist2 < c * c).then_some(NeighborEntry { index: j, dist2 })
                    })
                    .collect();
                list.sort_unstable_by_key(|e| e.index);
                list
            })
            .collect();

        let mut offsets = Vec::with_capacity(n + 1);
        let mut entries = Vec::with_capacity(per_particle.iter().map(Vec::len).sum());
        offsets.push(0);
        for list in per_particle {
            entries.extend(list);
            offsets.push(entries.len());
        }

        Self {
            offsets,
            entries,
            epoch: hash.epoch(),
        }
    }

    /// `n` particles without neighbours, used for degenerate geometry
    pub fn empty(n: usize) -> Self {
        Self {
            offsets: vec![0; n + 1],
            entries: Vec::new(),
            epoch: 0,
        }
    }

    /// Neighbours of particle `i`, sorted by index, self excluded
    #[inline]
    pub fn neighbours(&self, i: usize) -> &[NeighborEntry] {
        match (self.offsets.get(i), self.offsets.get(i + 1)) {
            (Some(&start), Some(&end)) => &self.entries[start..end],
            _ => &[],
        }
    }

    /// Number of particles with a list
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of (i, j) entries
    pub fn pair_count(&self) -> usize {
        self.entries.len()
    }

    /// Epoch of the spatial hash the lists were built from
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
