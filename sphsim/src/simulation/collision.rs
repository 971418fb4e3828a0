//! Collision surfaces and impact response
//!
//! A penetrating particle is pushed back to the surface along the impact
//! normal and its velocity is reflected:
//! - normal component: `v_n' = -restitution * v_n` (only when moving inward)
//! - tangential component: scaled by `1 - friction`
//!
//! The integrator applies this once per stage, after the stage state is
//! formed and before the next force evaluation, and once more on commit.

use rayon::prelude::*;

use super::states::NVec3;

/// Bounce parameters shared by all colliders of a set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactResponse {
    pub restitution: f64,
    pub friction: f64,
}

impl Default for ImpactResponse {
    fn default() -> Self {
        Self {
            restitution: 0.5,
            friction: 0.0,
        }
    }
}

impl ImpactResponse {
    /// Move `x` out by `depth` along `normal` and reflect `v`
    #[inline]
    pub fn apply(&self, x: &mut NVec3, v: &mut NVec3, normal: &NVec3, depth: f64) {
        *x += normal * depth;
        let vn = v.dot(normal);
        if vn < 0.0 {
            let tangential = *v - normal * vn;
            *v = tangential * (1.0 - self.friction) - normal * (self.restitution * vn);
        }
    }
}

/// A surface particles must stay on one side of
pub trait Collider {
    /// Resolve penetration of a particle of `radius`; true on impact
    fn resolve(&self, x: &mut NVec3, v: &mut NVec3, radius: f64, response: &ImpactResponse) -> bool;
}

/// Half-space `normal . x >= offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneCollider {
    normal: NVec3,
    offset: f64,
}

impl PlaneCollider {
    /// `normal` is normalised; a zero normal yields `None`
    pub fn new(normal: NVec3, offset: f64) -> Option<Self> {
        let len = normal.norm();
        if !(len > 0.0) || !len.is_finite() {
            return None;
        }
        Some(Self {
            normal: normal / len,
            offset: offset / len,
        })
    }

    /// Floor at height `y`, fluid above
    pub fn ground(y: f64) -> Self {
        Self {
            normal: NVec3::y(),
            offset: y,
        }
    }
}

impl Collider for PlaneCollider {
    fn resolve(&self, x: &mut NVec3, v: &mut NVec3, radius: f64, response: &ImpactResponse) -> bool {
        let depth = self.offset + radius - self.normal.dot(x);
        if depth <= 0.0 {
            return false;
        }
        response.apply(x, v, &self.normal, depth);
        true
    }
}

/// Axis-aligned container, particles stay inside `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCollider {
    pub min: NVec3,
    pub max: NVec3,
}

impl Collider for BoxCollider {
    fn resolve(&self, x: &mut NVec3, v: &mut NVec3, radius: f64, response: &ImpactResponse) -> bool {
        let mut hit = false;
        for axis in 0..3 {
            // a box thinner than the particle keeps it centred
            let lo = self.min[axis] + radius;
            let hi = (self.max[axis] - radius).max(lo);
            let mut normal = NVec3::zeros();
            let depth = if x[axis] < lo {
                normal[axis] = 1.0;
                lo - x[axis]
            } else if x[axis] > hi {
                normal[axis] = -1.0;
                x[axis] - hi
            } else {
                continue;
            };
            response.apply(x, v, &normal, depth);
            hit = true;
        }
        hit
    }
}

/// All colliders of a solver
#[derive(Default)]
pub struct CollisionSet {
    colliders: Vec<Box<dyn Collider + Send + Sync>>,
    pub response: ImpactResponse,
}

impl CollisionSet {
    pub fn new(response: ImpactResponse) -> Self {
        Self {
            colliders: Vec::new(),
            response,
        }
    }

    /// Add a collider
    pub fn with(mut self, collider: impl Collider + Send + Sync + 'static) -> Self {
        self.colliders.push(Box::new(collider));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Resolve every particle against every collider, in parallel.
    /// Returns the number of particles that hit something.
    pub fn resolve_all(&self, x: &mut [NVec3], v: &mut [NVec3], radius: &(dyn Fn(usize) -> f64 + Sync)) -> usize {
        if self.colliders.is_empty() {
            return 0;
        }
        x.par_iter_mut()
            .zip(v.par_iter_mut())
            .enumerate()
            .map(|(i, (xi, vi))| {
                let r = radius(i);
                let mut hit = false;
                for c in &self.colliders {
                    hit |= c.resolve(xi, vi, r, &self.response);
                }
                usize::from(hit)
            })
            .sum()
    }
}
