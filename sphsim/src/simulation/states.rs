//! Core state types for the SPH core.
//!
//! Defines the per-object particle buffers:
//! - `ParticleSet` stores particles as parallel arrays (structure of arrays)
//! - attributes the host may not provide are `Option<Vec<_>>`
//!
//! The core never creates or destroys particles. It reads the buffers,
//! writes back positions, velocities, forces and the recomputed density.

use nalgebra::{UnitQuaternion, Vector3};

pub type NVec3 = Vector3<f64>;
pub type NQuat = UnitQuaternion<f64>;

/// One particle object (a fluid body, an emitter's output, ...).
#[derive(Debug, Clone, Default)]
pub struct ParticleSet {
    pub name: String,
    pub ids: Option<Vec<u64>>, // stable ids, optional
    pub x: Vec<NVec3>, // positions
    pub v: Vec<NVec3>, // velocities
    pub m: Option<Vec<f64>>, // masses
    pub rho: Option<Vec<f64>>, // densities
    pub radius: Option<Vec<f64>>, // interaction radii
    pub force: Vec<NVec3>, // accumulated force
    pub orientation: Option<Vec<NQuat>>,
    pub angular_velocity: Option<Vec<NVec3>>,
    pub torque: Option<Vec<NVec3>>, // supplied by the host, read only
}

impl ParticleSet {
    /// Empty object with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Object built from positions and velocities, with no optional attributes
    pub fn from_state(name: impl Into<String>, x: Vec<NVec3>, v: Vec<NVec3>) -> Self {
        let n = x.len();
        debug_assert_eq!(n, v.len());
        Self {
            name: name.into(),
            x,
            v,
            force: vec![NVec3::zeros(); n],
            ..Default::default()
        }
    }

    /// Append one particle. Optional attributes that already exist get
    /// the supplied value, or a zero/identity fill when it is `None`.
    pub fn push(&mut self, x: NVec3, v: NVec3, m: Option<f64>, radius: Option<f64>) {
        let n = self.x.len();
        self.x.push(x);
        self.v.push(v);
        self.force.push(NVec3::zeros());
        push_optional(&mut self.m, n, m);
        push_optional(&mut self.radius, n, radius);
        if let Some(rho) = self.rho.as_mut() {
            rho.push(0.0);
        }
        if let Some(q) = self.orientation.as_mut() {
            q.push(NQuat::identity());
        }
        if let Some(w) = self.angular_velocity.as_mut() {
            w.push(NVec3::zeros());
        }
        if let Some(t) = self.torque.as_mut() {
            t.push(NVec3::zeros());
        }
        if let Some(ids) = self.ids.as_mut() {
            let next = ids.last().map_or(0, |id| id + 1);
            ids.push(next);
        }
    }

    pub fn with_mass(mut self, m: f64) -> Self {
        self.m = Some(vec![m; self.len()]);
        self
    }

    pub fn with_radius(mut self, r: f64) -> Self {
        self.radius = Some(vec![r; self.len()]);
        self
    }

    pub fn with_density(mut self, rho: f64) -> Self {
        self.rho = Some(vec![rho; self.len()]);
        self
    }

    /// Enable orientation and angular velocity attributes
    pub fn with_rotation(mut self) -> Self {
        let n = self.len();
        self.orientation = Some(vec![NQuat::identity(); n]);
        self.angular_velocity = Some(vec![NVec3::zeros(); n]);
        self
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Mass of particle `i`, or `fallback` when the attribute is absent or short
    pub fn mass_or(&self, i: usize, fallback: f64) -> f64 {
        self.m.as_ref().and_then(|m| m.get(i).copied()).unwrap_or(fallback)
    }

    /// Radius of particle `i`, or `fallback` when the attribute is absent or short
    pub fn radius_or(&self, i: usize, fallback: f64) -> f64 {
        self.radius.as_ref().and_then(|r| r.get(i).copied()).unwrap_or(fallback)
    }

    pub fn has_rotation(&self) -> bool {
        self.orientation.is_some() && self.angular_velocity.is_some()
    }

    /// Linear momentum, sum of m v
    pub fn momentum(&self, fallback_mass: f64) -> NVec3 {
        self.v
            .iter()
            .enumerate()
            .fold(NVec3::zeros(), |acc, (i, v)| acc + self.mass_or(i, fallback_mass) * v)
    }
}

fn push_optional(attr: &mut Option<Vec<f64>>, n: usize, value: Option<f64>) {
    match (attr.as_mut(), value) {
        (Some(a), Some(val)) => a.push(val),
        (Some(a), None) => a.push(0.0),
        // first explicit value back-fills the earlier particles
        (None, Some(val)) => *attr = Some(vec![val; n + 1]),
        (None, None) => {}
    }
}
