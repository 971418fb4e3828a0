//! Configuration types for loading fluid scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! simulation scenario. A scenario consists of:
//!
//! - [`EngineConfig`]     – integration scheme, kernels, pressure model, workers
//! - [`ParametersConfig`] – time span, tolerances and substep bounds
//! - [`FluidConfig`]      – field setup and fluid constants
//! - [`CollisionConfig`]  – collision surfaces and impact response
//! - [`ObjectConfig`]     – particle objects (block emitters or explicit particles)
//! - [`ScenarioConfig`]   – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//! A small dam-break scenario matching these types:
//!
//! ```yaml
//! engine:
//!   scheme: "rk32"          # euler, midpoint, rk4, rk21, rk32, rk45, leapfrog
//!   use_double_density: false
//!
//! parameters:
//!   t_end: 1.0              # total simulation time
//!   frame_dt: 0.04          # length of one frame
//!   h0: 0.001               # first substep
//!   atol: 1.0e-4            # absolute error tolerance
//!   rtol: 1.0e-3            # relative error tolerance
//!   min_substep: 1.0e-6
//!   max_substep: 0.01
//!   max_iterations: 8       # retries before a forced commit
//!
//! fluid:
//!   default_radius: 0.05
//!   rest_density: 1000.0
//!   gas_constant: 20.0
//!   viscosity: 0.1
//!   gravity: [0.0, -9.81, 0.0]
//!
//! collision:
//!   restitution: 0.3
//!   planes:
//!     - normal: [0.0, 1.0, 0.0]
//!       offset: 0.0
//!
//! objects:
//!   - name: "water"
//!     block: { min: [0.0, 0.0, 0.0], max: [0.5, 0.5, 0.5], spacing: 0.05 }
//!     mass: 0.125
//! ```
//!
//! Absent optional fields fall back to the defaults of the runtime types
//! (`Engine`, `Parameters`).

use serde::Deserialize;

use crate::simulation::integrator::Scheme;
use crate::simulation::kernels::{KernelKind, Normalization};

/// Engine-level options
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    pub scheme: Scheme, // time integrator used for advancing every object
    #[serde(default)]
    pub kernels: KernelConfig, // kernel per force term
    #[serde(default)]
    pub use_double_density: bool, // near/far pressure (clustering control) instead of the plain equation of state
    #[serde(default)]
    pub orientation: Option<bool>, // integrate orientation/angular velocity where present, default true
    #[serde(default)]
    pub workers: Option<usize>, // dedicated worker pool size, absent = global pool
}

/// Kernel choice per force term, all optional
#[derive(Deserialize, Debug, Clone, Default)]
pub struct KernelConfig {
    pub density: Option<KernelKind>, // default poly6
    pub pressure: Option<KernelKind>, // default spiky
    pub viscosity: Option<KernelKind>, // default viscosity
    pub surface: Option<KernelKind>, // default poly6
    #[serde(default)]
    pub normalization: Normalization, // scaled or unscaled, default scaled
}

/// Time span, tolerances and substep control
#[derive(Deserialize, Debug, Clone)]
pub struct ParametersConfig {
    pub t_end: f64, // time end
    pub frame_dt: f64, // length of one frame
    pub h0: f64, // first substep
    pub atol: f64, // absolute error tolerance
    pub rtol: f64, // relative error tolerance
    pub min_substep: f64,
    pub max_substep: f64,
    pub max_iterations: usize, // retries of a rejected substep before a forced commit
    pub safety: Option<f64>, // step-size safety factor, default 0.9
}

/// Field setup and fluid constants, all optional
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FluidConfig {
    pub radius_scale: Option<f64>, // support = radius_scale * (r_i + r_j)
    #[serde(default)]
    pub need_volume: bool, // weight samples by m/rho, objects must carry mass and density
    pub default_mass: Option<f64>, // mass of particles without a mass attribute
    pub default_radius: Option<f64>, // radius of particles without a radius attribute
    pub rest_density: Option<f64>,
    pub gas_constant: Option<f64>, // pressure stiffness
    pub near_gas_constant: Option<f64>, // double-density only
    pub near_ratio: Option<f64>, // near support / far support, double-density only
    pub viscosity: Option<f64>,
    pub surface_tension: Option<f64>,
    pub surface_threshold: Option<f64>, // minimum colour gradient counted as surface
    pub xsph_epsilon: Option<f64>, // post-step velocity smoothing, 0 disables
    pub gravity: Option<[f64; 3]>,
    pub drag: Option<f64>, // linear drag coefficient
}

/// Collision surfaces and bounce response
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CollisionConfig {
    pub restitution: Option<f64>, // normal velocity kept after impact, default 0.5
    pub friction: Option<f64>, // tangential velocity removed on impact, default 0
    #[serde(default)]
    pub planes: Vec<PlaneConfig>,
    #[serde(default)]
    pub boxes: Vec<BoxConfig>,
}

/// Half-space `normal . x >= offset`
#[derive(Deserialize, Debug, Clone)]
pub struct PlaneConfig {
    pub normal: [f64; 3],
    pub offset: f64,
}

/// Axis-aligned container
#[derive(Deserialize, Debug, Clone)]
pub struct BoxConfig {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Regular lattice of particles filling `[min, max]`
#[derive(Deserialize, Debug, Clone)]
pub struct BlockConfig {
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub spacing: f64, // lattice spacing, particles on both faces included
}

/// One explicitly placed particle
#[derive(Deserialize, Debug, Clone)]
pub struct ParticleConfig {
    pub x: [f64; 3], // initial position
    #[serde(default)]
    pub v: [f64; 3], // initial velocity, default zero
    pub m: Option<f64>, // overrides the object mass
    pub radius: Option<f64>, // overrides the object radius
}

/// A particle object
#[derive(Deserialize, Debug, Clone)]
pub struct ObjectConfig {
    pub name: String,
    pub block: Option<BlockConfig>, // block emitter
    #[serde(default)]
    pub particles: Vec<ParticleConfig>, // explicit particles, appended after the block
    pub velocity: Option<[f64; 3]>, // initial velocity of block particles
    pub mass: Option<f64>, // per-particle mass; absent leaves the attribute off
    pub radius: Option<f64>, // per-particle radius; absent leaves the attribute off
    pub density: Option<f64>, // initial density attribute
    #[serde(default)]
    pub rotation: bool, // carry orientation and angular velocity
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub engine: EngineConfig, // Engine-level configuration
    pub parameters: ParametersConfig, // Time span and step control
    #[serde(default)]
    pub fluid: FluidConfig, // Fluid constants
    #[serde(default)]
    pub collision: CollisionConfig, // Collision surfaces
    pub objects: Vec<ObjectConfig>, // Particle objects that define the initial state
}
