//! Build fully-initialized simulation scenarios from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a runtime bundle
//! (`Scenario`) containing:
//! - engine settings (`Engine`)
//! - numerical and fluid parameters (`Parameters`)
//! - particle objects (`ParticleSet`s at t = 0)
//! - collision surfaces (`CollisionSet`)
//!
//! `Scenario::into_solver` then hands the parts to a `Solver`.

use std::sync::Arc;

use crate::configuration::config::{BlockConfig, CollisionConfig, EngineConfig, FluidConfig, ObjectConfig, ParametersConfig, ScenarioConfig};
use crate::simulation::collision::{BoxCollider, CollisionSet, ImpactResponse, PlaneCollider};
use crate::simulation::diagnostics::Diagnostics;
use crate::simulation::engine::Engine;
use crate::simulation::error::SphError;
use crate::simulation::kernels::{Kernel, KernelSet};
use crate::simulation::params::Parameters;
use crate::simulation::solver::Solver;
use crate::simulation::states::{NVec3, ParticleSet};

/// Upper bound on particles emitted by one block
const MAX_BLOCK_PARTICLES: usize = 50_000_000;

/// Runtime bundle constructed from a [`ScenarioConfig`]: engine settings,
/// parameters, the initial particle objects and the collision surfaces
pub struct Scenario {
    pub engine: Engine,
    pub parameters: Parameters,
    pub objects: Vec<ParticleSet>,
    pub collisions: CollisionSet,
}

impl Scenario {
    pub fn build_scenario(cfg: ScenarioConfig) -> Result<Self, SphError> {
        // Engine (runtime) from EngineConfig
        let engine = build_engine(&cfg.engine);

        // Parameters (runtime) from ParametersConfig + FluidConfig
        let parameters = build_parameters(&cfg.parameters, &cfg.fluid, &cfg.collision);
        parameters.validate()?;

        // Colliders share one impact response
        let collisions = build_collisions(&cfg.collision, &parameters)?;

        // Objects: map `ObjectConfig` -> runtime `ParticleSet`
        let objects = cfg
            .objects
            .iter()
            .map(|o| build_object(o, &parameters))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            objects = objects.len(),
            particles = objects.iter().map(ParticleSet::len).sum::<usize>(),
            scheme = engine.scheme.name(),
            "scenario built"
        );

        Ok(Self {
            engine,
            parameters,
            objects,
            collisions,
        })
    }

    /// Number of frames needed to reach `t_end`
    pub fn frame_count(&self) -> usize {
        let p = &self.parameters;
        if p.frame_dt > 0.0 && p.t_end > 0.0 {
            (p.t_end / p.frame_dt).ceil() as usize
        } else {
            0
        }
    }

    /// Split into a solver and the objects it advances
    pub fn into_solver(self, diagnostics: Arc<Diagnostics>) -> Result<(Solver, Vec<ParticleSet>), SphError> {
        let solver = Solver::new(self.engine, self.parameters, self.collisions, diagnostics)?;
        Ok((solver, self.objects))
    }
}

fn build_engine(cfg: &EngineConfig) -> Engine {
    let defaults = KernelSet::default();
    let k = &cfg.kernels;
    let pick = |kind: Option<_>, fallback: Kernel| Kernel {
        kind: kind.unwrap_or(fallback.kind),
        normalization: k.normalization,
    };
    Engine {
        scheme: cfg.scheme,
        kernels: KernelSet {
            density: pick(k.density, defaults.density),
            pressure: pick(k.pressure, defaults.pressure),
            viscosity: pick(k.viscosity, defaults.viscosity),
            surface: pick(k.surface, defaults.surface),
        },
        use_double_density: cfg.use_double_density,
        orientation: cfg.orientation.unwrap_or(true),
        workers: cfg.workers,
    }
}

fn build_parameters(p: &ParametersConfig, fluid: &FluidConfig, collision: &CollisionConfig) -> Parameters {
    let d = Parameters::default();
    Parameters {
        t_end: p.t_end,
        frame_dt: p.frame_dt,
        h0: p.h0,
        atol: p.atol,
        rtol: p.rtol,
        safety: p.safety.unwrap_or(d.safety),
        min_substep: p.min_substep,
        max_substep: p.max_substep,
        max_iterations: p.max_iterations,
        radius_scale: fluid.radius_scale.unwrap_or(d.radius_scale),
        need_volume: fluid.need_volume,
        default_mass: fluid.default_mass.unwrap_or(d.default_mass),
        default_radius: fluid.default_radius.unwrap_or(d.default_radius),
        rest_density: fluid.rest_density.unwrap_or(d.rest_density),
        gas_constant: fluid.gas_constant.unwrap_or(d.gas_constant),
        near_gas_constant: fluid.near_gas_constant.unwrap_or(d.near_gas_constant),
        near_ratio: fluid.near_ratio.unwrap_or(d.near_ratio),
        viscosity: fluid.viscosity.unwrap_or(d.viscosity),
        surface_tension: fluid.surface_tension.unwrap_or(d.surface_tension),
        surface_threshold: fluid.surface_threshold.unwrap_or(d.surface_threshold),
        xsph_epsilon: fluid.xsph_epsilon.unwrap_or(d.xsph_epsilon),
        gravity: fluid.gravity.map_or(d.gravity, NVec3::from),
        drag: fluid.drag.unwrap_or(d.drag),
        restitution: collision.restitution.unwrap_or(d.restitution),
        friction: collision.friction.unwrap_or(d.friction),
    }
}

fn build_collisions(cfg: &CollisionConfig, params: &Parameters) -> Result<CollisionSet, SphError> {
    let mut collisions = CollisionSet::new(ImpactResponse {
        restitution: params.restitution,
        friction: params.friction,
    });
    for plane in &cfg.planes {
        let collider = PlaneCollider::new(NVec3::from(plane.normal), plane.offset).ok_or_else(|| SphError::InvalidConfiguration {
            reason: format!("plane normal {:?} has zero length", plane.normal),
        })?;
        collisions = collisions.with(collider);
    }
    for b in &cfg.boxes {
        let (min, max) = (NVec3::from(b.min), NVec3::from(b.max));
        if (0..3).any(|k| !(min[k] <= max[k])) {
            return Err(SphError::InvalidConfiguration {
                reason: format!("box min {:?} exceeds max {:?}", b.min, b.max),
            });
        }
        collisions = collisions.with(BoxCollider { min, max });
    }
    Ok(collisions)
}

/// Mass and radius attributes exist when the object or any of its
/// particles sets them; particles without a value get the object value, then
/// the global default.
fn build_object(cfg: &ObjectConfig, params: &Parameters) -> Result<ParticleSet, SphError> {
    let has_mass = cfg.mass.is_some() || cfg.particles.iter().any(|p| p.m.is_some());
    let has_radius = cfg.radius.is_some() || cfg.particles.iter().any(|p| p.radius.is_some());
    let mass = |m: Option<f64>| has_mass.then(|| m.or(cfg.mass).unwrap_or(params.default_mass));
    let radius = |r: Option<f64>| has_radius.then(|| r.or(cfg.radius).unwrap_or(params.default_radius));

    let mut object = ParticleSet::new(cfg.name.clone());
    if let Some(block) = &cfg.block {
        let v = cfg.velocity.map_or_else(NVec3::zeros, NVec3::from);
        for x in block_positions(block)? {
            object.push(x, v, mass(None), radius(None));
        }
    }
    for p in &cfg.particles {
        object.push(NVec3::from(p.x), NVec3::from(p.v), mass(p.m), radius(p.radius));
    }
    if let Some(rho) = cfg.density {
        object.rho = Some(vec![rho; object.len()]);
    }
    if cfg.rotation {
        object = object.with_rotation();
    }
    Ok(object)
}

/// Lattice points `min + spacing * (i, j, k)` inside `[min, max]`
fn block_positions(block: &BlockConfig) -> Result<Vec<NVec3>, SphError> {
    let invalid = |reason: String| SphError::InvalidConfiguration { reason };
    if !(block.spacing > 0.0) || !block.spacing.is_finite() {
        return Err(invalid(format!("block spacing must be positive, got {}", block.spacing)));
    }
    let mut counts = [0usize; 3];
    for k in 0..3 {
        let extent = block.max[k] - block.min[k];
        if !(extent >= 0.0) || !extent.is_finite() {
            return Err(invalid(format!("block min {:?} exceeds max {:?}", block.min, block.max)));
        }
        // tolerate round-off on the far face
        counts[k] = (extent / block.spacing + 1e-9).floor() as usize + 1;
    }
    let total = counts.iter().try_fold(1usize, |acc, &c| acc.checked_mul(c));
    match total {
        Some(total) if total <= MAX_BLOCK_PARTICLES => {}
        _ => return Err(invalid(format!("block of {counts:?} particles is too large"))),
    }

    let min = NVec3::from(block.min);
    let mut out = Vec::with_capacity(counts.iter().product());
    for k in 0..counts[2] {
        for j in 0..counts[1] {
            for i in 0..counts[0] {
                out.push(min + NVec3::new(i as f64, j as f64, k as f64) * block.spacing);
            }
        }
    }
    Ok(out)
}
