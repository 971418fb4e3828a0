//! Force contributors for the SPH core
//!
//! A `ForceSet` holds the active force terms of one solver. For every
//! integrator stage it rebuilds the SPH field at the trial state (hash,
//! neighbour lists, velocity data, structural densities) and then lets each
//! term add its contribution to the per-particle force buffer.
//!
//! Pairwise terms (pressure, viscosity) visit each pair once and add equal
//! and opposite contributions through the solver's `ScratchPool`, so no two
//! workers ever write to the same buffer.

use std::sync::Arc;

use rayon::prelude::*;

use super::diagnostics::Diagnostics;
use super::error::SphError;
use super::field::{FieldOptions, SphField};
use super::kernels::{KernelSet, SmoothingKernel};
use super::pool::ScratchPool;
use super::states::{NVec3, ParticleSet};

/// Read-only state a force term sees for one evaluation
pub struct ForceContext<'a> {
    pub t: f64,
    pub field: &'a SphField,
    pub v: &'a [NVec3],
    pub density: &'a [f64], // structural densities at this state
    pub kernels: &'a KernelSet,
    pub pool: &'a ScratchPool,
    pub diagnostics: &'a Diagnostics,
}

/// Trait for force sources. Implementations add their contribution into
/// `out[i]` for each particle.
pub trait ForceSource {
    fn name(&self) -> &'static str;

    /// Whether the term reads neighbour lists or densities
    fn needs_neighbours(&self) -> bool {
        true
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]);
}

/// Collection of force terms plus the field they are evaluated on
pub struct ForceSet {
    terms: Vec<Box<dyn ForceSource + Send + Sync>>,
    kernels: KernelSet,
    field: SphField,
    pool: ScratchPool,
    diagnostics: Arc<Diagnostics>,
    density: Vec<f64>,
}

impl ForceSet {
    /// Create an empty force set
    pub fn new(kernels: KernelSet, options: FieldOptions, pool: ScratchPool, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            terms: Vec::new(),
            kernels,
            field: SphField::new(options, Arc::clone(&diagnostics)),
            pool,
            diagnostics,
            density: Vec::new(),
        }
    }

    /// Add a force term
    pub fn with<T>(mut self, term: T) -> Self
    where
        T: ForceSource + Send + Sync + 'static,
    {
        self.terms.push(Box::new(term));
        self
    }

    pub fn term_names(&self) -> Vec<&'static str> {
        self.terms.iter().map(|t| t.name()).collect()
    }

    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// Field as of the last evaluation
    pub fn field(&self) -> &SphField {
        &self.field
    }

    /// Structural densities as of the last evaluation
    pub fn densities(&self) -> &[f64] {
        &self.density
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// True when some term reads neighbour lists, i.e. the field computes
    /// structural densities on every evaluation
    pub fn uses_neighbours(&self) -> bool {
        self.terms.iter().any(|t| t.needs_neighbours())
    }

    /// Compute total forces at time `t` for the current state of `object`.
    /// - `out[i]` is overwritten with the sum of all terms
    ///
    /// Fails only on setup errors (missing or mismatched attributes); the
    /// caller skips the object's step.
    pub fn accumulate_forces(&mut self, t: f64, object: &ParticleSet, out: &mut [NVec3]) -> Result<(), SphError> {
        // Zero buffer
        for f in out.iter_mut() {
            *f = NVec3::zeros();
        }

        self.prepare(object)?;

        let ctx = ForceContext {
            t,
            field: &self.field,
            v: &object.v,
            density: &self.density,
            kernels: &self.kernels,
            pool: &self.pool,
            diagnostics: &self.diagnostics,
        };
        // Iterate over all force contributors
        for term in &self.terms {
            term.accumulate(&ctx, out);
        }
        Ok(())
    }

    /// Rebuild the field for `object` without evaluating forces
    pub fn prepare(&mut self, object: &ParticleSet) -> Result<(), SphError> {
        self.field.initialize(object)?;
        if self.uses_neighbours() {
            self.field.build_neighbours()?;
            self.field.init_velocity_data(&object.v)?;
            self.density = self
                .field
                .compute_densities(self.kernels.density, 1.0)
                .unwrap_or_default();
            self.field.update_densities(&self.density)?;
        } else {
            self.density = self.field.densities().to_vec();
        }
        Ok(())
    }
}

// =========================================================================================
// Pressure
// =========================================================================================

/// Equation-of-state pressure, `p = gas_constant * (rho - rest_density)`,
/// with the symmetric pair force
/// `f_ij = -m_i m_j (p_i / rho_i^2 + p_j / rho_j^2) grad W_ij = -f_ji`
pub struct PressureForce {
    pub gas_constant: f64,
    pub rest_density: f64,
}

impl PressureForce {
    #[inline]
    pub fn pressure(&self, rho: f64) -> f64 {
        self.gas_constant * (rho - self.rest_density)
    }
}

impl ForceSource for PressureForce {
    fn name(&self) -> &'static str {
        "pressure"
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        let field = ctx.field;
        let Some(lists) = field.neighbour_lists() else {
            return;
        };
        let (x, m, rho) = (field.positions(), field.masses(), ctx.density);
        let kernel = ctx.kernels.pressure;
        // p / rho^2, zero where the density is degenerate
        let p_term: Vec<f64> = rho
            .iter()
            .map(|&r| if r > 0.0 { self.pressure(r) / (r * r) } else { 0.0 })
            .collect();

        ctx.pool.accumulate(field.len(), out, |range, scratch| {
            for i in range {
                for e in lists.neighbours(i) {
                    let j = e.index;
                    if j <= i {
                        continue; // each pair once
                    }
                    let grad = kernel.gradient(&(x[i] - x[j]), e.dist2.sqrt(), field.pair_support(i, j));
                    let f = grad * (-m[i] * m[j] * (p_term[i] + p_term[j]));
                    scratch[i] += f;
                    scratch[j] -= f;
                }
            }
        });
    }
}

/// Double-density relaxation: a far pressure from the usual support plus a
/// strictly repulsive near pressure from a shorter support, both sampled in
/// one neighbour pass
pub struct DoubleDensityPressure {
    pub gas_constant: f64,
    pub rest_density: f64,
    pub near_gas_constant: f64,
    pub near_ratio: f64, // near support / far support
}

impl ForceSource for DoubleDensityPressure {
    fn name(&self) -> &'static str {
        "double_density_pressure"
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        let field = ctx.field;
        let Some(lists) = field.neighbour_lists() else {
            return;
        };
        let kernel = ctx.kernels.pressure;
        let density_kernel = ctx.kernels.density;
        let near_ratio = self.near_ratio;

        // (p / rho^2, p_near / rho^2) per particle
        let terms: Vec<(f64, f64)> = (0..field.len())
            .into_par_iter()
            .map(|i| {
                let (far, near) = field
                    .sample_double_density(i, density_kernel, near_ratio, 1.0)
                    .unwrap_or((0.0, 0.0));
                if far <= 0.0 {
                    return (0.0, 0.0);
                }
                let inv = 1.0 / (far * far);
                let p = self.gas_constant * (far - self.rest_density);
                let p_near = self.near_gas_constant * near;
                (p * inv, p_near * inv)
            })
            .collect();

        let (x, m) = (field.positions(), field.masses());
        ctx.pool.accumulate(field.len(), out, |range, scratch| {
            for i in range {
                for e in lists.neighbours(i) {
                    let j = e.index;
                    if j <= i {
                        continue;
                    }
                    let rij = x[i] - x[j];
                    let r = e.dist2.sqrt();
                    let h = field.pair_support(i, j);
                    let grad = kernel.gradient(&rij, r, h);
                    let grad_near = kernel.gradient(&rij, r, h * near_ratio);
                    let f = (grad * (terms[i].0 + terms[j].0) + grad_near * (terms[i].1 + terms[j].1)) * (-m[i] * m[j]);
                    scratch[i] += f;
                    scratch[j] -= f;
                }
            }
        });
    }
}

// =========================================================================================
// Viscosity and surface tension
// =========================================================================================

/// Laplacian-weighted velocity difference,
/// `f_ij = mu m_i m_j (v_j - v_i) / (rho_i rho_j) lap W_ij = -f_ji`
pub struct ViscosityForce {
    pub mu: f64, // damping coefficient
}

impl ForceSource for ViscosityForce {
    fn name(&self) -> &'static str {
        "viscosity"
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        let field = ctx.field;
        let Some(lists) = field.neighbour_lists() else {
            return;
        };
        if self.mu == 0.0 {
            return;
        }
        let (m, rho, v) = (field.masses(), ctx.density, ctx.v);
        let kernel = ctx.kernels.viscosity;

        ctx.pool.accumulate(field.len(), out, |range, scratch| {
            for i in range {
                if rho[i] <= 0.0 {
                    continue;
                }
                for e in lists.neighbours(i) {
                    let j = e.index;
                    if j <= i || rho[j] <= 0.0 {
                        continue;
                    }
                    let lap = kernel.laplacian_weight(e.dist2.sqrt(), field.pair_support(i, j));
                    let f = (v[j] - v[i]) * (self.mu * m[i] * m[j] / (rho[i] * rho[j]) * lap);
                    scratch[i] += f;
                    scratch[j] -= f;
                }
            }
        });
    }
}

/// Colour-field surface tension: a force along the surface normal with
/// magnitude proportional to the local curvature,
/// `f_i = -sigma lap(c) n / |n| * m_i / rho_i` where `|n| > threshold`
pub struct SurfaceTensionForce {
    pub sigma: f64,
    pub threshold: f64, // minimum |grad c| for a particle to count as surface
}

impl ForceSource for SurfaceTensionForce {
    fn name(&self) -> &'static str {
        "surface_tension"
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        let field = ctx.field;
        if self.sigma == 0.0 || field.neighbour_lists().is_none() {
            return;
        }
        let (m, rho) = (field.masses(), ctx.density);
        let kernel = ctx.kernels.surface;

        // each particle only writes its own slot
        out.par_iter_mut().enumerate().for_each(|(i, f)| {
            if rho[i] <= 0.0 {
                return;
            }
            let Some(n) = field.color_gradient_particle(i, kernel) else {
                return;
            };
            let n_len = n.norm();
            if n_len <= self.threshold || n_len == 0.0 {
                return;
            }
            let lap = field.color_laplacian_particle(i, kernel).unwrap_or(0.0);
            *f += n * (-self.sigma * lap / n_len * m[i] / rho[i]);
        });
    }
}

// =========================================================================================
// External forces
// =========================================================================================

/// Constant acceleration field, `f_i = m_i g`
pub struct GravityForce {
    pub g: NVec3,
}

impl ForceSource for GravityForce {
    fn name(&self) -> &'static str {
        "gravity"
    }

    fn needs_neighbours(&self) -> bool {
        false
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        for (f, m) in out.iter_mut().zip(ctx.field.masses()) {
            *f += self.g * *m;
        }
    }
}

/// Linear drag, `f_i = -k v_i`
pub struct DragForce {
    pub k: f64,
}

impl ForceSource for DragForce {
    fn name(&self) -> &'static str {
        "drag"
    }

    fn needs_neighbours(&self) -> bool {
        false
    }

    fn accumulate(&self, ctx: &ForceContext<'_>, out: &mut [NVec3]) {
        for (f, v) in out.iter_mut().zip(ctx.v) {
            *f -= v * self.k;
        }
    }
}
