//! Solver context and substep control
//!
//! `Solver` owns everything one simulation needs for its lifetime: the force
//! set (with its field and per-worker scratch pool), the integrator and its
//! stage storage, the colliders, the diagnostics channel and an optional
//! dedicated rayon pool. Nothing is process-wide.
//!
//! `SubstepController` is the caller the integrator defers to: it splits a
//! frame into substeps, retries rejected ones with the recommended substep
//! and forces a commit once retries run out.

use std::sync::Arc;

use super::collision::CollisionSet;
use super::diagnostics::Diagnostics;
use super::engine::Engine;
use super::error::SphError;
use super::forces::{
    DoubleDensityPressure, DragForce, ForceSet, GravityForce, PressureForce, SurfaceTensionForce, ViscosityForce,
};
use super::integrator::{AdaptiveIntegrator, CommitPolicy, StepOutcome};
use super::params::Parameters;
use super::pool::ScratchPool;
use super::states::ParticleSet;

/// Summary of one `SubstepController::advance` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub t: f64, // time reached
    pub steps: usize, // committed substeps
    pub rejections: usize,
    pub forced_commits: usize, // commits with the error above tolerance
    pub last_substep: f64,
    pub failed_objects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstepController {
    pub min_substep: f64,
    pub max_substep: f64,
    pub max_iterations: usize, // retries per substep before a forced commit
    substep: f64,
}

impl SubstepController {
    pub fn new(params: &Parameters) -> Self {
        Self {
            min_substep: params.min_substep,
            max_substep: params.max_substep,
            max_iterations: params.max_iterations,
            substep: params.h0.max(params.min_substep).min(params.max_substep),
        }
    }

    /// Substep the next call will try first
    pub fn substep(&self) -> f64 {
        self.substep
    }

    /// Advance from `t0` by `span` through `step(t, dt, policy)`.
    ///
    /// A rejected substep is retried with the substep it recommends. After
    /// `max_iterations` rejections, or once the substep is at its minimum,
    /// the next attempt commits regardless of its error.
    pub fn advance<F>(&mut self, t0: f64, span: f64, mut step: F) -> FrameReport
    where
        F: FnMut(f64, f64, CommitPolicy) -> StepOutcome,
    {
        let mut report = FrameReport {
            t: t0,
            last_substep: self.substep,
            ..Default::default()
        };
        if !(span > 0.0) || !span.is_finite() {
            return report;
        }
        let t_end = t0 + span;
        let slack = span * 1e-12;

        while t_end - report.t > slack {
            let remaining = t_end - report.t;
            let mut dt = self.substep.min(remaining);
            let mut attempts = 0;
            loop {
                let policy = if attempts >= self.max_iterations || dt <= self.min_substep {
                    CommitPolicy::Always
                } else {
                    CommitPolicy::OnAccept
                };
                let outcome = step(report.t, dt, policy);
                for name in &outcome.failed_objects {
                    if !report.failed_objects.contains(name) {
                        report.failed_objects.push(name.clone());
                    }
                }

                if outcome.committed {
                    report.t += dt;
                    report.steps += 1;
                    report.last_substep = dt;
                    if !outcome.accepted {
                        report.forced_commits += 1;
                        tracing::warn!(
                            t = report.t,
                            dt,
                            error_ratio = outcome.error_ratio,
                            attempts,
                            "forced commit of a substep above tolerance"
                        );
                    }
                    // a frame's last, truncated substep does not steer the next frame
                    let truncated = outcome.accepted && dt >= remaining && dt < self.substep;
                    if !truncated {
                        self.substep = outcome.recommended_substep;
                    }
                    break;
                }

                report.rejections += 1;
                attempts += 1;
                let retry = outcome.recommended_substep.min(remaining);
                dt = if retry < dt { retry } else { (0.5 * dt).max(self.min_substep) };
                tracing::debug!(t = report.t, dt, attempts, "substep rejected, retrying");
            }
        }
        report
    }
}

/// Force terms for the fluid described by `engine` and `params`
pub fn build_force_set(engine: &Engine, params: &Parameters, pool: ScratchPool, diagnostics: Arc<Diagnostics>) -> ForceSet {
    let mut forces = ForceSet::new(engine.kernels, params.field_options(), pool, diagnostics);

    forces = if engine.use_double_density {
        forces.with(DoubleDensityPressure {
            gas_constant: params.gas_constant,
            rest_density: params.rest_density,
            near_gas_constant: params.near_gas_constant,
            near_ratio: params.near_ratio,
        })
    } else {
        forces.with(PressureForce {
            gas_constant: params.gas_constant,
            rest_density: params.rest_density,
        })
    };
    if params.viscosity != 0.0 {
        forces = forces.with(ViscosityForce { mu: params.viscosity });
    }
    if params.surface_tension != 0.0 {
        forces = forces.with(SurfaceTensionForce {
            sigma: params.surface_tension,
            threshold: params.surface_threshold,
        });
    }
    if params.gravity.norm_squared() > 0.0 {
        forces = forces.with(GravityForce { g: params.gravity });
    }
    if params.drag != 0.0 {
        forces = forces.with(DragForce { k: params.drag });
    }
    forces
}

pub struct Solver {
    engine: Engine,
    params: Parameters,
    forces: ForceSet,
    integrator: AdaptiveIntegrator,
    collisions: CollisionSet,
    controller: SubstepController,
    diagnostics: Arc<Diagnostics>,
    thread_pool: Option<rayon::ThreadPool>,
    t: f64,
}

impl Solver {
    /// Validate the parameters and build the force set, integrator and
    /// worker pool
    pub fn new(engine: Engine, params: Parameters, collisions: CollisionSet, diagnostics: Arc<Diagnostics>) -> Result<Self, SphError> {
        params.validate()?;

        let thread_pool = match engine.workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| SphError::InvalidConfiguration {
                        reason: format!("cannot build a pool of {n} workers: {e}"),
                    })?,
            ),
            None => None,
        };
        let workers = thread_pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads());

        let forces = build_force_set(&engine, &params, ScratchPool::new(workers), Arc::clone(&diagnostics));
        let integrator = AdaptiveIntegrator::new(engine.scheme, &params).with_rotation(engine.orientation);
        let controller = SubstepController::new(&params);

        tracing::info!(
            scheme = engine.scheme.name(),
            workers,
            terms = ?forces.term_names(),
            "solver ready"
        );

        Ok(Self {
            engine,
            params,
            forces,
            integrator,
            collisions,
            controller,
            diagnostics,
            thread_pool,
            t: 0.0,
        })
    }

    /// Advance every object by one frame (`params.frame_dt`)
    pub fn advance_frame(&mut self, objects: &mut [ParticleSet]) -> FrameReport {
        let Self {
            params,
            forces,
            integrator,
            collisions,
            controller,
            diagnostics,
            thread_pool,
            t,
            ..
        } = self;
        diagnostics.reset_once();

        let t0 = *t;
        let span = params.frame_dt;
        let mut run = || {
            controller.advance(t0, span, |t, dt, policy| integrator.step(objects, forces, collisions, t, dt, policy))
        };
        let report = match thread_pool {
            Some(pool) => pool.install(run),
            None => run(),
        };

        if !report.failed_objects.is_empty() {
            tracing::warn!(objects = ?report.failed_objects, "objects skipped during the frame");
        }
        tracing::info!(
            t = report.t,
            steps = report.steps,
            rejections = report.rejections,
            forced = report.forced_commits,
            substep = report.last_substep,
            "frame done"
        );
        *t = report.t;
        report
    }

    /// One integrator call of length `dt`, committed only when accepted
    pub fn step(&mut self, objects: &mut [ParticleSet], dt: f64) -> StepOutcome {
        self.diagnostics.reset_once();
        let Self {
            forces,
            integrator,
            collisions,
            thread_pool,
            t,
            ..
        } = self;
        let t0 = *t;
        let mut run = || integrator.step(objects, forces, collisions, t0, dt, CommitPolicy::OnAccept);
        let outcome = match thread_pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        if outcome.committed {
            *t += dt;
        }
        outcome
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn forces(&self) -> &ForceSet {
        &self.forces
    }

    pub fn integrator(&self) -> &AdaptiveIntegrator {
        &self.integrator
    }

    pub fn controller(&self) -> &SubstepController {
        &self.controller
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }
}
