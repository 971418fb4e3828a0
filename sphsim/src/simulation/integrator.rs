//! Explicit time integrators for particle objects
//!
//! Provides Butcher-tableau driven Runge-Kutta schemes (Euler, midpoint,
//! classical RK4 and the embedded pairs RK2(1), RK3(2), RK4(5)) plus a
//! kick-drift-kick leapfrog, all driven by a `ForceSet`.
//!
//! One call to [`AdaptiveIntegrator::step`] advances every object by `dt`:
//!
//! ```text
//! INIT_STATE -> RUN_STAGES -> EVALUATE_ERROR -> ACCEPT -> COMMIT_FINAL
//!                                            -> REJECT -> restore, recommend a smaller substep
//! ```
//!
//! The integrator never loops to converge inside one call. It reports
//! accept/reject plus a recommended substep; retries belong to the caller
//! (see `solver::SubstepController`).

use rayon::prelude::*;
use serde::Deserialize;

use super::collision::CollisionSet;
use super::diagnostics::Severity;
use super::error::SphError;
use super::forces::ForceSet;
use super::params::Parameters;
use super::states::{NQuat, NVec3, ParticleSet};

/// Limits on how fast the substep may change between two calls
const MIN_GROWTH: f64 = 0.2;
const MAX_GROWTH: f64 = 5.0;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    #[serde(rename = "euler")]
    Euler,
    #[serde(rename = "midpoint")]
    Midpoint,
    #[serde(rename = "rk4")]
    Rk4,
    #[serde(rename = "rk21")]
    Rk21,
    #[serde(rename = "rk32")]
    Rk32,
    #[serde(rename = "rk45")]
    Rk45,
    #[serde(rename = "leapfrog")]
    Leapfrog,
}

impl Scheme {
    pub const ALL: [Scheme; 7] = [
        Scheme::Euler,
        Scheme::Midpoint,
        Scheme::Rk4,
        Scheme::Rk21,
        Scheme::Rk32,
        Scheme::Rk45,
        Scheme::Leapfrog,
    ];

    /// Force evaluations per step. Leapfrog is not tableau driven and
    /// always evaluates twice (both kicks).
    pub fn stages(&self) -> usize {
        match self.tableau() {
            Some(tab) => tab.stages(),
            None => 2,
        }
    }

    /// Butcher tableau, `None` for leapfrog
    pub fn tableau(&self) -> Option<&'static Tableau> {
        match self {
            Scheme::Euler => Some(&EULER),
            Scheme::Midpoint => Some(&MIDPOINT),
            Scheme::Rk4 => Some(&RK4),
            Scheme::Rk21 => Some(&RK21),
            Scheme::Rk32 => Some(&RK32),
            Scheme::Rk45 => Some(&RK45),
            Scheme::Leapfrog => None,
        }
    }

    /// True for schemes carrying an embedded error estimate
    pub fn is_embedded(&self) -> bool {
        self.tableau().is_some_and(|tab| tab.b_embedded.is_some())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scheme::Euler => "euler",
            Scheme::Midpoint => "midpoint",
            Scheme::Rk4 => "rk4",
            Scheme::Rk21 => "rk21",
            Scheme::Rk32 => "rk32",
            Scheme::Rk45 => "rk45",
            Scheme::Leapfrog => "leapfrog",
        }
    }
}

// =========================================================================================
// Butcher tableaux
// =========================================================================================

/// Explicit Runge-Kutta coefficients. Row `k` of `a` holds the weights of
/// stages `0..k` used to form the state of stage `k`.
#[derive(Debug)]
pub struct Tableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64], // weights of the propagated solution
    pub b_embedded: Option<&'static [f64]>, // companion weights for the error estimate
    pub order: u32, // lower order of the pair, sets the step-size exponent
}

impl Tableau {
    pub fn stages(&self) -> usize {
        self.b.len()
    }

    /// `b - b_embedded` for stage `k`, zero for schemes without a companion
    fn error_weight(&self, k: usize) -> f64 {
        self.b_embedded.map_or(0.0, |be| self.b[k] - be[k])
    }
}

static EULER: Tableau = Tableau {
    c: &[0.0],
    a: &[&[]],
    b: &[1.0],
    b_embedded: None,
    order: 1,
};

static MIDPOINT: Tableau = Tableau {
    c: &[0.0, 0.5],
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
    b_embedded: None,
    order: 2,
};

static RK4: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    b_embedded: None,
    order: 4,
};

/// Fehlberg RK2(1), first-order solution propagated
static RK21: Tableau = Tableau {
    c: &[0.0, 0.5, 1.0],
    a: &[&[], &[0.5], &[1.0 / 256.0, 255.0 / 256.0]],
    b: &[1.0 / 256.0, 255.0 / 256.0, 0.0],
    b_embedded: Some(&[1.0 / 512.0, 255.0 / 256.0, 1.0 / 512.0]),
    order: 1,
};

/// Bogacki-Shampine RK3(2)
static RK32: Tableau = Tableau {
    c: &[0.0, 0.5, 0.75, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.75], &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0]],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
    b_embedded: Some(&[7.0 / 24.0, 1.0 / 4.0, 1.0 / 3.0, 1.0 / 8.0]),
    order: 2,
};

/// Runge-Kutta-Fehlberg 4(5), fourth-order solution propagated
static RK45: Tableau = Tableau {
    c: &[0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0],
    a: &[
        &[],
        &[1.0 / 4.0],
        &[3.0 / 32.0, 9.0 / 32.0],
        &[1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0],
        &[439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0],
        &[-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
    ],
    b: &[25.0 / 216.0, 0.0, 1408.0 / 2565.0, 2197.0 / 4104.0, -1.0 / 5.0, 0.0],
    b_embedded: Some(&[16.0 / 135.0, 0.0, 6656.0 / 12825.0, 28561.0 / 56430.0, -9.0 / 50.0, 2.0 / 55.0]),
    order: 4,
};

/// Leapfrog force output averages both kicks
const LEAPFROG_FORCE_WEIGHTS: [f64; 2] = [0.5, 0.5];

// =========================================================================================
// Per-object storage
// =========================================================================================

/// Per-stage increments of one object. Storage is kept between calls and
/// only resized when the scheme or particle count changes.
#[derive(Debug, Default)]
pub struct StageTable {
    kx: Vec<Vec<NVec3>>, // dt * v at stage k
    kv: Vec<Vec<NVec3>>, // dt * a at stage k
    f: Vec<Vec<NVec3>>, // raw force at stage k
    kq: Vec<Vec<NVec3>>, // dt * angular velocity (rotation vector)
    kw: Vec<Vec<NVec3>>, // dt * angular acceleration
    in_use: bool,
}

impl StageTable {
    fn prepare(&mut self, stages: usize, n: usize, rotate: bool) {
        let rot_n = if rotate { n } else { 0 };
        for (buffers, len) in [
            (&mut self.kx, n),
            (&mut self.kv, n),
            (&mut self.f, n),
            (&mut self.kq, rot_n),
            (&mut self.kw, rot_n),
        ] {
            buffers.resize_with(stages, Vec::new);
            for b in buffers.iter_mut() {
                b.clear();
                b.resize(len, NVec3::zeros());
            }
        }
        self.in_use = true;
    }

    /// Clear the per-step force accumulators; storage persists
    fn release(&mut self) {
        for b in self.f.iter_mut() {
            b.iter_mut().for_each(|f| *f = NVec3::zeros());
        }
        self.in_use = false;
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }
}

#[derive(Debug, Clone, Default)]
struct StateArrays {
    x: Vec<NVec3>,
    v: Vec<NVec3>,
    q: Vec<NQuat>,
    w: Vec<NVec3>,
}

impl StateArrays {
    fn capture(&mut self, object: &ParticleSet, rotate: bool) {
        self.x.clone_from(&object.x);
        self.v.clone_from(&object.v);
        self.q.clear();
        self.w.clear();
        if rotate {
            if let (Some(q), Some(w)) = (&object.orientation, &object.angular_velocity) {
                self.q.clone_from(q);
                self.w.clone_from(w);
            }
        }
    }

    fn store(&self, object: &mut ParticleSet, rotate: bool) {
        object.x.clone_from(&self.x);
        object.v.clone_from(&self.v);
        if rotate {
            if let Some(q) = object.orientation.as_mut() {
                q.clone_from(&self.q);
            }
            if let Some(w) = object.angular_velocity.as_mut() {
                w.clone_from(&self.w);
            }
        }
    }
}

/// Initial and combined state of one object for one outer call
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    initial: StateArrays,
    total: StateArrays,
    force: Vec<NVec3>, // b-weighted stage forces
    radius: Vec<f64>,
    recommended: Vec<f64>, // per-particle recommended substep
    max_error: f64,
    error_ratio: f64,
    rotate: bool,
    failed: bool,
    reported: bool, // numerical failure already reported this step
}

impl ObjectInfo {
    fn begin(&mut self, object: &ParticleSet, rotate: bool, default_radius: f64) {
        let n = object.len();
        self.rotate = rotate;
        self.failed = false;
        self.reported = false;
        self.max_error = 0.0;
        self.error_ratio = 0.0;
        self.initial.capture(object, rotate);
        self.radius.clear();
        self.radius.extend((0..n).map(|i| {
            object
                .radius
                .as_ref()
                .and_then(|r| r.get(i))
                .copied()
                .unwrap_or(default_radius)
        }));
    }
}

// =========================================================================================
// Integrator
// =========================================================================================

/// What to do with a step whose error exceeds the tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Commit only accepted steps, restore the initial state otherwise
    #[default]
    OnAccept,
    /// Commit regardless of the error estimate
    Always,
}

/// Result of one call to [`AdaptiveIntegrator::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub accepted: bool, // error within tolerance (always true for fixed schemes)
    pub committed: bool, // state was written back
    pub dt: f64,
    pub max_error: f64, // largest absolute error estimate over all particles
    pub error_ratio: f64, // largest error / tolerance, <= 1 when accepted
    pub recommended_substep: f64,
    pub failed_objects: Vec<String>, // objects whose step was skipped
}

/// Step-size control settings copied from `Parameters`
#[derive(Debug, Clone, Copy, PartialEq)]
struct StepControl {
    atol: f64,
    rtol: f64,
    safety: f64,
    min_substep: f64,
    max_substep: f64,
    xsph_epsilon: f64,
}

impl StepControl {
    /// Substep proposed after a step of `dt` with error ratio `ratio`:
    /// `dt * safety * ratio^(-1/(order+1))`, growth limited, then clamped to
    /// the substep bounds
    fn propose(&self, dt: f64, ratio: f64, order: u32) -> f64 {
        let growth = if ratio <= 0.0 {
            MAX_GROWTH
        } else if !ratio.is_finite() {
            MIN_GROWTH
        } else {
            (self.safety * ratio.powf(-1.0 / f64::from(order + 1))).max(MIN_GROWTH).min(MAX_GROWTH)
        };
        (dt * growth).max(self.min_substep).min(self.max_substep)
    }

    #[inline]
    fn ratio(&self, err: f64, scale: f64) -> f64 {
        let tol = self.atol + self.rtol * scale;
        if tol > 0.0 {
            err / tol
        } else if err > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
pub struct AdaptiveIntegrator {
    scheme: Scheme,
    control: StepControl,
    rotation: bool,
    tables: Vec<StageTable>,
    info: Vec<ObjectInfo>,
}

impl AdaptiveIntegrator {
    pub fn new(scheme: Scheme, params: &Parameters) -> Self {
        Self {
            scheme,
            control: StepControl {
                atol: params.atol,
                rtol: params.rtol,
                safety: params.safety,
                min_substep: params.min_substep,
                max_substep: params.max_substep,
                xsph_epsilon: params.xsph_epsilon,
            },
            rotation: true,
            tables: Vec::new(),
            info: Vec::new(),
        }
    }

    /// Enable or disable orientation integration for objects that carry it
    pub fn with_rotation(mut self, rotation: bool) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Per-particle recommended substeps of `object` from the last call
    pub fn recommended_substeps(&self, object: usize) -> &[f64] {
        self.info.get(object).map_or(&[], |info| &info.recommended)
    }

    /// Stage storage of `object`
    pub fn stage_table(&self, object: usize) -> Option<&StageTable> {
        self.tables.get(object)
    }

    /// Advance every object from `t` by `dt`.
    ///
    /// Objects failing setup (missing or mismatched attributes) are restored,
    /// reported and listed in `failed_objects`; the others still advance.
    /// A rejected step leaves every object at its initial state unless
    /// `policy` is [`CommitPolicy::Always`].
    pub fn step(
        &mut self,
        objects: &mut [ParticleSet],
        forces: &mut ForceSet,
        collisions: &CollisionSet,
        t: f64,
        dt: f64,
        policy: CommitPolicy,
    ) -> StepOutcome {
        let Self { scheme, control, rotation, tables, info: infos } = self;
        let (scheme, control) = (*scheme, *control);
        tables.resize_with(objects.len(), StageTable::default);
        infos.resize_with(objects.len(), ObjectInfo::default);

        let default_radius = forces.field().options().default_radius;
        let mut failed_objects = Vec::new();

        // INIT_STATE + RUN_STAGES + EVALUATE_ERROR, object by object
        for ((object, table), info) in objects.iter_mut().zip(tables.iter_mut()).zip(infos.iter_mut()) {
            let rotate = *rotation && rotation_ready(object);
            info.begin(object, rotate, default_radius);

            let result = match scheme.tableau() {
                Some(tab) => run_stages(tab, object, table, info, forces, collisions, t, dt),
                None => run_leapfrog(object, table, info, forces, collisions, t, dt),
            };
            match result {
                Ok(()) => {
                    let order = scheme.tableau().map_or(2, |tab| tab.order);
                    estimate_error(scheme, &control, table, info, dt, order);
                }
                Err(err) => {
                    skip_object(object, table, info, forces, &err);
                    failed_objects.push(object.name.clone());
                }
            }
        }

        let (mut max_error, mut error_ratio) = (0.0_f64, 0.0_f64);
        for info in infos.iter().filter(|i| !i.failed) {
            max_error = max_error.max(info.max_error);
            error_ratio = error_ratio.max(info.error_ratio);
        }

        let (accepted, mut recommended) = if scheme.is_embedded() {
            let order = scheme.tableau().map_or(1, |tab| tab.order);
            (error_ratio <= 1.0, control.propose(dt, error_ratio, order))
        } else {
            (true, dt.max(control.min_substep).min(control.max_substep))
        };
        if !accepted && dt <= control.min_substep * (1.0 + 1e-12) {
            recommended = control.min_substep;
            forces.diagnostics().report(
                Severity::Warning,
                &format!("{} step at minimum substep {dt:e} has error ratio {error_ratio:.3e} above tolerance", scheme.name()),
            );
        }

        // COMMIT_FINAL or restore
        let commit = accepted || policy == CommitPolicy::Always;
        for ((object, table), info) in objects.iter_mut().zip(tables.iter_mut()).zip(infos.iter_mut()) {
            if info.failed {
                continue;
            }
            if !commit {
                info.initial.store(object, info.rotate);
                table.release();
                continue;
            }
            if let Err(err) = commit_object(object, table, info, forces, collisions, &control, dt) {
                skip_object(object, table, info, forces, &err);
                failed_objects.push(object.name.clone());
            }
        }

        tracing::debug!(
            scheme = scheme.name(),
            t,
            dt,
            accepted,
            committed = commit,
            error_ratio,
            recommended,
            "integrator step"
        );

        StepOutcome {
            accepted,
            committed: commit,
            dt,
            max_error,
            error_ratio,
            recommended_substep: recommended,
            failed_objects,
        }
    }
}

fn rotation_ready(object: &ParticleSet) -> bool {
    let n = object.len();
    matches!(
        (&object.orientation, &object.angular_velocity),
        (Some(q), Some(w)) if q.len() == n && w.len() == n
    )
}

/// Setup failure: restore the object and report once per outer step.
/// Missing attributes were already surfaced by the field.
fn skip_object(object: &mut ParticleSet, table: &mut StageTable, info: &mut ObjectInfo, forces: &ForceSet, err: &SphError) {
    info.initial.store(object, info.rotate);
    info.failed = true;
    info.recommended.clear();
    table.release();
    tracing::debug!(object = %object.name, %err, "object skipped");
    if !matches!(err, SphError::MissingAttribute { .. }) {
        forces.diagnostics().report_once(
            &format!("{}:skipped", object.name),
            Severity::Error,
            &format!("object '{}' skipped: {err}", object.name),
        );
    }
}

// =========================================================================================
// Stages
// =========================================================================================

#[allow(clippy::too_many_arguments)]
fn run_stages(
    tab: &Tableau,
    object: &mut ParticleSet,
    table: &mut StageTable,
    info: &mut ObjectInfo,
    forces: &mut ForceSet,
    collisions: &CollisionSet,
    t: f64,
    dt: f64,
) -> Result<(), SphError> {
    let n = object.len();
    let stages = tab.stages();
    table.prepare(stages, n, info.rotate);

    for k in 0..stages {
        if k > 0 {
            // trial state for stage k
            load_combination(&info.initial, table, tab.a[k], object, info.rotate);
            let radius = &info.radius;
            collisions.resolve_all(&mut object.x, &mut object.v, &|i| radius[i]);
        }
        evaluate(forces, object, table, info, k, t + tab.c[k] * dt, dt)?;
    }

    // weighted combination of all stages
    combine_into(&info.initial, table, tab.b, &mut info.total, info.rotate);
    info.force.clear();
    info.force.extend((0..n).map(|i| weighted(&table.f, tab.b, i)));
    Ok(())
}

/// Kick-drift-kick velocity Verlet:
/// `v_half = v + dt/2 a(x)`, `x' = x + dt v_half`, `v' = v_half + dt/2 a(x')`
fn run_leapfrog(
    object: &mut ParticleSet,
    table: &mut StageTable,
    info: &mut ObjectInfo,
    forces: &mut ForceSet,
    collisions: &CollisionSet,
    t: f64,
    dt: f64,
) -> Result<(), SphError> {
    let n = object.len();
    let rotate = info.rotate;
    table.prepare(2, n, rotate);

    // a_n from x_n at time t_n
    evaluate(forces, object, table, info, 0, t, dt)?;

    // Kick + drift
    {
        let (x0, v0, kv) = (&info.initial.x, &info.initial.v, &table.kv[0]);
        object.x.par_iter_mut().zip(object.v.par_iter_mut()).enumerate().for_each(|(i, (x, v))| {
            *v = v0[i] + kv[i] * 0.5;
            *x = x0[i] + *v * dt;
        });
    }
    if rotate {
        let (q0, w0, kw) = (&info.initial.q, &info.initial.w, &table.kw[0]);
        if let (Some(q), Some(w)) = (object.orientation.as_mut(), object.angular_velocity.as_mut()) {
            q.par_iter_mut().zip(w.par_iter_mut()).enumerate().for_each(|(i, (q, w))| {
                *w = w0[i] + kw[i] * 0.5;
                *q = NQuat::from_scaled_axis(*w * dt) * q0[i];
            });
        }
    }
    if dt > 0.0 {
        let radius = &info.radius;
        collisions.resolve_all(&mut object.x, &mut object.v, &|i| radius[i]);
    }

    // a_n+1 from x_n+1 at time t_n+1
    evaluate(forces, object, table, info, 1, t + dt, dt)?;

    // Second kick
    let kv = &table.kv[1];
    info.total.x.clone_from(&object.x);
    info.total.v.clear();
    info.total.v.extend(object.v.iter().zip(kv).map(|(v, kv)| v + kv * 0.5));
    info.total.q.clear();
    info.total.w.clear();
    if rotate {
        if let (Some(q), Some(w)) = (&object.orientation, &object.angular_velocity) {
            info.total.q.clone_from(q);
            info.total.w.extend(w.iter().zip(&table.kw[1]).map(|(w, kw)| w + kw * 0.5));
        }
    }
    info.force.clear();
    info.force.extend((0..n).map(|i| weighted(&table.f, &LEAPFROG_FORCE_WEIGHTS, i)));
    Ok(())
}

/// Evaluate forces at the object's current (trial) state and fill stage `k`.
/// A particle with zero or non-finite mass, or a non-finite force, gets a
/// zero acceleration for the stage; reported once per object per step.
fn evaluate(
    forces: &mut ForceSet,
    object: &ParticleSet,
    table: &mut StageTable,
    info: &mut ObjectInfo,
    k: usize,
    t: f64,
    dt: f64,
) -> Result<(), SphError> {
    forces.accumulate_forces(t, object, &mut table.f[k])?;

    let m = forces.field().masses();
    let f = &table.f[k];
    let v = &object.v;
    let bad: usize = table.kx[k]
        .par_iter_mut()
        .zip(table.kv[k].par_iter_mut())
        .enumerate()
        .map(|(i, (kx, kv))| {
            *kx = v[i] * dt;
            if m[i] > 0.0 && m[i].is_finite() && f[i].iter().all(|c| c.is_finite()) {
                *kv = f[i] * (dt / m[i]);
                0
            } else {
                *kv = NVec3::zeros();
                1
            }
        })
        .sum();

    if info.rotate {
        if let Some(w) = object.angular_velocity.as_deref() {
            let torque = object.torque.as_deref();
            let radius = &info.radius;
            table.kq[k]
                .par_iter_mut()
                .zip(table.kw[k].par_iter_mut())
                .enumerate()
                .for_each(|(i, (kq, kw))| {
                    *kq = w[i] * dt;
                    // solid sphere
                    let inertia = 0.4 * m[i] * radius[i] * radius[i];
                    let tau = torque.and_then(|t| t.get(i)).copied().unwrap_or_else(NVec3::zeros);
                    *kw = if inertia > 0.0 && inertia.is_finite() {
                        tau * (dt / inertia)
                    } else {
                        NVec3::zeros()
                    };
                });
        }
    }

    if bad > 0 && !info.reported {
        info.reported = true;
        forces.diagnostics().report(
            Severity::Warning,
            &format!(
                "object '{}': {bad} particle(s) with zero mass or non-finite force, acceleration zeroed",
                object.name
            ),
        );
    }
    Ok(())
}

/// Write `initial + sum_j a_j k_j` into the object
fn load_combination(initial: &StateArrays, table: &StageTable, a: &[f64], object: &mut ParticleSet, rotate: bool) {
    object.x.par_iter_mut().zip(object.v.par_iter_mut()).enumerate().for_each(|(i, (x, v))| {
        *x = initial.x[i] + weighted(&table.kx, a, i);
        *v = initial.v[i] + weighted(&table.kv, a, i);
    });
    if rotate {
        if let (Some(q), Some(w)) = (object.orientation.as_mut(), object.angular_velocity.as_mut()) {
            q.par_iter_mut().zip(w.par_iter_mut()).enumerate().for_each(|(i, (q, w))| {
                *q = NQuat::from_scaled_axis(weighted(&table.kq, a, i)) * initial.q[i];
                *w = initial.w[i] + weighted(&table.kw, a, i);
            });
        }
    }
}

/// `out = initial + sum_j b_j k_j`
fn combine_into(initial: &StateArrays, table: &StageTable, b: &[f64], out: &mut StateArrays, rotate: bool) {
    let n = initial.x.len();
    out.x.clear();
    out.x.extend((0..n).map(|i| initial.x[i] + weighted(&table.kx, b, i)));
    out.v.clear();
    out.v.extend((0..n).map(|i| initial.v[i] + weighted(&table.kv, b, i)));
    out.q.clear();
    out.w.clear();
    if rotate {
        out.q.extend((0..n).map(|i| NQuat::from_scaled_axis(weighted(&table.kq, b, i)) * initial.q[i]));
        out.w.extend((0..n).map(|i| initial.w[i] + weighted(&table.kw, b, i)));
    }
}

#[inline]
fn weighted(stages: &[Vec<NVec3>], weights: &[f64], i: usize) -> NVec3 {
    stages
        .iter()
        .zip(weights)
        .filter(|(_, w)| **w != 0.0)
        .fold(NVec3::zeros(), |acc, (k, &w)| acc + k[i] * w)
}

// =========================================================================================
// Error estimate and commit
// =========================================================================================

/// Per-particle error `|sum_j (b_j - b*_j) k_j|` for positions and
/// velocities, scaled by `atol + rtol * |state|`. Fills the per-particle
/// recommended substeps and the object's maximum error and ratio.
fn estimate_error(scheme: Scheme, control: &StepControl, table: &StageTable, info: &mut ObjectInfo, dt: f64, order: u32) {
    let n = info.initial.x.len();
    info.recommended.clear();

    let tab = match scheme.tableau() {
        Some(tab) if tab.b_embedded.is_some() => tab,
        _ => {
            let fixed = dt.max(control.min_substep).min(control.max_substep);
            info.recommended.resize(n, fixed);
            return;
        }
    };
    let weights: Vec<f64> = (0..tab.stages()).map(|k| tab.error_weight(k)).collect();

    let errors: Vec<(f64, f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let ex = weighted(&table.kx, &weights, i).norm();
            let ev = weighted(&table.kv, &weights, i).norm();
            let ratio = control
                .ratio(ex, info.total.x[i].norm())
                .max(control.ratio(ev, info.total.v[i].norm()));
            (ex.max(ev), ratio)
        })
        .collect();

    for &(err, ratio) in &errors {
        info.max_error = info.max_error.max(err);
        info.error_ratio = info.error_ratio.max(ratio);
        info.recommended.push(control.propose(dt, ratio, order));
    }
}

/// Write the combined state back, then apply collisions, write back the
/// structural density and smooth velocities (XSPH) at the final state
fn commit_object(
    object: &mut ParticleSet,
    table: &mut StageTable,
    info: &ObjectInfo,
    forces: &mut ForceSet,
    collisions: &CollisionSet,
    control: &StepControl,
    dt: f64,
) -> Result<(), SphError> {
    info.total.store(object, info.rotate);
    object.force.clone_from(&info.force);

    if dt > 0.0 {
        let radius = &info.radius;
        collisions.resolve_all(&mut object.x, &mut object.v, &|i| radius[i]);
    }

    if forces.uses_neighbours() {
        forces.prepare(object)?;
        if control.xsph_epsilon > 0.0 && dt > 0.0 {
            let field = forces.field();
            let kernel = forces.kernels().density;
            let v = &object.v;
            let smoothed: Vec<NVec3> = (0..object.len())
                .into_par_iter()
                .map(|i| field.xsph_velocity(i, kernel, control.xsph_epsilon).unwrap_or(v[i]))
                .collect();
            object.v = smoothed;
        }
        object.rho = Some(forces.densities().to_vec());
    }

    table.release();
    Ok(())
}
