use std::sync::Arc;
use std::time::Instant;

use crate::simulation::collision::{CollisionSet, PlaneCollider};
use crate::simulation::diagnostics::Diagnostics;
use crate::simulation::engine::Engine;
use crate::simulation::integrator::{AdaptiveIntegrator, CommitPolicy, Scheme};
use crate::simulation::params::Parameters;
use crate::simulation::pool::ScratchPool;
use crate::simulation::solver::build_force_set;
use crate::simulation::spatial_hash::SpatialHash;
use crate::simulation::states::{NVec3, ParticleSet};

const RADIUS: f64 = 0.05;

/// Helper to build a deterministic particle cloud of size `n`
fn make_positions(n: usize) -> Vec<NVec3> {
    // roughly 8 neighbours per particle at RADIUS
    let side = (n as f64).cbrt() * RADIUS * 1.6;
    (0..n)
        .map(|i| {
            let i_f = i as f64;
            // deterministic positions, no rand needed
            NVec3::new(
                ((i_f * 0.37).sin() * 0.5 + 0.5) * side,
                ((i_f * 0.13).cos() * 0.5 + 0.5) * side,
                ((i_f * 0.07).sin() * 0.5 + 0.5) * side,
            )
        })
        .collect()
}

/// Helper to build a fluid object of size `n`
fn make_object(n: usize) -> ParticleSet {
    let x = make_positions(n);
    let v = vec![NVec3::zeros(); n];
    ParticleSet::from_state("bench", x, v)
        .with_mass(1.0)
        .with_radius(RADIUS)
}

/// Helper for fluid parameters tuned to `make_object`
fn make_params() -> Parameters {
    Parameters {
        h0: 1e-3,
        min_substep: 1e-6,
        max_substep: 1e-2,
        default_radius: RADIUS,
        rest_density: 1000.0,
        gas_constant: 2.0,
        viscosity: 0.05,
        gravity: NVec3::new(0.0, -9.81, 0.0),
        ..Parameters::default()
    }
}

/// Brute-force neighbour count, the reference for the hash
fn brute_force_count(x: &[NVec3], radius: f64) -> usize {
    let r2 = radius * radius;
    x.iter()
        .map(|p| x.iter().filter(|q| (*q - p).norm_squared() <= r2).count())
        .sum()
}

fn hash_count(hash: &SpatialHash, x: &[NVec3], radius: f64, buf: &mut Vec<usize>) -> usize {
    x.iter()
        .map(|p| {
            hash.query_into(p, radius, buf);
            buf.len()
        })
        .sum()
}

/// Time spatial-hash neighbour queries against brute force
pub fn bench_neighbours() {
    // Different system sizes to test
    let ns = [500, 1000, 2000, 4000, 8000];
    let radius = 2.0 * RADIUS;

    for n in ns {
        let x = make_positions(n);
        let mut hash = SpatialHash::new(radius);
        let mut buf = Vec::new();

        // Time rebuild + queries
        let t0 = Instant::now();
        hash.rebuild(&x, radius);
        let hashed = hash_count(&hash, &x, radius, &mut buf);
        let dt_hash = t0.elapsed().as_secs_f64();

        // Time brute force
        let t1 = Instant::now();
        let brute = brute_force_count(&x, radius);
        let dt_brute = t1.elapsed().as_secs_f64();

        let agree = if hashed == brute { "ok" } else { "MISMATCH" };
        println!("N = {n:5}, hash = {dt_hash:8.6} s, brute = {dt_brute:8.6} s, pairs = {hashed} ({agree})");
    }
}

/// Same comparison as CSV for plotting
pub fn bench_neighbours_curve() {
    println!("N,hash_ms,brute_ms");
    let radius = 2.0 * RADIUS;

    for n in (500..=8000).step_by(500) {
        let x = make_positions(n);
        let mut hash = SpatialHash::new(radius);
        let mut buf = Vec::new();

        let t0 = Instant::now();
        hash.rebuild(&x, radius);
        let _ = hash_count(&hash, &x, radius, &mut buf);
        let ms_hash = t0.elapsed().as_secs_f64() * 1000.0;

        // only a few brute-force sizes stay affordable
        let ms_brute = if n <= 4000 {
            let t1 = Instant::now();
            let _ = brute_force_count(&x, radius);
            t1.elapsed().as_secs_f64() * 1000.0
        } else {
            f64::NAN
        };

        println!("{n},{ms_hash:.6},{ms_brute:.6}");
    }
}

/// Time one integrator step per scheme on the same fluid block
pub fn bench_schemes() {
    let n = 4000;
    let steps = 3;
    let params = make_params();
    let template = make_object(n);
    let collisions = CollisionSet::new(Default::default()).with(PlaneCollider::ground(0.0));

    for scheme in Scheme::ALL {
        let engine = Engine {
            scheme,
            ..Engine::default()
        };
        let diagnostics = Diagnostics::tracing();
        let mut forces = build_force_set(&engine, &params, ScratchPool::for_current_threads(), Arc::clone(&diagnostics));
        let mut integrator = AdaptiveIntegrator::new(scheme, &params);
        let mut objects = vec![template.clone()];

        // Warm-up
        integrator.step(&mut objects, &mut forces, &collisions, 0.0, params.h0, CommitPolicy::Always);

        let t0 = Instant::now();
        let mut ratio = 0.0_f64;
        for k in 0..steps {
            let outcome = integrator.step(&mut objects, &mut forces, &collisions, k as f64 * params.h0, params.h0, CommitPolicy::Always);
            ratio = ratio.max(outcome.error_ratio);
        }
        let per_step = t0.elapsed().as_secs_f64() / steps as f64;

        println!(
            "{:>9}: stages = {}, step = {per_step:8.6} s, max error ratio = {ratio:.3e}",
            scheme.name(),
            scheme.stages()
        );
    }
}
