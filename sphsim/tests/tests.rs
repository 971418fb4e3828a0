use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use sphsim::simulation::collision::{BoxCollider, Collider, CollisionSet, ImpactResponse, PlaneCollider};
use sphsim::simulation::diagnostics::{Diagnostics, MemorySink, Severity};
use sphsim::simulation::error::SphError;
use sphsim::simulation::field::{FieldOptions, FieldStage, SphField};
use sphsim::simulation::forces::{DoubleDensityPressure, ForceSet, GravityForce, PressureForce, SurfaceTensionForce, ViscosityForce};
use sphsim::simulation::kernels::{CubicSpline, Kernel, KernelKind, KernelSet, Poly6, SmoothingKernel, Spiky, ViscosityKernel};
use sphsim::simulation::neighbors::{Cutoff, NeighborLists};
use sphsim::simulation::octree::PointOctree;
use sphsim::simulation::pool::ScratchPool;
use sphsim::simulation::spatial_hash::SpatialHash;
use sphsim::simulation::states::{NVec3, ParticleSet};

const KINDS: [KernelKind; 4] = [KernelKind::Poly6, KernelKind::Spiky, KernelKind::Viscosity, KernelKind::CubicSpline];

/// Diagnostics that keep every report for inspection
pub fn memory_diagnostics() -> (Arc<MemorySink>, Arc<Diagnostics>) {
    let sink = Arc::new(MemorySink::new());
    let diagnostics = Arc::new(Diagnostics::new(sink.clone()));
    (sink, diagnostics)
}

/// Uniform random points in `[0, extent)^3`
pub fn random_positions(n: usize, extent: f64, seed: u64) -> Vec<NVec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| NVec3::new(rng.gen_range(0.0..extent), rng.gen_range(0.0..extent), rng.gen_range(0.0..extent)))
        .collect()
}

/// Two particles separated along the x-axis, centred on the origin
pub fn two_particles(dist: f64, radius: f64) -> ParticleSet {
    let x = vec![NVec3::new(-dist / 2.0, 0.0, 0.0), NVec3::new(dist / 2.0, 0.0, 0.0)];
    ParticleSet::from_state("pair", x, vec![NVec3::zeros(); 2])
        .with_mass(1.0)
        .with_radius(radius)
}

/// `n^3` lattice with the given spacing, starting at the origin
pub fn lattice(n: usize, spacing: f64, radius: f64) -> ParticleSet {
    let mut x = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                x.push(NVec3::new(i as f64, j as f64, k as f64) * spacing);
            }
        }
    }
    let len = x.len();
    ParticleSet::from_state("lattice", x, vec![NVec3::zeros(); len])
        .with_mass(1.0)
        .with_radius(radius)
}

/// Field taken through every setup stage
pub fn ready_field(object: &ParticleSet, options: FieldOptions) -> (SphField, Arc<MemorySink>) {
    let (sink, diagnostics) = memory_diagnostics();
    let mut field = SphField::new(options, diagnostics);
    field.initialize(object).unwrap();
    field.build_neighbours().unwrap();
    field.init_velocity_data(&object.v).unwrap();
    (field, sink)
}

/// Forces of `object` under the given terms
pub fn forces_on(object: &ParticleSet, forces: ForceSet) -> Vec<NVec3> {
    let mut forces = forces;
    let mut out = vec![NVec3::zeros(); object.len()];
    forces.accumulate_forces(0.0, object, &mut out).unwrap();
    out
}

pub fn empty_force_set(options: FieldOptions) -> ForceSet {
    let (_, diagnostics) = memory_diagnostics();
    ForceSet::new(KernelSet::default(), options, ScratchPool::new(3), diagnostics)
}

fn brute_force_within(x: &[NVec3], p: &NVec3, radius: f64) -> Vec<usize> {
    (0..x.len()).filter(|&j| (x[j] - p).norm_squared() <= radius * radius).collect()
}

// ==================================================================================
// Kernel tests
// ==================================================================================

#[test]
fn kernels_vanish_at_and_beyond_support() {
    let h = 0.5;
    for kind in KINDS {
        for kernel in [Kernel::scaled(kind), Kernel::unscaled(kind)] {
            assert_eq!(kernel.weight(h * h, h), 0.0, "{kind:?} weight at h");
            assert_eq!(kernel.weight(4.0 * h * h, h), 0.0, "{kind:?} weight beyond h");
            assert_eq!(kernel.gradient_weight(h, h), 0.0, "{kind:?} gradient at h");
            assert_eq!(kernel.laplacian_weight(1.5 * h, h), 0.0, "{kind:?} laplacian beyond h");
        }
    }
}

#[test]
fn kernels_are_non_negative_and_continuous_at_the_edge() {
    let h = 0.5;
    for kind in KINDS {
        let kernel = Kernel::scaled(kind);
        for step in 0..1000 {
            let r = h * step as f64 / 1000.0;
            let w = kernel.weight(r * r, h);
            assert!(w >= 0.0 && w.is_finite(), "{kind:?} weight {w} at r = {r}");
        }
        let edge = h * (1.0 - 1e-6);
        let w = kernel.weight(edge * edge, h);
        assert!(w < 1e-12 * kernel.normalization(h).max(1.0), "{kind:?} jumps at the support edge: {w}");
    }
}

#[test]
fn scaled_kernels_integrate_to_one() {
    let h = 0.7;
    let steps = 200_000;
    let dr = h / steps as f64;
    for kind in KINDS {
        let kernel = Kernel::scaled(kind);
        let integral: f64 = (0..steps)
            .map(|k| {
                let r = (k as f64 + 0.5) * dr;
                4.0 * std::f64::consts::PI * r * r * kernel.weight(r * r, h) * dr
            })
            .sum();
        // the viscosity kernel is capped near its singular core
        let tol = if kind == KernelKind::Viscosity { 1e-2 } else { 1e-3 };
        assert!((integral - 1.0).abs() < tol, "{kind:?} integrates to {integral}");
    }
}

#[test]
fn unscaled_kernels_keep_the_shape_only() {
    let h = 2.0;
    assert_eq!(Kernel::unscaled(KernelKind::Poly6).weight(0.0, h), 1.0);
    assert_eq!(Kernel::unscaled(KernelKind::Spiky).weight(0.0, h), 1.0);
    assert_eq!(Kernel::unscaled(KernelKind::CubicSpline).weight(0.0, h), 1.0);
    assert_eq!(Kernel::unscaled(KernelKind::Poly6).normalization(h), 1.0);
    let expected = 315.0 / (64.0 * std::f64::consts::PI * h * h * h);
    assert!((Kernel::scaled(KernelKind::Poly6).normalization(h) - expected).abs() < 1e-15);
}

#[test]
fn kernel_gradient_is_zero_at_origin() {
    let h = 0.3;
    for kind in KINDS {
        let kernel = Kernel::scaled(kind);
        assert_eq!(kernel.gradient_weight(0.0, h), 0.0, "{kind:?}");
        assert_eq!(kernel.gradient(&NVec3::zeros(), 0.0, h), NVec3::zeros(), "{kind:?}");
    }
}

#[test]
fn kernel_gradient_is_antisymmetric_and_points_inward() {
    let h = 1.0;
    let rij = NVec3::new(0.2, -0.1, 0.3);
    let r = rij.norm();
    for kind in KINDS {
        let kernel = Kernel::scaled(kind);
        let g_ij = kernel.gradient(&rij, r, h);
        let g_ji = kernel.gradient(&-rij, r, h);
        assert!((g_ij + g_ji).norm() < 1e-12, "{kind:?} gradient not antisymmetric");
        // W decreases outward
        assert!(g_ij.dot(&rij) < 0.0, "{kind:?} gradient points outward");
    }
}

#[test]
fn static_kernels_match_runtime_selection() {
    let (h, r) = (0.4, 0.13);
    assert_eq!(Poly6.weight(r * r, h), Kernel::scaled(KernelKind::Poly6).weight(r * r, h));
    assert_eq!(Spiky.gradient_weight(r, h), Kernel::scaled(KernelKind::Spiky).gradient_weight(r, h));
    assert_eq!(ViscosityKernel.laplacian_weight(r, h), Kernel::scaled(KernelKind::Viscosity).laplacian_weight(r, h));
    assert_eq!(CubicSpline.weight(r * r, h), Kernel::scaled(KernelKind::CubicSpline).weight(r * r, h));
    assert_eq!(Kernel::from(Spiky), Kernel::scaled(KernelKind::Spiky));
}

#[test]
fn viscosity_laplacian_is_positive_inside_support() {
    let h = 0.5;
    for step in 1..100 {
        let r = h * step as f64 / 100.0;
        assert!(ViscosityKernel.laplacian_weight(r, h) > 0.0, "negative laplacian at r = {r}");
    }
}

// ==================================================================================
// Spatial hash tests
// ==================================================================================

#[test]
fn hash_query_matches_brute_force() {
    for (seed, n) in [(1, 0), (2, 1), (3, 10), (4, 500), (5, 2000)] {
        let x = random_positions(n, 1.0, seed);
        let mut hash = SpatialHash::new(0.1);
        hash.rebuild(&x, 0.1);

        let probes = random_positions(50, 1.2, seed + 100);
        for radius in [0.0, 0.05, 0.1, 0.25, 0.7] {
            for p in probes.iter().chain(x.iter().take(20)) {
                let mut got = hash.query(p, radius);
                got.sort_unstable();
                assert_eq!(got, brute_force_within(&x, p, radius), "n = {n}, radius = {radius}");
            }
        }
    }
}

#[test]
fn hash_with_degenerate_cell_width_is_empty() {
    let x = random_positions(20, 1.0, 7);
    for width in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let mut hash = SpatialHash::new(width);
        hash.rebuild(&x, width);
        assert!(!hash.is_valid());
        assert!(hash.query(&x[0], 10.0).is_empty());
    }
}

#[test]
fn hash_keeps_positions_of_its_epoch() {
    let mut x = vec![NVec3::zeros(), NVec3::new(0.05, 0.0, 0.0)];
    let mut hash = SpatialHash::new(0.1);
    hash.rebuild(&x, 0.1);
    let epoch = hash.epoch();

    // moving the caller's copy changes nothing until the next rebuild
    x[1] = NVec3::new(5.0, 0.0, 0.0);
    assert_eq!(hash.query(&NVec3::zeros(), 0.06).len(), 2);

    hash.rebuild(&x, 0.1);
    assert_eq!(hash.query(&NVec3::zeros(), 0.06), vec![0]);
    assert_eq!(hash.epoch(), epoch + 1);

    let i = hash.insert(NVec3::new(0.01, 0.0, 0.0));
    assert_eq!(i, 2);
    let mut got = hash.query(&NVec3::zeros(), 0.06);
    got.sort_unstable();
    assert_eq!(got, vec![0, 2]);
}

// ==================================================================================
// Neighbour list tests
// ==================================================================================

#[test]
fn neighbour_lists_match_brute_force() {
    let mut rng = StdRng::seed_from_u64(11);
    let n = 600;
    let x = random_positions(n, 1.0, 12);
    let radii: Vec<f64> = (0..n).map(|_| rng.gen_range(0.02..0.06)).collect();
    let scale = 1.5;

    let mut hash = SpatialHash::default();
    hash.rebuild(&x, 2.0 * 0.06 * scale);
    let lists = NeighborLists::build(&hash, &radii, Cutoff::RadiusScaled(scale));

    assert_eq!(lists.len(), n);
    let mut pairs = 0;
    for i in 0..n {
        let expected: Vec<usize> = (0..n)
            .filter(|&j| {
                let c = scale * (radii[i] + radii[j]);
                j != i && (x[i] - x[j]).norm_squared() < c * c
            })
            .collect();
        let got: Vec<usize> = lists.neighbours(i).iter().map(|e| e.index).collect();
        assert_eq!(got, expected, "particle {i}");
        for e in lists.neighbours(i) {
            assert!((e.dist2 - (x[i] - x[e.index]).norm_squared()).abs() < 1e-15);
        }
        pairs += expected.len();
    }
    assert_eq!(lists.pair_count(), pairs);
    assert_eq!(lists.epoch(), hash.epoch());
}

#[test]
fn neighbour_cutoff_is_strict() {
    let x = vec![NVec3::zeros(), NVec3::new(1.0, 0.0, 0.0), NVec3::new(0.5, 0.0, 0.0)];
    let mut hash = SpatialHash::default();
    hash.rebuild(&x, 1.0);
    let lists = NeighborLists::build(&hash, &[0.5; 3], Cutoff::Fixed(1.0));
    // exactly at the cutoff is outside
    assert_eq!(lists.neighbours(0).iter().map(|e| e.index).collect::<Vec<_>>(), vec![2]);
    assert_eq!(lists.neighbours(2).len(), 2);
    assert!(lists.neighbours(99).is_empty());
}

#[test]
fn neighbour_lists_with_short_radii_are_empty() {
    let x = random_positions(40, 0.2, 5);
    let mut hash = SpatialHash::default();
    hash.rebuild(&x, 0.1);
    let lists = NeighborLists::build(&hash, &[0.05; 10], Cutoff::RadiusScaled(1.0));
    assert_eq!(lists.len(), 40);
    assert_eq!(lists.pair_count(), 0);
    assert!((0..40).all(|i| lists.neighbours(i).is_empty()));
    assert_eq!(lists.epoch(), hash.epoch());
}

// ==================================================================================
// Particle set tests
// ==================================================================================

#[test]
fn short_attributes_fall_back_to_defaults() {
    let mut object = lattice(2, 0.1, 0.05);
    object.v = vec![NVec3::new(0.0, 1.0, 0.0); 8];
    object.m = Some(vec![3.0; 2]);
    object.radius = Some(vec![0.2]);

    assert_eq!(object.mass_or(1, 0.5), 3.0);
    assert_eq!(object.mass_or(7, 0.5), 0.5);
    assert_eq!(object.radius_or(0, 0.1), 0.2);
    assert_eq!(object.radius_or(4, 0.1), 0.1);
    // 2 * 3.0 + 6 * 0.5
    assert!((object.momentum(0.5) - NVec3::new(0.0, 9.0, 0.0)).norm() < 1e-12);
}

// ==================================================================================
// Octree tests
// ==================================================================================

#[test]
fn octree_nearest_matches_brute_force() {
    let x = random_positions(800, 1.0, 21);
    let tree = PointOctree::build(&x);
    for p in random_positions(100, 1.5, 22) {
        let got = tree.nearest(&p).unwrap();
        let best = x.iter().map(|q| (q - p).norm_squared()).fold(f64::INFINITY, f64::min);
        assert!(((x[got] - p).norm_squared() - best).abs() < 1e-15);
    }
}

#[test]
fn octree_handles_empty_and_repeated_points() {
    let tree = PointOctree::build(&[]);
    assert!(tree.is_empty());
    assert_eq!(tree.nearest(&NVec3::zeros()), None);

    let same = vec![NVec3::new(1.0, 1.0, 1.0); 64];
    let tree = PointOctree::build(&same);
    assert!(tree.nearest(&NVec3::zeros()).is_some());
}

// ==================================================================================
// Field tests
// ==================================================================================

#[test]
fn field_queries_before_setup_return_missing_and_report_once() {
    let (sink, diagnostics) = memory_diagnostics();
    let mut field = SphField::new(FieldOptions::default(), diagnostics);
    assert_eq!(field.stage(), FieldStage::Uninitialized);

    assert_eq!(field.density_at(&NVec3::zeros(), Poly6, 1.0), None);
    assert_eq!(field.density_at(&NVec3::zeros(), Poly6, 1.0), None);
    assert_eq!(sink.entries().len(), 1);
    assert_eq!(sink.entries()[0].0, Severity::Warning);

    let object = lattice(2, 0.1, 0.1);
    field.initialize(&object).unwrap();
    assert_eq!(field.stage(), FieldStage::Initialized);
    assert!(field.density_at(&NVec3::zeros(), Poly6, 1.0).is_some());
    assert_eq!(field.density_particle(0, Poly6, 1.0), None);
    assert!(sink.count_containing("NeighboursBuilt") >= 1);

    field.build_neighbours().unwrap();
    assert_eq!(field.stage(), FieldStage::NeighboursBuilt);
    assert_eq!(field.sample_velocity_thread_safe(&NVec3::zeros(), Poly6, None), None);
    assert_eq!(sink.count_containing("VelocityReady"), 1);

    field.init_velocity_data(&object.v).unwrap();
    assert_eq!(field.stage(), FieldStage::VelocityReady);
}

#[test]
fn field_setup_calls_out_of_order_fail() {
    let (_, diagnostics) = memory_diagnostics();
    let mut field = SphField::new(FieldOptions::default(), diagnostics);
    assert!(matches!(field.build_neighbours(), Err(SphError::StageNotReady { .. })));
    assert!(matches!(field.init_velocity_data(&[]), Err(SphError::StageNotReady { .. })));
}

#[test]
fn field_need_volume_requires_mass_and_density() {
    let options = FieldOptions {
        need_volume: true,
        ..FieldOptions::default()
    };
    let (sink, diagnostics) = memory_diagnostics();
    let mut field = SphField::new(options, diagnostics);

    let object = lattice(2, 0.1, 0.1);
    let err = field.initialize(&object).unwrap_err();
    assert!(matches!(err, SphError::MissingAttribute { attribute: "density", .. }));
    assert_eq!(field.stage(), FieldStage::Uninitialized);
    assert_eq!(sink.entries()[0].0, Severity::Error);

    field.initialize(&object.with_density(1000.0)).unwrap();
    assert_eq!(field.stage(), FieldStage::Initialized);
}

#[test]
fn field_rejects_mismatched_attribute_lengths() {
    let mut object = lattice(2, 0.1, 0.1);
    object.m = Some(vec![1.0; 3]);
    let (_, diagnostics) = memory_diagnostics();
    let mut field = SphField::new(FieldOptions::default(), diagnostics);
    assert!(matches!(
        field.initialize(&object),
        Err(SphError::AttributeLength { attribute: "mass", expected: 8, found: 3 })
    ));
}

#[test]
fn density_does_not_depend_on_insertion_order() {
    let n = 400;
    let x = random_positions(n, 0.6, 31);
    let original = ParticleSet::from_state("a", x.clone(), vec![NVec3::zeros(); n])
        .with_mass(0.5)
        .with_radius(0.05);

    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(&mut StdRng::seed_from_u64(32));
    let shuffled = ParticleSet::from_state("b", perm.iter().map(|&i| x[i]).collect(), vec![NVec3::zeros(); n])
        .with_mass(0.5)
        .with_radius(0.05);

    let (a, _) = ready_field(&original, FieldOptions::default());
    let (b, _) = ready_field(&shuffled, FieldOptions::default());
    let rho_a = a.compute_densities(Poly6, 1.0).unwrap();
    let rho_b = b.compute_densities(Poly6, 1.0).unwrap();

    for (k, &i) in perm.iter().enumerate() {
        assert!((rho_a[i] - rho_b[k]).abs() <= 1e-12 * rho_a[i], "particle {i}");
        assert_eq!(a.density_particle(i, Poly6, 1.0), Some(rho_a[i]));
    }
    for p in random_positions(30, 0.6, 33) {
        let (da, db) = (a.density_at(&p, Poly6, 1.0).unwrap(), b.density_at(&p, Poly6, 1.0).unwrap());
        assert!((da - db).abs() <= 1e-12 * da.max(1.0));
    }
}

#[test]
fn density_includes_self_contribution() {
    let object = ParticleSet::from_state("one", vec![NVec3::zeros()], vec![NVec3::zeros()])
        .with_mass(2.0)
        .with_radius(0.5);
    let (field, _) = ready_field(&object, FieldOptions::default());
    let expected = 2.0 * Poly6.weight(0.0, 1.0);
    assert!((field.density_particle(0, Poly6, 1.0).unwrap() - expected).abs() < 1e-12);
    assert!((field.density_particle(0, Poly6, 3.0).unwrap() - 3.0 * expected).abs() < 1e-12);
    // a probe on the particle sees the same support
    assert!((field.density_at(&NVec3::zeros(), Poly6, 1.0).unwrap() - expected).abs() < 1e-12);
}

#[test]
fn isolated_particle_self_terms_per_operation() {
    let object = ParticleSet::from_state("one", vec![NVec3::new(0.3, 0.1, 0.2)], vec![NVec3::new(1.0, 0.0, 0.0)])
        .with_mass(2.0)
        .with_radius(0.25);
    let (field, _) = ready_field(&object, FieldOptions::default());
    let h = field.pair_support(0, 0);
    let attr = [5.0];

    // included
    let rho = field.density_particle(0, Poly6, 1.0).unwrap();
    assert!((rho - 2.0 * Poly6.weight(0.0, h)).abs() < 1e-12);
    let (far, near) = field.sample_double_density(0, Poly6, 0.5, 1.0).unwrap();
    assert!((far - rho).abs() < 1e-12);
    assert!((near - 2.0 * Poly6.weight(0.0, 0.5 * h)).abs() < 1e-12);
    assert_eq!(field.color_laplacian_particle(0, Poly6), Some(Poly6.laplacian_weight(0.0, h)));

    // chosen by the caller
    let with_self = field.sample_particle(0, &attr, Poly6, false, true).unwrap();
    assert!((with_self.value - 5.0 * Poly6.weight(0.0, h)).abs() < 1e-12);
    let without_self = field.sample_particle(0, &attr, Poly6, false, false).unwrap();
    assert_eq!((without_self.value, without_self.weight_sum), (0.0, 0.0));

    // excluded
    assert_eq!(field.gradient_particle(0, &attr, Spiky), Some(NVec3::zeros()));
    assert_eq!(field.laplacian_particle(0, &attr, ViscosityKernel), Some(0.0));
    assert_eq!(field.color_gradient_particle(0, Spiky), Some(NVec3::zeros()));
    assert_eq!(field.xsph_velocity(0, Poly6, 0.5), Some(NVec3::new(1.0, 0.0, 0.0)));
    assert!(field.find_close_points_particle(0).unwrap().is_empty());
}

#[test]
fn normalized_sample_reproduces_constant_attribute() {
    let object = lattice(4, 0.05, 0.05);
    let (field, _) = ready_field(&object, FieldOptions::default());
    let attr = vec![3.0; object.len()];

    let s = field.sample_at(&NVec3::new(0.07, 0.08, 0.06), &attr, Poly6, true).unwrap();
    assert!((s.value - 3.0).abs() < 1e-12);
    assert!(s.weight_sum > 0.0);

    let s = field.sample_particle(5, &attr, Poly6, true, true).unwrap();
    assert!((s.value - 3.0).abs() < 1e-12);

    // far away nothing contributes
    let s = field.sample_at(&NVec3::new(10.0, 0.0, 0.0), &attr, Poly6, true).unwrap();
    assert_eq!(s.value, 0.0);
    assert_eq!(s.weight_sum, 0.0);
    assert_eq!(field.color_at(&NVec3::new(10.0, 0.0, 0.0), Poly6), Some(0.0));
}

#[test]
fn gradient_points_towards_higher_values() {
    let object = lattice(5, 0.05, 0.05);
    let (field, _) = ready_field(&object, FieldOptions::default());
    let attr: Vec<f64> = object.x.iter().map(|p| p.x).collect();

    let centre = NVec3::new(0.1, 0.1, 0.1);
    let g = field.gradient_at(&centre, &attr, Spiky).unwrap();
    assert!(g.x > 0.0);
    assert!(g.y.abs() < 1e-9 * g.x && g.z.abs() < 1e-9 * g.x);

    // centre particle of the 5^3 lattice
    let g = field.gradient_particle(62, &attr, Spiky).unwrap();
    assert!(g.x > 0.0);
    assert!(g.y.abs() < 1e-9 * g.x && g.z.abs() < 1e-9 * g.x);

    // difference form: a constant attribute has no gradient or laplacian
    let flat = vec![1.0; object.len()];
    assert_eq!(field.gradient_particle(62, &flat, Spiky), Some(NVec3::zeros()));
    assert_eq!(field.laplacian_particle(62, &flat, ViscosityKernel), Some(0.0));
}

#[test]
fn shared_neighbour_lists_give_the_same_samples() {
    let object = lattice(4, 0.05, 0.05);
    let (owner, _) = ready_field(&object, FieldOptions::default());
    let lists = Arc::clone(owner.neighbour_lists().unwrap());

    let (_, diagnostics) = memory_diagnostics();
    let mut borrower = SphField::new(FieldOptions::default(), diagnostics);
    borrower.initialize(&object).unwrap();
    borrower.set_neighbours(Arc::clone(&lists)).unwrap();
    assert_eq!(borrower.stage(), FieldStage::NeighboursBuilt);
    assert_eq!(borrower.density_particle(21, Poly6, 1.0), owner.density_particle(21, Poly6, 1.0));

    let mut wrong = SphField::new(FieldOptions::default(), memory_diagnostics().1);
    wrong.initialize(&lattice(2, 0.05, 0.05)).unwrap();
    assert!(matches!(wrong.set_neighbours(lists), Err(SphError::AttributeLength { .. })));

    // laplacian of a constant over the probe support is the colour laplacian
    let ones = vec![1.0; object.len()];
    let p = NVec3::new(0.07, 0.07, 0.07);
    let lap = owner.laplacian_at(&p, &ones, Poly6).unwrap();
    assert!(lap.is_finite() && lap != 0.0);
}

#[test]
fn find_close_points_uses_support_of_each_particle() {
    let mut object = ParticleSet::new("mixed");
    object.push(NVec3::zeros(), NVec3::zeros(), Some(1.0), Some(0.1));
    object.push(NVec3::new(1.0, 0.0, 0.0), NVec3::zeros(), Some(1.0), Some(0.4));
    let (field, _) = ready_field(&object, FieldOptions::default());

    // probe support is 2 * radius_j
    let p = NVec3::new(0.5, 0.0, 0.0);
    assert_eq!(field.find_close_points_at(&p), Some(vec![1]));
    // pair support is r_0 + r_1 = 0.5 < 1
    assert!(field.find_close_points_particle(0).unwrap().is_empty());
    assert_eq!(field.pair_support(0, 1), 0.5);
    assert_eq!(field.probe_support(1), 0.8);
}

#[test]
fn velocity_sampling_falls_back_to_nearest_particle() {
    let x = vec![NVec3::zeros(), NVec3::new(10.0, 0.0, 0.0)];
    let v = vec![NVec3::new(1.0, 0.0, 0.0), NVec3::new(0.0, 2.0, 0.0)];
    let object = ParticleSet::from_state("far", x, v).with_radius(0.1);
    let (field, _) = ready_field(&object, FieldOptions::default());

    let inside = field.sample_velocity_thread_safe(&NVec3::new(0.01, 0.0, 0.0), Poly6, None).unwrap();
    assert!((inside - NVec3::new(1.0, 0.0, 0.0)).norm() < 1e-12);

    let outside = field.sample_velocity_thread_safe(&NVec3::new(9.0, 0.0, 0.0), Poly6, None).unwrap();
    assert_eq!(outside, NVec3::new(0.0, 2.0, 0.0));

    // excluding the only covering particle falls back as well
    let excluded = field.sample_velocity_thread_safe(&NVec3::new(0.01, 0.0, 0.0), Poly6, Some(0)).unwrap();
    assert_eq!(excluded, NVec3::new(1.0, 0.0, 0.0));
}

#[test]
fn velocity_sampling_on_empty_field_is_zero() {
    let (field, _) = ready_field(&ParticleSet::new("empty"), FieldOptions::default());
    assert_eq!(field.sample_velocity_thread_safe(&NVec3::new(1.0, 2.0, 3.0), Poly6, None), Some(NVec3::zeros()));
}

#[test]
fn velocity_sampling_is_safe_across_threads() {
    let mut object = lattice(6, 0.05, 0.05);
    object.v = object.x.iter().map(|p| NVec3::new(p.y, 0.0, 0.0)).collect();
    let (field, _) = ready_field(&object, FieldOptions::default());
    let probes = random_positions(200, 0.25, 41);

    let serial: Vec<NVec3> = probes
        .iter()
        .map(|p| field.sample_velocity_thread_safe(p, Poly6, None).unwrap())
        .collect();
    let parallel: Vec<NVec3> = std::thread::scope(|s| {
        let handles: Vec<_> = probes
            .chunks(50)
            .map(|chunk| {
                let field = &field;
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|p| field.sample_velocity_thread_safe(p, Poly6, None).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(serial, parallel);
}

#[test]
fn double_density_far_part_matches_density() {
    let object = lattice(3, 0.05, 0.05);
    let (field, _) = ready_field(&object, FieldOptions::default());
    for i in 0..object.len() {
        let (far, near) = field.sample_double_density(i, Poly6, 0.5, 1.0).unwrap();
        assert!((far - field.density_particle(i, Poly6, 1.0).unwrap()).abs() < 1e-9 * far);
        assert!(near > 0.0);
    }
}

#[test]
fn xsph_pulls_velocities_together() {
    let mut object = two_particles(0.5, 0.5);
    object.v = vec![NVec3::new(1.0, 0.0, 0.0), NVec3::new(-1.0, 0.0, 0.0)];
    let (mut field, _) = ready_field(&object, FieldOptions::default());
    let rho = field.compute_densities(Poly6, 1.0).unwrap();
    field.update_densities(&rho).unwrap();

    let v0 = field.xsph_velocity(0, Poly6, 0.5).unwrap();
    let v1 = field.xsph_velocity(1, Poly6, 0.5).unwrap();
    assert!(v0.x < 1.0 && v0.x > 0.0);
    assert!((v0 + v1).norm() < 1e-12);
    assert_eq!(field.xsph_velocity(0, Poly6, 0.0), Some(object.v[0]));
}

// ==================================================================================
// Force tests
// ==================================================================================

fn pressure_only(options: FieldOptions, gas_constant: f64, rest_density: f64) -> ForceSet {
    empty_force_set(options).with(PressureForce {
        gas_constant,
        rest_density,
    })
}

#[test]
fn pressure_repels_along_the_line_and_fades_at_support() {
    let h = 1.0; // radius 0.5 each
    let mut magnitudes = Vec::new();
    for k in 1..20 {
        let d = h * k as f64 / 20.0;
        let object = two_particles(d, 0.5);
        let f = forces_on(&object, pressure_only(FieldOptions::default(), 1.0, 0.0));

        assert!(f[0].x < 0.0 && f[1].x > 0.0, "not repulsive at d = {d}");
        assert!(f[0].y.abs() < 1e-15 && f[0].z.abs() < 1e-15);
        assert!((f[0] + f[1]).norm() < 1e-12 * f[0].norm());
        magnitudes.push(f[0].norm());
    }
    for w in magnitudes.windows(2) {
        assert!(w[1] < w[0], "magnitude grows with distance: {magnitudes:?}");
    }

    let object = two_particles(0.999 * h, 0.5);
    let f = forces_on(&object, pressure_only(FieldOptions::default(), 1.0, 0.0));
    assert!(f[0].norm() < 1e-5 * magnitudes[0]);

    let object = two_particles(1.5 * h, 0.5);
    let f = forces_on(&object, pressure_only(FieldOptions::default(), 1.0, 0.0));
    assert_eq!(f[0], NVec3::zeros());
}

#[test]
fn symmetric_cluster_at_rest_density_feels_no_pressure() {
    let s = 0.1;
    let mut x = Vec::new();
    for k in 0..2 {
        for j in 0..2 {
            for i in 0..2 {
                x.push(NVec3::new(i as f64, j as f64, k as f64) * s);
            }
        }
    }
    // support 2 * radius covers the cube diagonal
    let object = ParticleSet::from_state("cube", x, vec![NVec3::zeros(); 8])
        .with_mass(1.0)
        .with_radius(0.1);
    let (field, _) = ready_field(&object, FieldOptions::default());
    let rest = field.density_particle(0, Poly6, 1.0).unwrap();

    let f = forces_on(&object, pressure_only(FieldOptions::default(), 1.0, rest));
    let scale = forces_on(&object, pressure_only(FieldOptions::default(), 1.0, 0.0))[0].norm();
    assert!(scale > 0.0);
    for fi in &f {
        assert!(fi.norm() < 1e-9 * scale, "residual force {fi:?}");
    }
}

#[test]
fn pairwise_forces_conserve_momentum() {
    let n = 300;
    let mut rng = StdRng::seed_from_u64(51);
    let x = random_positions(n, 0.4, 52);
    let v = (0..n)
        .map(|_| NVec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect();
    let mut object = ParticleSet::from_state("cloud", x, v).with_radius(0.04);
    object.m = Some((0..n).map(|_| rng.gen_range(0.5..2.0)).collect());

    let forces = empty_force_set(FieldOptions::default())
        .with(PressureForce {
            gas_constant: 3.0,
            rest_density: 10.0,
        })
        .with(ViscosityForce { mu: 0.2 })
        .with(DoubleDensityPressure {
            gas_constant: 1.0,
            rest_density: 5.0,
            near_gas_constant: 0.5,
            near_ratio: 0.5,
        });
    let f = forces_on(&object, forces);

    let total: NVec3 = f.iter().sum();
    let scale: f64 = f.iter().map(|fi| fi.norm()).sum();
    assert!(scale > 0.0);
    assert!(total.norm() < 1e-10 * scale, "net force {total:?}");
}

#[test]
fn worker_count_does_not_change_pairwise_forces() {
    let object = ParticleSet::from_state("cloud", random_positions(200, 0.3, 61), vec![NVec3::zeros(); 200]).with_radius(0.04);
    let build = |workers| {
        let (_, diagnostics) = memory_diagnostics();
        ForceSet::new(KernelSet::default(), FieldOptions::default(), ScratchPool::new(workers), diagnostics).with(PressureForce {
            gas_constant: 2.0,
            rest_density: 0.0,
        })
    };
    let one = forces_on(&object, build(1));
    let many = forces_on(&object, build(7));
    for (a, b) in one.iter().zip(&many) {
        assert!((a - b).norm() <= 1e-12 * a.norm().max(1.0));
    }
}

#[test]
fn viscosity_damps_relative_motion() {
    let mut object = two_particles(0.4, 0.5);
    object.v = vec![NVec3::new(1.0, 0.0, 0.0), NVec3::new(-1.0, 0.0, 0.0)];
    let f = forces_on(&object, empty_force_set(FieldOptions::default()).with(ViscosityForce { mu: 1.0 }));
    // particle 0 moves towards +x, so it is slowed down
    assert!(f[0].x < 0.0 && f[1].x > 0.0);

    object.v = vec![NVec3::new(1.0, 1.0, 0.0); 2];
    let f = forces_on(&object, empty_force_set(FieldOptions::default()).with(ViscosityForce { mu: 1.0 }));
    assert_eq!(f, vec![NVec3::zeros(); 2]);
}

#[test]
fn surface_tension_acts_on_surface_only() {
    let object = lattice(3, 0.05, 0.05);
    let forces = empty_force_set(FieldOptions::default()).with(SurfaceTensionForce {
        sigma: 1.0,
        threshold: 1e-6,
    });
    let f = forces_on(&object, forces);
    // symmetric interior particle has no colour gradient
    assert!(f[13].norm() < 1e-9);
    assert!(f[0].norm() > 0.0 && f[0].iter().all(|c| c.is_finite()));
}

#[test]
fn gravity_needs_no_neighbours() {
    let mut object = two_particles(0.1, 0.5);
    object.m = Some(vec![1.0, 3.0]);
    let mut forces = empty_force_set(FieldOptions::default()).with(GravityForce {
        g: NVec3::new(0.0, -10.0, 0.0),
    });
    assert!(!forces.uses_neighbours());
    let mut out = vec![NVec3::zeros(); 2];
    forces.accumulate_forces(0.0, &object, &mut out).unwrap();
    assert_eq!(out, vec![NVec3::new(0.0, -10.0, 0.0), NVec3::new(0.0, -30.0, 0.0)]);
    assert_eq!(forces.field().stage(), FieldStage::Initialized);
}

#[test]
fn scratch_pool_merge_matches_serial_sum() {
    let n = 37;
    let pool = ScratchPool::new(4);
    let mut out = vec![NVec3::zeros(); n];
    pool.accumulate(n, &mut out, |range, scratch| {
        for i in range {
            scratch[i] += NVec3::new(1.0, 0.0, 0.0);
            scratch[(i + 1) % n] += NVec3::new(0.0, 1.0, 0.0);
        }
    });
    assert!(out.iter().all(|o| *o == NVec3::new(1.0, 1.0, 0.0)));
    assert_eq!(ScratchPool::new(0).workers(), 1);
}

// ==================================================================================
// Collision tests
// ==================================================================================

#[test]
fn plane_pushes_out_and_bounces() {
    let response = ImpactResponse {
        restitution: 0.5,
        friction: 0.0,
    };
    let ground = PlaneCollider::ground(0.0);
    let mut x = NVec3::new(0.3, 0.02, 0.0);
    let mut v = NVec3::new(1.0, -2.0, 0.0);
    assert!(ground.resolve(&mut x, &mut v, 0.1, &response));
    assert!((x.y - 0.1).abs() < 1e-15);
    assert_eq!(x.x, 0.3);
    assert_eq!(v, NVec3::new(1.0, 1.0, 0.0));

    // already outside and moving away: untouched
    assert!(!ground.resolve(&mut x, &mut v, 0.05, &response));
    assert!(PlaneCollider::new(NVec3::zeros(), 1.0).is_none());
}

#[test]
fn tilted_plane_normalises_its_offset() {
    let plane = PlaneCollider::new(NVec3::new(0.0, 2.0, 0.0), 2.0).unwrap();
    let mut x = NVec3::new(0.0, 0.5, 0.0);
    let mut v = NVec3::zeros();
    assert!(plane.resolve(&mut x, &mut v, 0.0, &ImpactResponse::default()));
    assert!((x.y - 1.0).abs() < 1e-15);
}

#[test]
fn box_keeps_particles_inside() {
    let container = BoxCollider {
        min: NVec3::zeros(),
        max: NVec3::new(1.0, 1.0, 1.0),
    };
    let collisions = CollisionSet::new(ImpactResponse {
        restitution: 1.0,
        friction: 0.5,
    })
    .with(container);

    let mut x = vec![NVec3::new(-0.5, 0.5, 1.2), NVec3::new(0.5, 0.5, 0.5)];
    let mut v = vec![NVec3::new(-1.0, 1.0, 1.0), NVec3::new(1.0, 0.0, 0.0)];
    let hits = collisions.resolve_all(&mut x, &mut v, &|_| 0.1);

    assert_eq!(hits, 1);
    assert!((x[0] - NVec3::new(0.1, 0.5, 0.9)).norm() < 1e-12);
    assert!(v[0].x > 0.0 && v[0].z < 0.0);
    assert_eq!(x[1], NVec3::new(0.5, 0.5, 0.5));
    assert_eq!(v[1], NVec3::new(1.0, 0.0, 0.0));
}
