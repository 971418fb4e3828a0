pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use simulation::states::{ParticleSet, NVec3, NQuat};
pub use simulation::params::Parameters;
pub use simulation::engine::Engine;
pub use simulation::error::SphError;
pub use simulation::diagnostics::{Diagnostics, DiagnosticSink, MemorySink, Severity, TracingSink};
pub use simulation::kernels::{Kernel, KernelKind, KernelSet, Normalization, SmoothingKernel, Poly6, Spiky, ViscosityKernel, CubicSpline};
pub use simulation::spatial_hash::SpatialHash;
pub use simulation::octree::PointOctree;
pub use simulation::neighbors::{Cutoff, NeighborEntry, NeighborLists};
pub use simulation::field::{FieldOptions, FieldStage, FieldValue, Sample, SphField};
pub use simulation::pool::ScratchPool;
pub use simulation::forces::{ForceContext, ForceSource, ForceSet, PressureForce, DoubleDensityPressure, ViscosityForce, SurfaceTensionForce, GravityForce, DragForce};
pub use simulation::collision::{Collider, CollisionSet, ImpactResponse, PlaneCollider, BoxCollider};
pub use simulation::integrator::{AdaptiveIntegrator, CommitPolicy, Scheme, StepOutcome, Tableau};
pub use simulation::solver::{build_force_set, FrameReport, Solver, SubstepController};
pub use simulation::scenario::Scenario;

pub use configuration::config::{EngineConfig, KernelConfig, ParametersConfig, FluidConfig, CollisionConfig, ObjectConfig, ScenarioConfig};

pub use benchmark::benchmark::{bench_neighbours, bench_neighbours_curve, bench_schemes};
