pub mod states;
pub mod params;
pub mod engine;
pub mod error;
pub mod diagnostics;
pub mod kernels;
pub mod spatial_hash;
pub mod octree;
pub mod neighbors;
pub mod field;
pub mod pool;
pub mod forces;
pub mod collision;
pub mod integrator;
pub mod solver;
pub mod scenario;
