//! High-level runtime engine settings
//!
//! Selects the integration scheme, the kernels of each force term, the
//! pressure model and the worker count used when building and running a
//! `Scenario`

use super::integrator::Scheme;
use super::kernels::KernelSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub scheme: Scheme,
    pub kernels: KernelSet,
    pub use_double_density: bool, // near/far pressure instead of the plain equation of state
    pub orientation: bool, // integrate orientation/angular velocity where present
    pub workers: Option<usize>, // dedicated thread pool size, None = global rayon pool
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            scheme: Scheme::Rk32,
            kernels: KernelSet::default(),
            use_double_density: false,
            orientation: true,
            workers: None,
        }
    }
}
