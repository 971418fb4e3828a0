//! Smoothing kernels
//!
//! Every kernel is written as a dimensionless shape `f(q)`, `q = r / h`, with
//! support `[0, h)`, scaled by a 3D normalisation constant `sigma / h^3`:
//!
//! ```text
//! W(r, h)    = sigma / h^3 * f(q)
//! dW/dr      = sigma / h^4 * f'(q)
//! lap W(r,h) = sigma / h^5 * (f''(q) + 2 f'(q) / q)
//! ```
//!
//! The `Unscaled` tier drops `sigma / h^3` (shape only, `f(0)` is O(1)) for
//! callers that apply their own volume or mass scaling.
//!
//! `weight` takes the squared distance so dense sampling can skip the sqrt
//! for Poly6. Gradients take the unsquared distance. A gradient at distance
//! exactly zero is zero.

use std::f64::consts::PI;

use serde::Deserialize;

use super::states::NVec3;

/// The viscosity kernel is singular at the origin; its weight and gradient
/// are evaluated with `q` floored at this value.
const VISCOSITY_CORE_Q: f64 = 0.02;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    #[serde(rename = "poly6")]
    Poly6,
    #[serde(rename = "spiky")]
    Spiky,
    #[serde(rename = "viscosity")]
    Viscosity,
    #[serde(rename = "cubic_spline")]
    CubicSpline,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Normalization {
    #[default]
    #[serde(rename = "scaled")]
    Scaled,
    #[serde(rename = "unscaled")]
    Unscaled,
}

/// Radially symmetric smoothing kernel with finite support `h`.
pub trait SmoothingKernel: Copy + Send + Sync {
    /// W(r, h) from the squared distance
    fn weight(&self, r2: f64, h: f64) -> f64;

    /// dW/dr, zero at r == 0 and for r >= h
    fn gradient_weight(&self, r: f64, h: f64) -> f64;

    /// Laplacian of W
    fn laplacian_weight(&self, r: f64, h: f64) -> f64;

    /// Gradient of W with respect to particle i, `rij = x_i - x_j`, `r = |rij|`
    #[inline]
    fn gradient(&self, rij: &NVec3, r: f64, h: f64) -> NVec3 {
        if r <= 0.0 {
            return NVec3::zeros();
        }
        rij * (self.gradient_weight(r, h) / r)
    }
}

/// Runtime kernel selection, chosen once per solve from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kernel {
    pub kind: KernelKind,
    pub normalization: Normalization,
}

impl Kernel {
    pub const fn scaled(kind: KernelKind) -> Self {
        Self {
            kind,
            normalization: Normalization::Scaled,
        }
    }

    pub const fn unscaled(kind: KernelKind) -> Self {
        Self {
            kind,
            normalization: Normalization::Unscaled,
        }
    }

    /// The factor applied to `f(q)` to get W, i.e. `sigma / h^3` (or 1 unscaled)
    pub fn normalization(&self, h: f64) -> f64 {
        match self.normalization {
            Normalization::Scaled => sigma(self.kind) / (h * h * h),
            Normalization::Unscaled => 1.0,
        }
    }
}

impl SmoothingKernel for Kernel {
    #[inline]
    fn weight(&self, r2: f64, h: f64) -> f64 {
        match self.normalization {
            Normalization::Scaled => scaled_weight(self.kind, r2, h),
            Normalization::Unscaled => match support_q2(r2, h) {
                Some(q2) => shape(self.kind, q2),
                None => 0.0,
            },
        }
    }

    #[inline]
    fn gradient_weight(&self, r: f64, h: f64) -> f64 {
        let Some(q) = support_q(r, h) else {
            return 0.0;
        };
        if r == 0.0 {
            return 0.0;
        }
        let scale = match self.normalization {
            Normalization::Scaled => sigma(self.kind) / h.powi(4),
            Normalization::Unscaled => 1.0 / h,
        };
        scale * shape_derivative(self.kind, q)
    }

    #[inline]
    fn laplacian_weight(&self, r: f64, h: f64) -> f64 {
        let Some(q) = support_q(r, h) else {
            return 0.0;
        };
        let scale = match self.normalization {
            Normalization::Scaled => sigma(self.kind) / h.powi(5),
            Normalization::Unscaled => 1.0 / (h * h),
        };
        scale * shape_laplacian(self.kind, q)
    }
}

macro_rules! static_kernel {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl SmoothingKernel for $name {
            #[inline]
            fn weight(&self, r2: f64, h: f64) -> f64 {
                scaled_weight($kind, r2, h)
            }

            #[inline]
            fn gradient_weight(&self, r: f64, h: f64) -> f64 {
                Kernel::scaled($kind).gradient_weight(r, h)
            }

            #[inline]
            fn laplacian_weight(&self, r: f64, h: f64) -> f64 {
                Kernel::scaled($kind).laplacian_weight(r, h)
            }
        }

        impl From<$name> for Kernel {
            fn from(_: $name) -> Kernel {
                Kernel::scaled($kind)
            }
        }
    };
}

static_kernel!(
    /// Müller et al. poly6, density and colour field
    Poly6, KernelKind::Poly6
);
static_kernel!(
    /// Desbrun spiky kernel, non-vanishing gradient near the origin
    Spiky, KernelKind::Spiky
);
static_kernel!(
    /// Müller viscosity kernel, positive Laplacian everywhere inside the support
    ViscosityKernel, KernelKind::Viscosity
);
static_kernel!(CubicSpline, KernelKind::CubicSpline);

/// Kernels used by each force term
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelSet {
    pub density: Kernel,
    pub pressure: Kernel,
    pub viscosity: Kernel,
    pub surface: Kernel,
}

impl Default for KernelSet {
    fn default() -> Self {
        Self {
            density: Kernel::scaled(KernelKind::Poly6),
            pressure: Kernel::scaled(KernelKind::Spiky),
            viscosity: Kernel::scaled(KernelKind::Viscosity),
            surface: Kernel::scaled(KernelKind::Poly6),
        }
    }
}

// helpers ==============================================================================

fn sigma(kind: KernelKind) -> f64 {
    match kind {
        KernelKind::Poly6 => 315.0 / (64.0 * PI),
        KernelKind::Spiky => 15.0 / PI,
        KernelKind::Viscosity => 15.0 / (2.0 * PI),
        KernelKind::CubicSpline => 8.0 / PI,
    }
}

#[inline]
fn support_q2(r2: f64, h: f64) -> Option<f64> {
    if !(h > 0.0) || !(r2 >= 0.0) {
        return None;
    }
    let h2 = h * h;
    if r2 >= h2 {
        return None;
    }
    Some(r2 / h2)
}

#[inline]
fn support_q(r: f64, h: f64) -> Option<f64> {
    if !(h > 0.0) || !(r >= 0.0) || r >= h {
        return None;
    }
    Some(r / h)
}

#[inline]
fn scaled_weight(kind: KernelKind, r2: f64, h: f64) -> f64 {
    match support_q2(r2, h) {
        Some(q2) => sigma(kind) / (h * h * h) * shape(kind, q2),
        None => 0.0,
    }
}

/// f(q), taking q^2
#[inline]
fn shape(kind: KernelKind, q2: f64) -> f64 {
    match kind {
        KernelKind::Poly6 => {
            let d = 1.0 - q2;
            d * d * d
        }
        KernelKind::Spiky => {
            let d = 1.0 - q2.sqrt();
            d * d * d
        }
        KernelKind::Viscosity => {
            let q = q2.sqrt().max(VISCOSITY_CORE_Q);
            let d = 1.0 - q;
            // -q^3/2 + q^2 + 1/(2q) - 1, factored so it stays >= 0 near q = 1
            d * d * d * (1.0 + q) / (2.0 * q)
        }
        KernelKind::CubicSpline => {
            let q = q2.sqrt();
            if q <= 0.5 {
                6.0 * (q * q * q - q * q) + 1.0
            } else {
                let d = 1.0 - q;
                2.0 * d * d * d
            }
        }
    }
}

/// f'(q)
#[inline]
fn shape_derivative(kind: KernelKind, q: f64) -> f64 {
    match kind {
        KernelKind::Poly6 => {
            let d = 1.0 - q * q;
            -6.0 * q * d * d
        }
        KernelKind::Spiky => {
            let d = 1.0 - q;
            -3.0 * d * d
        }
        KernelKind::Viscosity => {
            let q = q.max(VISCOSITY_CORE_Q);
            -1.5 * q * q + 2.0 * q - 0.5 / (q * q)
        }
        KernelKind::CubicSpline => {
            if q <= 0.5 {
                6.0 * q * (3.0 * q - 2.0)
            } else {
                let d = 1.0 - q;
                -6.0 * d * d
            }
        }
    }
}

/// f''(q) + 2 f'(q) / q
#[inline]
fn shape_laplacian(kind: KernelKind, q: f64) -> f64 {
    match kind {
        KernelKind::Poly6 => -6.0 * (1.0 - q * q) * (3.0 - 7.0 * q * q),
        KernelKind::Spiky => {
            if q == 0.0 {
                return 0.0;
            }
            let d = 1.0 - q;
            6.0 * d - 6.0 * d * d / q
        }
        KernelKind::Viscosity => 6.0 * (1.0 - q),
        KernelKind::CubicSpline => {
            if q <= 0.5 {
                72.0 * q - 36.0
            } else {
                let d = 1.0 - q;
                12.0 * d - 12.0 * d * d / q
            }
        }
    }
}
