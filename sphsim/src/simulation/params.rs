//! Numerical and physical parameters for the simulation
//!
//! `Parameters` holds runtime settings:
//! - frame length, end time and the initial substep,
//! - error tolerances and substep bounds for the embedded schemes,
//! - field setup (radius scale, attribute fallbacks, volume weighting),
//! - fluid constants (equation of state, viscosity, surface tension, XSPH),
//! - external forces and collision response

use super::error::SphError;
use super::field::FieldOptions;
use super::states::NVec3;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub t_end: f64, // time end
    pub frame_dt: f64, // length of one outer frame
    pub h0: f64, // initial substep
    pub atol: f64, // absolute error tolerance
    pub rtol: f64, // relative error tolerance
    pub safety: f64, // step-size safety factor
    pub min_substep: f64,
    pub max_substep: f64,
    pub max_iterations: usize, // retries of a rejected substep before a forced commit

    pub radius_scale: f64, // support = radius_scale * (r_i + r_j)
    pub need_volume: bool,
    pub default_mass: f64,
    pub default_radius: f64,

    pub rest_density: f64,
    pub gas_constant: f64,
    pub near_gas_constant: f64, // double-density only
    pub near_ratio: f64, // double-density only
    pub viscosity: f64,
    pub surface_tension: f64,
    pub surface_threshold: f64,
    pub xsph_epsilon: f64, // 0 disables post-step smoothing

    pub gravity: NVec3,
    pub drag: f64,
    pub restitution: f64,
    pub friction: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            t_end: 1.0,
            frame_dt: 1.0 / 24.0,
            h0: 1e-3,
            atol: 1e-4,
            rtol: 1e-3,
            safety: 0.9,
            min_substep: 1e-6,
            max_substep: 1.0 / 24.0,
            max_iterations: 8,
            radius_scale: 1.0,
            need_volume: false,
            default_mass: 1.0,
            default_radius: 0.1,
            rest_density: 1000.0,
            gas_constant: 1.0,
            near_gas_constant: 0.0,
            near_ratio: 0.5,
            viscosity: 0.0,
            surface_tension: 0.0,
            surface_threshold: 1e-3,
            xsph_epsilon: 0.0,
            gravity: NVec3::zeros(),
            drag: 0.0,
            restitution: 0.5,
            friction: 0.0,
        }
    }
}

impl Parameters {
    /// Field setup derived from these parameters. Absent densities fall back
    /// to the rest density.
    pub fn field_options(&self) -> FieldOptions {
        FieldOptions {
            radius_scale: self.radius_scale,
            need_volume: self.need_volume,
            default_mass: self.default_mass,
            default_radius: self.default_radius,
            default_density: self.rest_density,
        }
    }

    /// Reject values the solver cannot run with
    pub fn validate(&self) -> Result<(), SphError> {
        let fail = |reason: String| Err(SphError::InvalidConfiguration { reason });
        if !(self.min_substep > 0.0) || !self.min_substep.is_finite() {
            return fail(format!("min_substep must be positive, got {}", self.min_substep));
        }
        if !(self.max_substep >= self.min_substep) || !self.max_substep.is_finite() {
            return fail(format!(
                "max_substep {} must be finite and at least min_substep {}",
                self.max_substep, self.min_substep
            ));
        }
        if !(self.frame_dt >= 0.0) || !self.frame_dt.is_finite() {
            return fail(format!("frame_dt must be non-negative, got {}", self.frame_dt));
        }
        if !(self.atol >= 0.0 && self.rtol >= 0.0) || self.atol + self.rtol <= 0.0 {
            return fail(format!("tolerances must be non-negative and not both zero (atol {}, rtol {})", self.atol, self.rtol));
        }
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return fail(format!("safety must be in (0, 1], got {}", self.safety));
        }
        if !(self.radius_scale > 0.0) || !self.radius_scale.is_finite() {
            return fail(format!("radius_scale must be positive, got {}", self.radius_scale));
        }
        if !(self.near_ratio > 0.0 && self.near_ratio <= 1.0) {
            return fail(format!("near_ratio must be in (0, 1], got {}", self.near_ratio));
        }
        if !(0.0..=1.0).contains(&self.friction) {
            return fail(format!("friction must be in [0, 1], got {}", self.friction));
        }
        if !(self.restitution >= 0.0) {
            return fail(format!("restitution must be non-negative, got {}", self.restitution));
        }
        Ok(())
    }
}
