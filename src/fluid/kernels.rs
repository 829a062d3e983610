//! SPH smoothing kernels used by the density constraint.
//!
//! Poly6 for density estimation and the Spiky gradient for constraint
//! gradients, as in "Position Based Fluids" (Macklin & Müller, 2013).

use bevy::prelude::*;
use std::f32::consts::PI;

/// Below this separation the gradient direction is undefined and taken as zero.
const MIN_SEPARATION: f32 = 1e-6;

/// Kernel coefficients precomputed for one kernel radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphKernels {
    h: f32,
    h_sq: f32,
    poly6_coeff: f32,
    spiky_grad_coeff: f32,
}

impl SphKernels {
    pub fn new(h: f32) -> Self {
        Self {
            h,
            h_sq: h * h,
            poly6_coeff: 315.0 / (64.0 * PI * h.powi(9)),
            spiky_grad_coeff: -45.0 / (PI * h.powi(6)),
        }
    }

    pub fn radius(&self) -> f32 {
        self.h
    }

    pub fn radius_sq(&self) -> f32 {
        self.h_sq
    }

    /// Poly6 kernel for density estimation.
    /// W(r, h) = (315 / 64πh⁹) * (h² - r²)³ for r < h
    #[inline]
    pub fn poly6(&self, r_sq: f32) -> f32 {
        if r_sq >= self.h_sq {
            return 0.0;
        }
        let diff = self.h_sq - r_sq;
        self.poly6_coeff * diff * diff * diff
    }

    /// Gradient of the Spiky kernel with respect to `p_i`, for `r = p_i - p_j`.
    /// ∇W(r, h) = -(45 / πh⁶) * (h - |r|)² * (r / |r|) for r < h
    #[inline]
    pub fn spiky_gradient(&self, r: Vec3) -> Vec3 {
        let r_len = r.length();
        if r_len >= self.h || r_len < MIN_SEPARATION {
            return Vec3::ZERO;
        }
        let diff = self.h - r_len;
        self.spiky_grad_coeff * diff * diff * (r / r_len)
    }
}
