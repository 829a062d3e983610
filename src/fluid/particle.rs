//! Particle storage.
//!
//! Particles live in parallel flat arrays (structure of arrays) indexed by
//! particle id. The arrays are sized once, when the fluid volumes are loaded,
//! and never grow afterwards.

use bevy::prelude::*;

/// Default particle color (blue water).
pub const WATER_COLOR: Vec4 = Vec4::new(0.2, 0.5, 0.9, 1.0);

/// Per-particle state of the fluid, structure-of-arrays layout.
#[derive(Clone, Debug, Default)]
pub struct ParticleState {
    pub(crate) positions: Vec<Vec3>,
    pub(crate) predicted_positions: Vec<Vec3>,
    pub(crate) velocities: Vec<Vec3>,
    pub(crate) position_deltas: Vec<Vec3>,
    pub(crate) forces: Vec<Vec3>,
    pub(crate) colors: Vec<Vec4>,
}

impl ParticleState {
    /// Allocate state for particles at the given positions, at rest.
    ///
    /// Every array gets the same length; predicted positions start equal to
    /// the positions.
    pub fn from_positions(positions: Vec<Vec3>, colors: Vec<Vec4>) -> Self {
        let n = positions.len();
        debug_assert_eq!(colors.len(), n);
        Self {
            predicted_positions: positions.clone(),
            positions,
            velocities: vec![Vec3::ZERO; n],
            position_deltas: vec![Vec3::ZERO; n],
            forces: vec![Vec3::ZERO; n],
            colors,
        }
    }

    /// Get the number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn predicted_positions(&self) -> &[Vec3] {
        &self.predicted_positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Position corrections from the last projection iteration.
    pub fn position_deltas(&self) -> &[Vec3] {
        &self.position_deltas
    }

    /// Forces accumulated at the start of the last step.
    pub fn forces(&self) -> &[Vec3] {
        &self.forces
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors
    }

    /// Pack the renderable state into GPU-ready records.
    pub fn to_gpu(&self) -> Vec<GpuParticle> {
        self.positions
            .iter()
            .zip(&self.velocities)
            .zip(&self.colors)
            .map(|((&p, &v), &c)| GpuParticle::new(p, v, c))
            .collect()
    }
}

/// GPU-compatible particle layout for renderers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticle {
    /// Position (xyz) + unused (w).
    pub position: [f32; 4],
    /// Velocity (xyz) + unused (w).
    pub velocity: [f32; 4],
    /// Color (rgba).
    pub color: [f32; 4],
}

impl GpuParticle {
    pub fn new(position: Vec3, velocity: Vec3, color: Vec4) -> Self {
        Self {
            position: position.extend(0.0).to_array(),
            velocity: velocity.extend(0.0).to_array(),
            color: color.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec4::from_array(self.position).truncate()
    }

    pub fn velocity(&self) -> Vec3 {
        Vec4::from_array(self.velocity).truncate()
    }
}
