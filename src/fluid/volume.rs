//! Initial particle placement.
//!
//! A [`FluidVolume`] describes a region to fill with a fixed number of
//! particles, either on a regular lattice or uniformly at random. Sampling
//! takes the random number generator as an argument so seeded runs are
//! reproducible.

use bevy::prelude::*;
use rand::Rng;

use super::error::{FluidError, FluidResult};
use super::particle::WATER_COLOR;

/// Shape of a fluid volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum VolumeShape {
    /// Axis-aligned box between `min` and `max`.
    #[default]
    Box,
    /// Ball inscribed in the box. Not supported by the sampler.
    Sphere,
}

/// A region filled with fluid particles when the fluid is loaded.
#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct FluidVolume {
    /// Minimum corner of the region.
    pub min: Vec3,
    /// Maximum corner of the region.
    pub max: Vec3,
    /// Exact number of particles this volume contributes.
    pub particle_count: usize,
    /// Shape of the region.
    pub shape: VolumeShape,
    /// Uniform random placement instead of a lattice.
    pub random: bool,
    /// Color given to every particle of this volume.
    pub color: Vec4,
}

impl FluidVolume {
    /// A box filled on a lattice.
    pub fn new(min: Vec3, max: Vec3, particle_count: usize) -> Self {
        Self {
            min,
            max,
            particle_count,
            shape: VolumeShape::Box,
            random: false,
            color: WATER_COLOR,
        }
    }

    /// A volume from per-axis extents.
    #[allow(clippy::too_many_arguments)]
    pub fn from_extents(
        min_x: f32,
        max_x: f32,
        min_y: f32,
        max_y: f32,
        min_z: f32,
        max_z: f32,
        particle_count: usize,
        shape: VolumeShape,
        random: bool,
    ) -> Self {
        Self {
            shape,
            random,
            ..Self::new(
                Vec3::new(min_x, min_y, min_z),
                Vec3::new(max_x, max_y, max_z),
                particle_count,
            )
        }
    }

    pub fn with_random(mut self, random: bool) -> Self {
        self.random = random;
        self
    }

    pub fn with_shape(mut self, shape: VolumeShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    /// Lattice spacing: the edge of the cube each particle occupies,
    /// `cbrt(volume / count)`.
    pub fn spacing(&self) -> f32 {
        let extent = self.max - self.min;
        (extent.x * extent.y * extent.z / self.particle_count as f32).cbrt()
    }

    /// Check the volume can be sampled. Sphere volumes are rejected here so
    /// the failure surfaces when the volume is inserted, not mid-load.
    pub fn validate(&self) -> FluidResult<()> {
        if self.shape == VolumeShape::Sphere {
            return Err(FluidError::Unsupported("sphere-shaped fluid volumes"));
        }
        if self.particle_count == 0 {
            return Err(FluidError::InvalidVolume(
                "particle count must be positive".into(),
            ));
        }
        let ordered = self.min.cmplt(self.max).all();
        if !ordered || !self.min.is_finite() || !self.max.is_finite() {
            return Err(FluidError::InvalidVolume(format!(
                "empty region from {} to {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Append exactly `particle_count` positions to `out`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut Vec<Vec3>) -> FluidResult<()> {
        self.validate()?;
        if self.random {
            out.extend((0..self.particle_count).map(|_| {
                Vec3::new(
                    rng.gen_range(self.min.x..=self.max.x),
                    rng.gen_range(self.min.y..=self.max.y),
                    rng.gen_range(self.min.z..=self.max.z),
                )
            }));
            Ok(())
        } else {
            fill_lattice(self.min, self.max, self.spacing(), self.particle_count, out)
        }
    }
}

/// Coordinates `min, min + s, min + 2s, ...` strictly below `max`.
fn lattice_axis(min: f32, max: f32, spacing: f32) -> impl Iterator<Item = f32> + Clone {
    (0u32..)
        .map(move |i| min + i as f32 * spacing)
        .take_while(move |&v| v < max)
}

/// Tile `[min, max)` x-major at `spacing`, stopping after `count` points.
/// Any shortfall is padded by sweeping the `x = max.x` face.
fn fill_lattice(
    min: Vec3,
    max: Vec3,
    spacing: f32,
    count: usize,
    out: &mut Vec<Vec3>,
) -> FluidResult<()> {
    let target = out.len() + count;
    let xs = lattice_axis(min.x, max.x, spacing);
    let ys = lattice_axis(min.y, max.y, spacing);
    let zs = lattice_axis(min.z, max.z, spacing);

    'fill: for x in xs {
        for y in ys.clone() {
            for z in zs.clone() {
                if out.len() == target {
                    break 'fill;
                }
                out.push(Vec3::new(x, y, z));
            }
        }
    }

    'pad: for y in ys {
        for z in zs.clone() {
            if out.len() == target {
                break 'pad;
            }
            out.push(Vec3::new(max.x, y, z));
        }
    }

    if out.len() < target {
        return Err(FluidError::InvalidVolume(format!(
            "lattice at spacing {spacing} holds only {} of {count} particles",
            count - (target - out.len())
        )));
    }
    Ok(())
}
