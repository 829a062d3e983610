//! Error type for fluid setup and stepping.
//!
//! Only configuration and precondition failures are errors. Numerical edge
//! cases inside a step (sparse neighborhoods, near-zero gradients, full grid
//! cells) are absorbed by the solver and never reach the caller.

use bevy::prelude::*;

/// Errors reported by the fluid solver and its volume sampler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FluidError {
    /// The requested configuration exists but is not implemented.
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),

    /// A fluid volume cannot be sampled as described.
    #[error("invalid fluid volume: {0}")]
    InvalidVolume(String),

    /// A solver parameter is outside its valid range.
    #[error("invalid parameter `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    /// The bounding volume is empty or inverted on some axis.
    #[error("invalid bounding volume: min {min} must be below max {max} on every axis")]
    InvalidBounds { min: Vec3, max: Vec3 },

    /// Stepping or querying particle state before `load_volumes`.
    #[error("fluid volumes have not been loaded")]
    NotLoaded,

    /// Inserting volumes or loading a second time after `load_volumes`.
    #[error("fluid volumes are already loaded")]
    AlreadyLoaded,

    /// `load_volumes` was called with no volumes inserted.
    #[error("no fluid particles to simulate")]
    NoParticles,

    /// A per-particle setter was given an index past the particle count.
    #[error("particle index {index} out of range for {count} particles")]
    ParticleOutOfRange { index: usize, count: usize },

    /// The spatial grid would need more bucket slots than allowed.
    #[error("spatial grid of {cells} cells x {capacity} slots exceeds the slot limit")]
    GridTooLarge { cells: usize, capacity: usize },
}

pub type FluidResult<T> = Result<T, FluidError>;
