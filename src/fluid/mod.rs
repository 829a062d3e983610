//! Position Based Fluids (PBF) simulation module.
//!
//! This module provides an incompressible particle fluid solved with the
//! Position Based Fluids method: particles are integrated freely, then their
//! predicted positions are iteratively projected so every particle's local
//! density approaches the rest density.
//!
//! # Architecture
//!
//! The simulation is structured in the following components:
//!
//! - [`params`]: Solver parameters and backend selection
//! - [`particle`]: Particle state arrays and the GPU snapshot layout
//! - [`volume`]: Initial particle placement (lattice or random)
//! - [`spatial`]: Uniform grid for neighbor search
//! - [`kernels`]: Poly6 and Spiky smoothing kernels
//! - [`boundary`]: Containment box and solid obstacles
//! - [`scene`]: External forces and collision resolution
//! - [`solver`]: PBF constraint solver (density constraints)
//! - [`simulation`]: Run context (timestep, step budget, timing)
//! - [`plugin`]: Bevy plugin for easy integration
//! - [`error`]: Error type
//!
//! # Example
//!
//! ```rust,no_run
//! use bevy::prelude::Vec3;
//! use pbf_fluid::fluid::prelude::*;
//! use rand::SeedableRng;
//!
//! fn main() -> Result<(), FluidError> {
//!     let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.5));
//!     let mut fluid = Fluid::new(FluidParams::for_spacing(0.02), bounds)?;
//!     fluid.insert_volume(FluidVolume::new(Vec3::ZERO, Vec3::new(0.4, 0.6, 0.5), 10_000))?;
//!     fluid.load_volumes(&mut rand_chacha::ChaCha8Rng::seed_from_u64(0))?;
//!
//!     let scene = Scene::new().with_gravity(Vec3::new(0.0, -9.81, 0.0));
//!     let mut run = SimulationRun::new(1.0 / 240.0, 2.0)?;
//!     run.run_to_completion(&mut fluid, &scene)?;
//!     run.log_timing();
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod error;
pub mod kernels;
pub mod params;
pub mod particle;
pub mod plugin;
pub mod scene;
pub mod simulation;
pub mod solver;
pub mod spatial;
pub mod volume;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::boundary::*;
    pub use super::error::*;
    pub use super::kernels::*;
    pub use super::params::*;
    pub use super::particle::*;
    pub use super::plugin::*;
    pub use super::scene::*;
    pub use super::simulation::*;
    pub use super::solver::*;
    pub use super::spatial::*;
    pub use super::volume::*;
}
