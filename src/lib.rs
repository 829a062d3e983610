//! pbf-fluid - Position Based Fluids solver core for Bevy
//!
//! This library provides a CPU Position Based Fluids (PBF) solver: a fixed
//! set of particles advanced in discrete steps, with an iterative projection
//! that keeps the fluid close to its rest density.
//!
//! # Features
//!
//! - **PBF Projection**: Poly6 density, Spiky gradients, per-particle lambdas
//! - **Uniform Grid**: Bounded per-cell buckets for neighbor search
//! - **Backends**: Deterministic serial, rayon-parallel and brute-force reference
//! - **Obstacles**: Bricks, planes and spheres the fluid is kept out of
//! - **Seeded Sampling**: Lattice or random volumes from an explicit RNG
//! - **Easy Integration**: Simple Bevy plugin interface
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bevy::prelude::{App, MinimalPlugins, Vec3};
//! use pbf_fluid::prelude::*;
//! use rand::SeedableRng;
//!
//! fn main() -> Result<(), FluidError> {
//!     let mut fluid = Fluid::new(FluidParams::default(), BoundingVolume::default())?;
//!     fluid.insert_volume(FluidVolume::new(Vec3::ZERO, Vec3::splat(0.5), 4_000))?;
//!     fluid.load_volumes(&mut rand_chacha::ChaCha8Rng::seed_from_u64(7))?;
//!
//!     let scene = Scene::new().with_gravity(Vec3::new(0.0, -9.81, 0.0));
//!     let run = SimulationRun::new(0.005, 1.0)?;
//!
//!     App::new()
//!         .add_plugins((MinimalPlugins, FluidPlugin))
//!         .insert_resource(FluidSimulation::new(fluid, scene, run))
//!         .run();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`fluid`]: Core fluid simulation module
//!   - [`fluid::params`]: Solver parameters
//!   - [`fluid::volume`]: Particle placement
//!   - [`fluid::spatial`]: Uniform grid neighbor search
//!   - [`fluid::solver`]: PBF constraint solver
//!   - [`fluid::boundary`]: Containment and obstacles
//!   - [`fluid::simulation`]: Run context
//!   - [`fluid::plugin`]: Bevy plugin

pub mod fluid;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::fluid::prelude::*;
}
