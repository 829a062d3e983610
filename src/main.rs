//! pbf-fluid - Position Based Fluids dam break
//!
//! Runs a headless dam break scenario to completion and reports timing.

use bevy::log::{info, LogPlugin};
use bevy::prelude::{App, MinimalPlugins, Vec3};
use pbf_fluid::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const PARTICLE_SPACING: f32 = 0.08;
const TIMESTEP: f32 = 1.0 / 120.0;
const MAX_TIME: f32 = 2.0;
const SEED: u64 = 0x5eed;

fn main() -> Result<(), FluidError> {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default(), FluidPlugin));
    app.insert_resource(setup_dam_break()?);
    app.finish();
    app.cleanup();

    while !app.world().resource::<FluidSimulation>().is_complete() {
        app.update();
    }

    let simulation = app.world().resource::<FluidSimulation>();
    simulation.run.log_timing();
    let stats = simulation.fluid.stats();
    info!(
        "Final density error {:.2}%, {} under-constrained, {} dropped from grid",
        stats.average_density_error * 100.0,
        stats.under_constrained,
        stats.neighbor_overflow
    );
    Ok(())
}

/// Build the dam break: a block of fluid on one side of the container
/// collapsing around a low brick.
fn setup_dam_break() -> Result<FluidSimulation, FluidError> {
    let params = FluidParams::for_spacing(PARTICLE_SPACING)
        .with_solver_iterations(4)
        .with_backend(SolverBackend::Parallel);
    let bounds = BoundingVolume::from_extents(-3.0, 3.0, 0.0, 8.0, -3.0, 3.0);

    let mut fluid = Fluid::new(params, bounds)?;
    let block = FluidVolume::new(Vec3::new(-2.3, 0.1, -0.8), Vec3::new(-0.7, 3.1, 0.8), 15_000);
    fluid.insert_volume(block)?;
    fluid.load_volumes(&mut ChaCha8Rng::seed_from_u64(SEED))?;

    let scene = Scene::new()
        .with_gravity(Vec3::new(0.0, -9.81, 0.0))
        .with_collider(BrickObstacle::new(
            Vec3::new(0.5, 0.0, -1.0),
            Vec3::new(1.0, 0.6, 1.0),
        ));
    let run = SimulationRun::new(TIMESTEP, MAX_TIME)?;

    info!(
        "Dam break: {} particles, {} steps of {:.4} s",
        fluid.particle_count(),
        run.num_steps(),
        run.dt()
    );
    Ok(FluidSimulation::new(fluid, scene, run))
}
