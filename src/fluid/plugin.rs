//! Bevy plugin for fluid simulation.

use bevy::log::error;
use bevy::prelude::*;

use super::params::FluidParams;
use super::simulation::FluidSimulation;

/// Plugin that drives a [`FluidSimulation`] resource one step per update.
///
/// # Example
///
/// ```rust,ignore
/// use bevy::prelude::*;
/// use pbf_fluid::prelude::*;
///
/// fn main() {
///     App::new()
///         .add_plugins((MinimalPlugins, FluidPlugin))
///         .insert_resource(FluidSimulation::new(fluid, scene, run))
///         .run();
/// }
/// ```
pub struct FluidPlugin;

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        // Register types for reflection
        app.register_type::<FluidParams>();

        app.add_systems(Update, (sync_fluid_params, advance_simulation).chain());
    }
}

/// Copy an edited [`FluidParams`] resource into the solver. Takes effect on
/// the next step.
fn sync_fluid_params(
    params: Option<Res<FluidParams>>,
    simulation: Option<ResMut<FluidSimulation>>,
) {
    let (Some(params), Some(mut simulation)) = (params, simulation) else {
        return;
    };
    if params.is_changed() {
        simulation.fluid.set_params(params.clone());
    }
}

/// System to run the fluid simulation.
fn advance_simulation(simulation: Option<ResMut<FluidSimulation>>) {
    let Some(mut simulation) = simulation else {
        return;
    };
    if simulation.is_complete() {
        return;
    }

    if let Err(err) = simulation.advance() {
        error!("Fluid step failed, stopping run: {err}");
        simulation.run.abort();
    }
}
