//! Fluid simulation run context.
//!
//! A [`SimulationRun`] owns the timestep, the step budget and the wall-clock
//! accounting of one run. The solver itself holds no global state, so several
//! runs can coexist in one process.

use std::time::{Duration, Instant};

use bevy::log::info;
use bevy::prelude::*;

use super::error::{FluidError, FluidResult};
use super::scene::Scene;
use super::solver::Fluid;

/// Step budget and timing of one simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationRun {
    dt: f32,
    num_steps: u64,
    current_step: u64,
    elapsed: Duration,
    completion_logged: bool,
}

/// Wall-clock summary of the steps taken so far.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingReport {
    pub steps: u64,
    pub total_ms: f64,
    pub avg_step_ms: f64,
    pub steps_per_sec: f64,
}

impl SimulationRun {
    /// A run of `ceil(max_time / dt)` steps of length `dt`.
    pub fn new(dt: f32, max_time: f32) -> FluidResult<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FluidError::InvalidParameter {
                name: "dt",
                value: dt,
            });
        }
        if !(max_time.is_finite() && max_time >= 0.0) {
            return Err(FluidError::InvalidParameter {
                name: "max_time",
                value: max_time,
            });
        }

        Ok(Self {
            dt,
            num_steps: (max_time / dt).ceil() as u64,
            current_step: 0,
            elapsed: Duration::ZERO,
            completion_logged: false,
        })
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn num_steps(&self) -> u64 {
        self.num_steps
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Simulated time reached so far.
    pub fn current_time(&self) -> f32 {
        self.current_step as f32 * self.dt
    }

    pub fn is_complete(&self) -> bool {
        self.current_step >= self.num_steps
    }

    /// Stop the run where it is.
    pub fn abort(&mut self) {
        self.num_steps = self.current_step;
    }

    /// Take one step if budget remains. Returns whether a step was taken.
    pub fn advance(&mut self, fluid: &mut Fluid, scene: &Scene) -> FluidResult<bool> {
        if self.is_complete() {
            return Ok(false);
        }

        let start = Instant::now();
        fluid.step_system(scene, self.dt)?;
        self.elapsed += start.elapsed();
        self.current_step += 1;

        if self.is_complete() && !self.completion_logged {
            self.completion_logged = true;
            info!("Simulation complete at time {:.4}", self.current_time());
        }
        Ok(true)
    }

    /// Step until the budget is spent.
    pub fn run_to_completion(&mut self, fluid: &mut Fluid, scene: &Scene) -> FluidResult<()> {
        while self.advance(fluid, scene)? {}
        Ok(())
    }

    pub fn timing_report(&self) -> TimingReport {
        let total_ms = self.elapsed.as_secs_f64() * 1000.0;
        if self.current_step == 0 {
            return TimingReport::default();
        }
        let steps = self.current_step as f64;
        TimingReport {
            steps: self.current_step,
            total_ms,
            avg_step_ms: total_ms / steps,
            steps_per_sec: if total_ms > 0.0 {
                steps * 1000.0 / total_ms
            } else {
                0.0
            },
        }
    }

    pub fn log_timing(&self) {
        let report = self.timing_report();
        info!(
            "{} steps in {:.2} ms ({:.3} ms/step, {:.1} steps/s)",
            report.steps, report.total_ms, report.avg_step_ms, report.steps_per_sec
        );
    }
}

/// Main fluid simulation resource: the fluid, the world it lives in and
/// the run driving it.
#[derive(Resource)]
pub struct FluidSimulation {
    pub fluid: Fluid,
    pub scene: Scene,
    pub run: SimulationRun,
}

impl FluidSimulation {
    pub fn new(fluid: Fluid, scene: Scene, run: SimulationRun) -> Self {
        Self { fluid, scene, run }
    }

    /// Advance the owned run by one step.
    pub fn advance(&mut self) -> FluidResult<bool> {
        self.run.advance(&mut self.fluid, &self.scene)
    }

    pub fn is_complete(&self) -> bool {
        self.run.is_complete()
    }
}
