//! Fluid solver parameters.
//!
//! These parameters control the constraint projection. They can be replaced
//! between steps (directly on the solver or through the Bevy resource) and
//! take effect on the next `step_system` call.

use bevy::prelude::*;

use super::error::{FluidError, FluidResult};

/// Which execution strategy the solver uses for its per-particle phases.
///
/// The set is closed and chosen at configuration time. All backends compute
/// the same projection; they differ in how candidates are found and how
/// phases are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum SolverBackend {
    /// Single-threaded, fixed iteration order. Bit-for-bit reproducible.
    #[default]
    Serial,
    /// Data-parallel phases on the rayon pool, atomic grid build.
    /// Reproducible up to floating-point summation order.
    Parallel,
    /// Single-threaded all-pairs candidate search, no grid.
    /// O(N²); used as a reference for the grid-accelerated backends.
    BruteForce,
}

/// Parameters controlling the fluid simulation behavior.
#[derive(Resource, Clone, Debug, Reflect)]
#[reflect(Resource)]
pub struct FluidParams {
    /// Mass shared by every particle.
    pub mass: f32,

    /// Rest density the projection drives the estimate towards.
    pub rest_density: f32,

    /// Smoothing kernel radius (h). Also the spatial grid cell size.
    pub kernel_radius: f32,

    /// Number of projection iterations per step.
    /// Zero skips projection entirely.
    pub solver_iterations: u32,

    /// Bucket capacity of one grid cell. Particles beyond it are dropped
    /// from that cell for the step.
    pub max_neighbors: u32,

    /// Particles with fewer candidates than this within `h` (self included)
    /// get zero density and lambda for the iteration.
    pub min_neighbors: u32,

    /// Regularization added to the lambda denominator.
    pub relaxation_epsilon: f32,

    /// Clamp the density constraint to non-negative values, so under-dense
    /// particles (free surface) are never pulled together.
    pub clamp_negative_pressure: bool,

    /// Execution strategy for the per-particle phases.
    pub backend: SolverBackend,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            mass: 0.125,
            rest_density: 1000.0,
            kernel_radius: 0.1,
            solver_iterations: 4,
            max_neighbors: 20,
            min_neighbors: 3,
            relaxation_epsilon: 0.01,
            clamp_negative_pressure: true,
            backend: SolverBackend::Serial,
        }
    }
}

impl FluidParams {
    /// Creates parameters for water-like fluid.
    pub fn water() -> Self {
        Self::default()
    }

    /// Creates parameters matched to a particle spacing: the kernel spans
    /// two spacings and each particle carries `rest_density * spacing³`.
    pub fn for_spacing(spacing: f32) -> Self {
        let params = Self::default();
        Self {
            mass: params.rest_density * spacing.powi(3),
            kernel_radius: 2.0 * spacing,
            ..params
        }
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_rest_density(mut self, rest_density: f32) -> Self {
        self.rest_density = rest_density;
        self
    }

    pub fn with_kernel_radius(mut self, kernel_radius: f32) -> Self {
        self.kernel_radius = kernel_radius;
        self
    }

    pub fn with_solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    pub fn with_neighbor_bounds(mut self, min_neighbors: u32, max_neighbors: u32) -> Self {
        self.min_neighbors = min_neighbors;
        self.max_neighbors = max_neighbors;
        self
    }

    pub fn with_relaxation_epsilon(mut self, epsilon: f32) -> Self {
        self.relaxation_epsilon = epsilon;
        self
    }

    pub fn with_clamp_negative_pressure(mut self, clamp: bool) -> Self {
        self.clamp_negative_pressure = clamp;
        self
    }

    pub fn with_backend(mut self, backend: SolverBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Cell size of the spatial grid. Equal to the kernel radius so the
    /// 27-cell neighborhood always covers the kernel support.
    pub fn cell_size(&self) -> f32 {
        self.kernel_radius
    }

    /// Checks every parameter the solver divides by or sizes buffers with.
    pub fn validate(&self) -> FluidResult<()> {
        positive("mass", self.mass)?;
        positive("rest_density", self.rest_density)?;
        positive("kernel_radius", self.kernel_radius)?;
        positive("relaxation_epsilon", self.relaxation_epsilon)?;
        if self.max_neighbors == 0 {
            return Err(FluidError::InvalidParameter {
                name: "max_neighbors",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> FluidResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FluidError::InvalidParameter { name, value })
    }
}
