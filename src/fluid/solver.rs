//! PBF (Position Based Fluids) constraint solver.
//!
//! This module implements the core PBF algorithm as described in:
//! "Position Based Fluids" by Macklin & Müller (2013)
//!
//! One call to [`Fluid::step_system`] runs:
//!
//! 1. force accumulation and velocity integration
//! 2. position prediction
//! 3. spatial grid build over the predicted positions
//! 4. `solver_iterations` projection passes, each: density and lambda,
//!    position delta, collision and boundary resolution, delta application
//! 5. velocity reconstruction from the total displacement
//! 6. commit of the predicted positions
//!
//! Every phase reads only what earlier phases committed and writes its own
//! output buffer, so within a phase particles are independent. The
//! [`SolverBackend::Parallel`] backend runs each phase on the rayon pool;
//! returning from the parallel loop is the barrier before the next phase.

use bevy::log::{debug, info};
use bevy::prelude::*;
use rand::Rng;
use rayon::prelude::*;

use super::boundary::BoundingVolume;
use super::error::{FluidError, FluidResult};
use super::kernels::SphKernels;
use super::params::{FluidParams, SolverBackend};
use super::particle::{GpuParticle, ParticleState, WATER_COLOR};
use super::scene::Scene;
use super::spatial::SpatialGrid;
use super::volume::FluidVolume;

/// Per-particle result of the density pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct DensityConstraint {
    density: f32,
    lambda: f32,
    /// Particles within `h`, self included.
    neighbor_count: u32,
}

/// Diagnostics of the last step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    /// Grid insertions dropped by full cells.
    pub neighbor_overflow: usize,
    /// Particles below `min_neighbors` in the last projection pass.
    pub under_constrained: usize,
    /// Mean of `|density / rest_density - 1|` over constrained particles in
    /// the last projection pass.
    pub average_density_error: f32,
}

/// Run `f` for every element, in order or on the rayon pool.
fn for_each_particle<T, F>(backend: SolverBackend, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Send + Sync,
{
    match backend {
        SolverBackend::Parallel => items
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item)),
        SolverBackend::Serial | SolverBackend::BruteForce => items
            .iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item)),
    }
}

/// Candidate source for one projection pass.
struct Neighborhood<'a> {
    backend: SolverBackend,
    grid: &'a SpatialGrid,
    positions: &'a [Vec3],
    radius_sq: f32,
}

impl Neighborhood<'_> {
    /// Visit every other particle within the kernel radius of `i`,
    /// with `r = p_i - p_j` and `|r|²`.
    #[inline]
    fn for_each(&self, i: usize, mut f: impl FnMut(usize, Vec3, f32)) {
        let pi = self.positions[i];
        let mut visit = |j: usize| {
            if j == i {
                return;
            }
            let r = pi - self.positions[j];
            let r_sq = r.length_squared();
            if r_sq < self.radius_sq {
                f(j, r, r_sq);
            }
        };
        match self.backend {
            SolverBackend::BruteForce => (0..self.positions.len()).for_each(&mut visit),
            SolverBackend::Serial | SolverBackend::Parallel => {
                self.grid.neighbors_of(i).for_each(&mut visit)
            }
        }
    }
}

/// Position Based Fluids solver owning one particle system.
pub struct Fluid {
    params: FluidParams,
    bounds: BoundingVolume,
    volumes: Vec<FluidVolume>,
    particles: ParticleState,
    loaded: bool,

    // Solver scratch, sized at load
    grid: SpatialGrid,
    constraints: Vec<DensityConstraint>,
    stats: StepStats,
}

impl Fluid {
    /// Create an empty fluid. Volumes are inserted next and sampled by
    /// [`Fluid::load_volumes`].
    pub fn new(params: FluidParams, bounds: BoundingVolume) -> FluidResult<Self> {
        params.validate()?;
        bounds.validate()?;
        let grid = SpatialGrid::new(&bounds, params.cell_size(), params.max_neighbors)?;
        Ok(Self {
            params,
            bounds,
            volumes: Vec::new(),
            particles: ParticleState::default(),
            loaded: false,
            grid,
            constraints: Vec::new(),
            stats: StepStats::default(),
        })
    }

    /// Create a fluid from explicit particle positions, at rest.
    pub fn with_particles(
        params: FluidParams,
        bounds: BoundingVolume,
        positions: Vec<Vec3>,
    ) -> FluidResult<Self> {
        let mut fluid = Self::new(params, bounds)?;
        if positions.is_empty() {
            return Err(FluidError::NoParticles);
        }
        let colors = vec![WATER_COLOR; positions.len()];
        fluid.allocate(positions, colors);
        Ok(fluid)
    }

    /// Queue a volume to be filled at load time.
    pub fn insert_volume(&mut self, volume: FluidVolume) -> FluidResult<()> {
        if self.loaded {
            return Err(FluidError::AlreadyLoaded);
        }
        volume.validate()?;
        self.volumes.push(volume);
        Ok(())
    }

    /// Sample every inserted volume and allocate particle storage.
    /// The particle count is fixed from here on.
    pub fn load_volumes<R: Rng + ?Sized>(&mut self, rng: &mut R) -> FluidResult<()> {
        if self.loaded {
            return Err(FluidError::AlreadyLoaded);
        }
        if self.volumes.is_empty() {
            return Err(FluidError::NoParticles);
        }

        let total: usize = self.volumes.iter().map(|v| v.particle_count).sum();
        let mut positions = Vec::with_capacity(total);
        let mut colors = Vec::with_capacity(total);
        for volume in &self.volumes {
            volume.sample(rng, &mut positions)?;
            colors.resize(positions.len(), volume.color);
        }

        info!(
            "Loaded {} fluid particles from {} volumes",
            positions.len(),
            self.volumes.len()
        );
        self.allocate(positions, colors);
        Ok(())
    }

    fn allocate(&mut self, positions: Vec<Vec3>, colors: Vec<Vec4>) {
        let n = positions.len();
        self.particles = ParticleState::from_positions(positions, colors);
        self.constraints = vec![DensityConstraint::default(); n];
        self.loaded = true;
    }

    /// Advance the fluid by `dt`.
    ///
    /// Fails only on setup problems (not loaded, invalid parameters or
    /// bounds); particle state is untouched in that case.
    pub fn step_system(&mut self, scene: &Scene, dt: f32) -> FluidResult<()> {
        if !self.loaded {
            return Err(FluidError::NotLoaded);
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FluidError::InvalidParameter {
                name: "dt",
                value: dt,
            });
        }
        self.params.validate()?;
        self.bounds.validate()?;
        self.grid
            .configure(&self.bounds, self.params.cell_size(), self.params.max_neighbors)?;

        self.accumulate_forces(scene);
        self.integrate_velocities(dt);
        self.predict_positions(scene, dt);
        self.build_grid();

        self.stats = StepStats {
            neighbor_overflow: self.grid.dropped(),
            ..default()
        };
        for _ in 0..self.params.solver_iterations {
            self.compute_densities_and_lambdas();
            self.compute_position_deltas();
            self.resolve_collisions(scene);
            self.apply_position_deltas();
        }
        if self.params.solver_iterations > 0 {
            self.record_constraint_stats();
        }

        self.reconstruct_velocities(dt);
        self.finalize_positions();

        debug!(
            "Fluid step: {} particles, {} overflow, {} under-constrained, density error {:.4}",
            self.particles.len(),
            self.stats.neighbor_overflow,
            self.stats.under_constrained,
            self.stats.average_density_error
        );
        Ok(())
    }

    /// Reset accumulated forces and sum the scene's external forces.
    fn accumulate_forces(&mut self, scene: &Scene) {
        let mass = self.params.mass;
        let ParticleState {
            positions,
            velocities,
            forces,
            ..
        } = &mut self.particles;
        let (positions, velocities) = (&*positions, &*velocities);

        for_each_particle(self.params.backend, forces, |i, force| {
            *force = scene.total_force(positions[i], velocities[i], mass);
        });
    }

    fn integrate_velocities(&mut self, dt: f32) {
        let inv_mass = 1.0 / self.params.mass;
        let ParticleState {
            velocities, forces, ..
        } = &mut self.particles;
        let forces = &*forces;

        for_each_particle(self.params.backend, velocities, |i, velocity| {
            *velocity += dt * forces[i] * inv_mass;
        });
    }

    /// Explicit Euler prediction, kept clear of obstacles and inside the box.
    fn predict_positions(&mut self, scene: &Scene, dt: f32) {
        let bounds = self.bounds;
        let ParticleState {
            positions,
            predicted_positions,
            velocities,
            ..
        } = &mut self.particles;
        let (positions, velocities) = (&*positions, &*velocities);

        for_each_particle(self.params.backend, predicted_positions, |i, predicted| {
            let candidate = positions[i] + dt * velocities[i];
            *predicted = bounds.clamp(scene.resolve_collision(positions[i], candidate));
        });
    }

    fn build_grid(&mut self) {
        let predicted = &self.particles.predicted_positions;
        match self.params.backend {
            SolverBackend::Serial => self.grid.build(predicted),
            SolverBackend::Parallel => self.grid.par_build(predicted),
            SolverBackend::BruteForce => self.grid.clear(),
        }
    }

    /// Density estimate and Lagrange multiplier per particle.
    ///
    /// `λ_i = -C_i / (Σ_k |∇_k C_i|² + ε)` with `C_i = ρ_i / ρ₀ - 1`.
    fn compute_densities_and_lambdas(&mut self) {
        let params = &self.params;
        let kernels = SphKernels::new(params.kernel_radius);
        let mass = params.mass;
        let rest_density = params.rest_density;
        let gradient_scale = mass / rest_density;
        let self_density = mass * kernels.poly6(0.0);
        let hood = Neighborhood {
            backend: params.backend,
            grid: &self.grid,
            positions: &self.particles.predicted_positions,
            radius_sq: kernels.radius_sq(),
        };

        for_each_particle(params.backend, &mut self.constraints, |i, constraint| {
            let mut density = self_density;
            let mut neighbor_count = 1u32;
            let mut grad_i = Vec3::ZERO;
            let mut sum_grad_sq = 0.0;

            hood.for_each(i, |_j, r, r_sq| {
                neighbor_count += 1;
                density += mass * kernels.poly6(r_sq);

                let grad_j = kernels.spiky_gradient(r) * gradient_scale;
                grad_i += grad_j;
                sum_grad_sq += grad_j.length_squared();
            });

            if neighbor_count < params.min_neighbors {
                *constraint = DensityConstraint {
                    neighbor_count,
                    ..default()
                };
                return;
            }

            sum_grad_sq += grad_i.length_squared();
            let mut c = density / rest_density - 1.0;
            if params.clamp_negative_pressure {
                c = c.max(0.0);
            }

            *constraint = DensityConstraint {
                density,
                lambda: -c / (sum_grad_sq + params.relaxation_epsilon),
                neighbor_count,
            };
        });
    }

    /// `Δp_i = (m / ρ₀) Σ_j (λ_i + λ_j) ∇W(p_i - p_j)`
    fn compute_position_deltas(&mut self) {
        let params = &self.params;
        let kernels = SphKernels::new(params.kernel_radius);
        let scale = params.mass / params.rest_density;
        let constraints = &self.constraints;
        let ParticleState {
            predicted_positions,
            position_deltas,
            ..
        } = &mut self.particles;
        let hood = Neighborhood {
            backend: params.backend,
            grid: &self.grid,
            positions: predicted_positions.as_slice(),
            radius_sq: kernels.radius_sq(),
        };

        for_each_particle(params.backend, position_deltas, |i, delta| {
            let lambda_i = constraints[i].lambda;
            let mut sum = Vec3::ZERO;
            hood.for_each(i, |j, r, _r_sq| {
                sum += (lambda_i + constraints[j].lambda) * kernels.spiky_gradient(r);
            });
            *delta = sum * scale;
        });
    }

    /// Rewrite each delta so the moved particle stays out of scene geometry
    /// and inside the bounding volume.
    fn resolve_collisions(&mut self, scene: &Scene) {
        let bounds = self.bounds;
        let ParticleState {
            predicted_positions,
            position_deltas,
            ..
        } = &mut self.particles;
        let predicted_positions = &*predicted_positions;

        for_each_particle(self.params.backend, position_deltas, |i, delta| {
            let current = predicted_positions[i];
            let candidate = scene.resolve_collision(current, current + *delta);
            *delta = bounds.clamp(candidate) - current;
        });
    }

    fn apply_position_deltas(&mut self) {
        let bounds = self.bounds;
        let ParticleState {
            predicted_positions,
            position_deltas,
            ..
        } = &mut self.particles;
        let position_deltas = &*position_deltas;

        for_each_particle(self.params.backend, predicted_positions, |i, predicted| {
            *predicted = bounds.clamp(*predicted + position_deltas[i]);
        });
    }

    /// Velocity is derived from the displacement, never integrated here.
    fn reconstruct_velocities(&mut self, dt: f32) {
        let ParticleState {
            positions,
            predicted_positions,
            velocities,
            ..
        } = &mut self.particles;
        let (positions, predicted_positions) = (&*positions, &*predicted_positions);

        for_each_particle(self.params.backend, velocities, |i, velocity| {
            *velocity = (predicted_positions[i] - positions[i]) / dt;
        });
    }

    fn finalize_positions(&mut self) {
        let ParticleState {
            positions,
            predicted_positions,
            ..
        } = &mut self.particles;
        positions.copy_from_slice(predicted_positions);
    }

    fn record_constraint_stats(&mut self) {
        let min_neighbors = self.params.min_neighbors;
        let rest_density = self.params.rest_density;

        let mut under_constrained = 0;
        let mut error_sum = 0.0;
        for constraint in &self.constraints {
            if constraint.neighbor_count < min_neighbors {
                under_constrained += 1;
            } else {
                error_sum += (constraint.density / rest_density - 1.0).abs();
            }
        }

        let constrained = self.constraints.len() - under_constrained;
        self.stats.under_constrained = under_constrained;
        self.stats.average_density_error = if constrained > 0 {
            error_sum / constrained as f32
        } else {
            0.0
        };
    }

    // Accessors

    /// Whether particle storage has been allocated.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Current solver parameters.
    pub fn params(&self) -> &FluidParams {
        &self.params
    }

    /// Full particle state, including scratch arrays.
    pub fn particles(&self) -> &ParticleState {
        &self.particles
    }

    /// Returns the number of particles.
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Projection iterations per step.
    pub fn solver_iterations(&self) -> u32 {
        self.params.solver_iterations
    }

    /// Grid bucket capacity per cell.
    pub fn max_neighbors(&self) -> u32 {
        self.params.max_neighbors
    }

    /// Neighbor count (self included) below which a particle is skipped.
    pub fn min_neighbors(&self) -> u32 {
        self.params.min_neighbors
    }

    /// Mass shared by every particle.
    pub fn mass(&self) -> f32 {
        self.params.mass
    }

    /// Target density of the projection.
    pub fn rest_density(&self) -> f32 {
        self.params.rest_density
    }

    /// Kernel support `h`, also the grid cell size.
    pub fn kernel_radius(&self) -> f32 {
        self.params.kernel_radius
    }

    /// Particle positions after the last step.
    pub fn positions(&self) -> &[Vec3] {
        self.particles.positions()
    }

    /// Predicted positions of the last step.
    pub fn predicted_positions(&self) -> &[Vec3] {
        self.particles.predicted_positions()
    }

    /// Particle velocities after the last step.
    pub fn velocities(&self) -> &[Vec3] {
        self.particles.velocities()
    }

    /// Particle colors.
    pub fn colors(&self) -> &[Vec4] {
        self.particles.colors()
    }

    /// Box the fluid is contained in.
    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounds
    }

    /// Volumes inserted so far.
    pub fn volumes(&self) -> &[FluidVolume] {
        &self.volumes
    }

    /// Diagnostics of the last step.
    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    /// Density estimates from the last projection pass. Zero for particles
    /// that were under-constrained.
    pub fn densities(&self) -> Vec<f32> {
        self.constraints.iter().map(|c| c.density).collect()
    }

    /// Renderable particle records.
    pub fn to_gpu(&self) -> Vec<GpuParticle> {
        self.particles.to_gpu()
    }

    // Setters. All take effect on the next step.

    pub fn set_params(&mut self, params: FluidParams) {
        self.params = params;
    }

    pub fn set_mass(&mut self, mass: f32) {
        self.params.mass = mass;
    }

    pub fn set_rest_density(&mut self, rest_density: f32) {
        self.params.rest_density = rest_density;
    }

    pub fn set_kernel_radius(&mut self, kernel_radius: f32) {
        self.params.kernel_radius = kernel_radius;
    }

    pub fn set_solver_iterations(&mut self, iterations: u32) {
        self.params.solver_iterations = iterations;
    }

    pub fn set_bounding_volume(&mut self, bounds: BoundingVolume) {
        self.bounds = bounds;
    }

    pub fn set_velocity(&mut self, index: usize, velocity: Vec3) -> FluidResult<()> {
        let count = self.particles.len();
        let slot = self
            .particles
            .velocities
            .get_mut(index)
            .ok_or(FluidError::ParticleOutOfRange { index, count })?;
        *slot = velocity;
        Ok(())
    }

    pub fn set_color(&mut self, index: usize, color: Vec4) -> FluidResult<()> {
        let count = self.particles.len();
        let slot = self
            .particles
            .colors
            .get_mut(index)
            .ok_or(FluidError::ParticleOutOfRange { index, count })?;
        *slot = color;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::boundary::{BrickObstacle, PlaneObstacle, SphereObstacle};
    use crate::fluid::scene::SceneCollider;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

    fn dam_break(params: FluidParams, random: bool) -> Fluid {
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.5));
        let mut fluid = Fluid::new(params, bounds).unwrap();
        fluid
            .insert_volume(
                FluidVolume::new(Vec3::ZERO, Vec3::new(0.4, 0.6, 0.5), 600).with_random(random),
            )
            .unwrap();
        fluid
            .load_volumes(&mut ChaCha8Rng::seed_from_u64(3))
            .unwrap();
        fluid
    }

    fn dam_break_params() -> FluidParams {
        FluidParams::for_spacing(0.04)
    }

    fn cubic_lattice(origin: Vec3, spacing: f32, n: usize) -> Vec<Vec3> {
        let mut positions = Vec::with_capacity(n * n * n);
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    positions.push(origin + Vec3::new(x as f32, y as f32, z as f32) * spacing);
                }
            }
        }
        positions
    }

    #[test]
    fn test_solver_initialization() {
        let fluid = dam_break(dam_break_params(), false);

        assert!(fluid.is_loaded());
        assert_eq!(fluid.particle_count(), 600);
        assert_eq!(fluid.positions().len(), 600);
        assert_eq!(fluid.velocities().len(), 600);
        assert_eq!(fluid.colors().len(), 600);
        assert_eq!(fluid.volumes().len(), 1);
        assert_eq!(fluid.max_neighbors(), 20);
        assert_eq!(fluid.min_neighbors(), 3);
        assert_eq!(fluid.solver_iterations(), 4);
        assert!(fluid.velocities().iter().all(|v| *v == Vec3::ZERO));
    }

    #[test]
    fn test_volumes_concatenate() {
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::splat(2.0));
        let mut fluid = Fluid::new(FluidParams::default(), bounds).unwrap();
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        fluid
            .insert_volume(FluidVolume::new(Vec3::ZERO, Vec3::ONE, 10))
            .unwrap();
        fluid
            .insert_volume(FluidVolume::new(Vec3::ONE, Vec3::splat(2.0), 5).with_color(red))
            .unwrap();
        fluid
            .load_volumes(&mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();

        assert_eq!(fluid.particle_count(), 15);
        assert_eq!(fluid.colors()[9], WATER_COLOR);
        assert_eq!(fluid.colors()[10], red);
    }

    #[test]
    fn test_setup_errors() {
        let bounds = BoundingVolume::default();
        let mut fluid = Fluid::new(FluidParams::default(), bounds).unwrap();
        let scene = Scene::new();

        assert_eq!(fluid.step_system(&scene, 0.01), Err(FluidError::NotLoaded));
        assert_eq!(
            fluid.load_volumes(&mut ChaCha8Rng::seed_from_u64(0)),
            Err(FluidError::NoParticles)
        );

        let sphere = FluidVolume::new(Vec3::ZERO, Vec3::ONE, 8)
            .with_shape(crate::fluid::volume::VolumeShape::Sphere);
        assert!(matches!(
            fluid.insert_volume(sphere),
            Err(FluidError::Unsupported(_))
        ));
        assert!(fluid.volumes().is_empty());

        fluid
            .insert_volume(FluidVolume::new(Vec3::ZERO, Vec3::ONE, 8))
            .unwrap();
        fluid
            .load_volumes(&mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert_eq!(
            fluid.insert_volume(FluidVolume::new(Vec3::ZERO, Vec3::ONE, 8)),
            Err(FluidError::AlreadyLoaded)
        );
        assert_eq!(
            fluid.load_volumes(&mut ChaCha8Rng::seed_from_u64(0)),
            Err(FluidError::AlreadyLoaded)
        );
        assert!(matches!(
            fluid.step_system(&scene, 0.0),
            Err(FluidError::InvalidParameter { name: "dt", .. })
        ));
        assert_eq!(
            fluid.set_velocity(8, Vec3::X),
            Err(FluidError::ParticleOutOfRange { index: 8, count: 8 })
        );
    }

    #[test]
    fn test_new_rejects_bad_configuration() {
        assert!(Fluid::new(
            FluidParams::default().with_kernel_radius(-0.1),
            BoundingVolume::default()
        )
        .is_err());
        assert!(matches!(
            Fluid::new(
                FluidParams::default(),
                BoundingVolume::new(Vec3::ONE, Vec3::ZERO)
            ),
            Err(FluidError::InvalidBounds { .. })
        ));
        assert_eq!(
            Fluid::with_particles(FluidParams::default(), BoundingVolume::default(), vec![])
                .err(),
            Some(FluidError::NoParticles)
        );
    }

    #[test]
    fn test_invalid_setter_fails_next_step_without_touching_state() {
        let mut fluid = dam_break(dam_break_params(), false);
        let before = fluid.positions().to_vec();

        fluid.set_rest_density(0.0);
        let result = fluid.step_system(&Scene::new().with_gravity(GRAVITY), 0.01);

        assert!(matches!(
            result,
            Err(FluidError::InvalidParameter {
                name: "rest_density",
                ..
            })
        ));
        assert_eq!(fluid.positions(), before.as_slice());
    }

    #[test]
    fn test_zero_iterations_is_plain_integration() {
        let params = FluidParams::default().with_solver_iterations(0);
        let bounds = BoundingVolume::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        let mut fluid = Fluid::new(params, bounds).unwrap();
        fluid
            .insert_volume(
                FluidVolume::new(Vec3::splat(-1.0), Vec3::splat(1.0), 200).with_random(true),
            )
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        fluid.load_volumes(&mut rng).unwrap();
        for i in 0..fluid.particle_count() {
            let v = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            fluid.set_velocity(i, v).unwrap();
        }

        let dt = 0.02;
        let expected: Vec<Vec3> = fluid
            .positions()
            .iter()
            .zip(fluid.velocities())
            .map(|(&p, &v)| p + dt * v)
            .collect();

        fluid.step_system(&Scene::new(), dt).unwrap();

        assert_eq!(fluid.positions(), expected.as_slice());
    }

    #[test]
    fn test_rest_state_is_stable() {
        let h = 1.0;
        let spacing = 0.5;
        let kernels = SphKernels::new(h);

        // Density of an interior lattice particle
        let rest_density: f32 = cubic_lattice(Vec3::splat(-2.0), spacing, 9)
            .iter()
            .map(|p| kernels.poly6(p.length_squared()))
            .sum();

        let params = FluidParams::default()
            .with_mass(1.0)
            .with_rest_density(rest_density)
            .with_kernel_radius(h)
            .with_neighbor_bounds(1, 64)
            .with_solver_iterations(3);
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::splat(6.0));
        let initial = cubic_lattice(Vec3::splat(1.25), spacing, 6);
        let mut fluid = Fluid::with_particles(params, bounds, initial.clone()).unwrap();

        fluid.step_system(&Scene::new(), 0.01).unwrap();

        for (i, (p, p0)) in fluid.positions().iter().zip(&initial).enumerate() {
            assert!(p.distance(*p0) < 1e-5 * h, "particle {i} drifted to {p}");
        }
        for delta in fluid.particles().position_deltas() {
            assert!(delta.length() < 1e-5 * h);
        }
        assert_eq!(fluid.stats().neighbor_overflow, 0);
    }

    #[test]
    fn test_rest_state_is_stable_without_pressure_clamp() {
        let h = 1.0;
        let spacing = 0.5;
        let kernels = SphKernels::new(h);

        let rest_density: f32 = cubic_lattice(Vec3::splat(-2.0), spacing, 9)
            .iter()
            .map(|p| kernels.poly6(p.length_squared()))
            .sum();

        // Only particles with the full 3x3x3 shell inside h are constrained;
        // surface particles would otherwise pull inward under tension.
        let params = FluidParams::default()
            .with_mass(1.0)
            .with_rest_density(rest_density)
            .with_kernel_radius(h)
            .with_neighbor_bounds(27, 64)
            .with_solver_iterations(3)
            .with_clamp_negative_pressure(false);
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::splat(6.0));
        let initial = cubic_lattice(Vec3::splat(1.25), spacing, 6);
        let mut fluid = Fluid::with_particles(params, bounds, initial.clone()).unwrap();

        fluid.step_system(&Scene::new(), 0.01).unwrap();

        for (i, (p, p0)) in fluid.positions().iter().zip(&initial).enumerate() {
            assert!(p.distance(*p0) < 1e-5 * h, "particle {i} drifted to {p}");
        }
        assert!(fluid.stats().under_constrained > 0);
        assert!(fluid.stats().average_density_error < 1e-5);
    }

    #[test]
    fn test_sparse_particles_skip_projection() {
        let params = FluidParams::water();
        let h = params.kernel_radius;
        let initial = vec![Vec3::splat(0.5), Vec3::new(0.5 + 0.3 * h, 0.5, 0.5)];
        let mut fluid =
            Fluid::with_particles(params, BoundingVolume::default(), initial.clone()).unwrap();

        fluid.step_system(&Scene::new(), 0.01).unwrap();

        assert_eq!(fluid.densities(), vec![0.0, 0.0]);
        assert_eq!(fluid.positions(), initial.as_slice());
        assert_eq!(fluid.velocities(), &[Vec3::ZERO, Vec3::ZERO]);
        assert_eq!(fluid.stats().under_constrained, 2);
    }

    #[test]
    fn test_coincident_particles_stay_finite() {
        let params = FluidParams::default().with_mass(1.0);
        let bounds = BoundingVolume::default();
        let center = Vec3::splat(0.5);
        let mut positions = vec![center; 5];
        positions.push(center + Vec3::new(1e-7, 0.0, 0.0));
        positions.push(center + Vec3::new(0.0, 2e-6, 0.0));
        let mut fluid = Fluid::with_particles(params, bounds, positions).unwrap();
        let scene = Scene::new().with_gravity(GRAVITY);

        for _ in 0..5 {
            fluid.step_system(&scene, 0.01).unwrap();
            assert!(fluid.positions().iter().all(|p| p.is_finite()));
            assert!(fluid.positions().iter().all(|p| bounds.contains(*p)));
            assert!(fluid.velocities().iter().all(|v| v.is_finite()));
            assert!(fluid.densities().iter().all(|d| d.is_finite()));
            assert!(fluid.stats().average_density_error.is_finite());
        }
    }

    /// Without viscosity the velocity picked up from the first projection is
    /// kept, so the pair keeps separating once out of kernel range.
    #[test]
    fn test_compressed_pair_separates() {
        let h = 1.0;
        let mass = 1.0;
        let rest_density = mass * SphKernels::new(h).poly6(0.0);
        let params = FluidParams::default()
            .with_mass(mass)
            .with_rest_density(rest_density)
            .with_kernel_radius(h)
            .with_neighbor_bounds(1, 20)
            .with_solver_iterations(4);
        let bounds = BoundingVolume::new(Vec3::splat(-20.0), Vec3::splat(20.0));
        let positions = vec![Vec3::ZERO, Vec3::new(0.1 * h, 0.0, 0.0)];
        let mut fluid = Fluid::with_particles(params, bounds, positions).unwrap();
        let scene = Scene::new();

        let distance = |fluid: &Fluid| fluid.positions()[0].distance(fluid.positions()[1]);
        let mut previous = distance(&fluid);

        fluid.step_system(&scene, 0.05).unwrap();
        let first = distance(&fluid);
        assert!(first > 0.9 * h && first < 1.2 * h, "distance after one step: {first}");

        for _ in 0..19 {
            assert!(distance(&fluid) >= previous);
            previous = distance(&fluid);
            fluid.step_system(&scene, 0.05).unwrap();
        }
        assert!(distance(&fluid) >= previous);
        assert!(fluid.positions().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_compressed_pair_relaxes_toward_kernel_radius() {
        // Velocities are reset before every step, so only the projection
        // moves the pair and the distance settles instead of drifting.
        let h = 1.0;
        let mass = 1.0;
        let rest_density = mass * SphKernels::new(h).poly6(0.0);
        let params = FluidParams::default()
            .with_mass(mass)
            .with_rest_density(rest_density)
            .with_kernel_radius(h)
            .with_neighbor_bounds(1, 20)
            .with_solver_iterations(4)
            .with_relaxation_epsilon(1.0);
        let bounds = BoundingVolume::centered(Vec3::splat(20.0));
        let positions = vec![Vec3::ZERO, Vec3::new(0.1 * h, 0.0, 0.0)];
        let mut fluid = Fluid::with_particles(params, bounds, positions).unwrap();
        let scene = Scene::new();

        let distance = |fluid: &Fluid| fluid.positions()[0].distance(fluid.positions()[1]);
        let mut distances = Vec::with_capacity(20);
        for _ in 0..20 {
            fluid.set_velocity(0, Vec3::ZERO).unwrap();
            fluid.set_velocity(1, Vec3::ZERO).unwrap();
            fluid.step_system(&scene, 0.05).unwrap();
            distances.push(distance(&fluid));
        }

        assert!(distances[0] > 0.8 * h, "distance after one step: {}", distances[0]);
        for pair in distances.windows(2) {
            assert!(pair[1] > pair[0], "{distances:?}");
        }
        let last = distances[19];
        assert!(last > 0.9 * h && last <= h, "distance after 20 steps: {last}");
    }

    #[test]
    fn test_particles_stay_in_bounds() {
        let mut fluid = dam_break(dam_break_params(), true);
        let scene = Scene::new().with_gravity(GRAVITY);
        let bounds = *fluid.bounding_volume();

        for _ in 0..60 {
            fluid.step_system(&scene, 1.0 / 120.0).unwrap();
            for p in fluid.positions() {
                assert!(p.is_finite());
                assert!(bounds.contains(*p), "{p} escaped the box");
            }
            assert!(fluid.velocities().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_bounding_volume_change_applies_next_step() {
        let mut fluid = dam_break(dam_break_params(), false);
        let scene = Scene::new().with_gravity(GRAVITY);
        fluid.step_system(&scene, 0.01).unwrap();

        let shrunk = BoundingVolume::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.3, 0.3, 0.5));
        fluid.set_bounding_volume(shrunk);
        fluid.step_system(&scene, 0.01).unwrap();

        assert!(fluid.positions().iter().all(|p| shrunk.contains(*p)));
    }

    #[test]
    fn test_obstacle_is_never_entered() {
        let params = dam_break_params();
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.5));
        let mut fluid = Fluid::new(params, bounds).unwrap();
        fluid
            .insert_volume(FluidVolume::new(
                Vec3::new(0.3, 0.6, 0.0),
                Vec3::new(0.7, 0.9, 0.5),
                400,
            ))
            .unwrap();
        fluid
            .load_volumes(&mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();

        let brick = BrickObstacle::new(Vec3::new(0.2, 0.0, 0.0), Vec3::new(0.8, 0.4, 0.5));
        let scene = Scene::new()
            .with_gravity(GRAVITY)
            .with_collider(brick);

        for _ in 0..60 {
            fluid.step_system(&scene, 1.0 / 120.0).unwrap();
            for p in fluid.positions() {
                assert!(!SceneCollider::penetrates(&brick, *p));
            }
        }
        // The fluid fell onto the brick
        assert!(fluid.positions().iter().any(|p| p.y < 0.6));
    }

    #[test]
    fn test_sphere_obstacle_is_never_entered() {
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.5));
        let mut fluid = Fluid::new(dam_break_params(), bounds).unwrap();
        fluid
            .insert_volume(FluidVolume::new(
                Vec3::new(0.35, 0.6, 0.15),
                Vec3::new(0.65, 0.9, 0.35),
                200,
            ))
            .unwrap();
        fluid
            .load_volumes(&mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();

        let sphere = SphereObstacle::new(Vec3::new(0.5, 0.3, 0.25), 0.15);
        let floor = PlaneObstacle::floor(0.05);
        let scene = Scene::new()
            .with_gravity(GRAVITY)
            .with_collider(sphere)
            .with_collider(floor);

        for _ in 0..60 {
            fluid.step_system(&scene, 1.0 / 120.0).unwrap();
            for p in fluid.positions() {
                assert!(p.is_finite());
                assert!(!SceneCollider::penetrates(&sphere, *p), "{p} inside the sphere");
                assert!(!SceneCollider::penetrates(&floor, *p), "{p} below the floor");
            }
        }
        // The fluid reached the sphere
        assert!(fluid.positions().iter().any(|p| p.y < 0.5));
    }

    #[test]
    fn test_serial_runs_are_bit_identical() {
        let scene = Scene::new().with_gravity(GRAVITY);
        let mut a = dam_break(dam_break_params(), false);
        let mut b = dam_break(dam_break_params(), false);

        for _ in 0..20 {
            a.step_system(&scene, 1.0 / 120.0).unwrap();
            b.step_system(&scene, 1.0 / 120.0).unwrap();
        }

        assert_eq!(a.positions(), b.positions());
        assert_eq!(a.velocities(), b.velocities());
    }

    #[test]
    fn test_backends_agree() {
        let scene = Scene::new().with_gravity(GRAVITY);
        let mut serial = dam_break(dam_break_params(), false);
        let mut parallel =
            dam_break(dam_break_params().with_backend(SolverBackend::Parallel), false);
        let mut brute =
            dam_break(dam_break_params().with_backend(SolverBackend::BruteForce), false);

        for fluid in [&mut serial, &mut parallel, &mut brute] {
            fluid.step_system(&scene, 1.0 / 120.0).unwrap();
        }

        assert_eq!(serial.stats().neighbor_overflow, 0);
        for i in 0..serial.particle_count() {
            let p = serial.positions()[i];
            assert!(p.distance(parallel.positions()[i]) < 1e-4);
            assert!(p.distance(brute.positions()[i]) < 1e-4);
        }
    }

    #[test]
    fn test_overcrowded_cells_stay_finite() {
        // Everything in one cell with a tiny capacity
        let params = FluidParams::default()
            .with_kernel_radius(0.5)
            .with_neighbor_bounds(3, 4);
        let bounds = BoundingVolume::new(Vec3::ZERO, Vec3::ONE);
        let positions = cubic_lattice(Vec3::splat(0.05), 0.05, 5);
        let mut fluid = Fluid::with_particles(params, bounds, positions).unwrap();

        fluid
            .step_system(&Scene::new().with_gravity(GRAVITY), 0.01)
            .unwrap();

        assert!(fluid.stats().neighbor_overflow > 0);
        assert!(fluid.positions().iter().all(|p| p.is_finite()));
        assert!(fluid.positions().iter().all(|p| bounds.contains(*p)));
    }

    #[test]
    fn test_setters_apply_next_step() {
        let mut fluid = dam_break(dam_break_params(), false);
        fluid.set_mass(0.1);
        fluid.set_rest_density(900.0);
        fluid.set_kernel_radius(0.09);
        fluid.set_solver_iterations(2);
        fluid.set_color(0, Vec4::ONE).unwrap();

        assert_eq!(fluid.mass(), 0.1);
        assert_eq!(fluid.rest_density(), 900.0);
        assert_eq!(fluid.kernel_radius(), 0.09);
        assert_eq!(fluid.solver_iterations(), 2);
        assert_eq!(fluid.colors()[0], Vec4::ONE);

        let scene = Scene::new().with_gravity(GRAVITY);
        fluid.step_system(&scene, 0.01).unwrap();
        assert!(fluid.positions().iter().all(|p| p.is_finite()));
        assert!(fluid.stats().average_density_error.is_finite());
    }

    #[test]
    fn test_gpu_snapshot_matches_state() {
        let fluid = dam_break(dam_break_params(), false);
        let packed = fluid.to_gpu();

        assert_eq!(packed.len(), fluid.particle_count());
        assert_eq!(packed[17].position(), fluid.positions()[17]);
    }
}
