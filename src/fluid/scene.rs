//! Scene collaborators consumed by the solver.
//!
//! The solver owns the fluid but not the world around it. A [`Scene`] supplies
//! external forces (gravity and the like) and resolves collisions against
//! geometry the fluid does not own.

use bevy::prelude::*;

/// Maximum number of passes over all colliders before a candidate is vetoed.
const MAX_RESOLVE_PASSES: usize = 4;

/// Source of external force acting on every fluid particle.
pub trait ExternalForce: Send + Sync {
    /// Force on one particle. Must not depend on other particles.
    fn force(&self, position: Vec3, velocity: Vec3, mass: f32) -> Vec3;
}

/// Solid geometry the fluid must stay out of.
pub trait SceneCollider: Send + Sync {
    /// Whether a point lies inside the obstacle.
    fn penetrates(&self, point: Vec3) -> bool;

    /// Given a particle's current position and its candidate position,
    /// return a corrected candidate outside the obstacle.
    fn resolve(&self, current: Vec3, candidate: Vec3) -> Vec3;
}

/// Uniform gravitational acceleration.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct SimpleGravity {
    pub acceleration: Vec3,
}

impl Default for SimpleGravity {
    fn default() -> Self {
        Self {
            acceleration: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

impl SimpleGravity {
    pub fn new(acceleration: Vec3) -> Self {
        Self { acceleration }
    }
}

impl ExternalForce for SimpleGravity {
    fn force(&self, _position: Vec3, _velocity: Vec3, mass: f32) -> Vec3 {
        self.acceleration * mass
    }
}

/// Everything outside the fluid that the solver talks to during a step.
#[derive(Default)]
pub struct Scene {
    forces: Vec<Box<dyn ExternalForce>>,
    colliders: Vec<Box<dyn SceneCollider>>,
}

impl Scene {
    /// An empty scene: no forces, no obstacles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add uniform gravity.
    pub fn with_gravity(self, acceleration: Vec3) -> Self {
        self.with_force(SimpleGravity::new(acceleration))
    }

    pub fn with_force(mut self, force: impl ExternalForce + 'static) -> Self {
        self.add_force(force);
        self
    }

    pub fn with_collider(mut self, collider: impl SceneCollider + 'static) -> Self {
        self.add_collider(collider);
        self
    }

    pub fn add_force(&mut self, force: impl ExternalForce + 'static) {
        self.forces.push(Box::new(force));
    }

    pub fn add_collider(&mut self, collider: impl SceneCollider + 'static) {
        self.colliders.push(Box::new(collider));
    }

    pub fn force_count(&self) -> usize {
        self.forces.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Sum of all external forces on one particle.
    pub fn total_force(&self, position: Vec3, velocity: Vec3, mass: f32) -> Vec3 {
        self.forces
            .iter()
            .map(|f| f.force(position, velocity, mass))
            .sum()
    }

    /// Correct a candidate position so it satisfies every obstacle.
    ///
    /// Colliders are applied in passes until none reports penetration. If
    /// overlapping obstacles keep pushing the point into each other, the
    /// move is vetoed and the current position is returned.
    pub fn resolve_collision(&self, current: Vec3, candidate: Vec3) -> Vec3 {
        if self.colliders.is_empty() {
            return candidate;
        }

        let mut resolved = candidate;
        for _ in 0..MAX_RESOLVE_PASSES {
            let mut moved = false;
            for collider in &self.colliders {
                if collider.penetrates(resolved) {
                    resolved = collider.resolve(current, resolved);
                    moved = true;
                }
            }
            if !moved {
                return resolved;
            }
        }

        if self.colliders.iter().any(|c| c.penetrates(resolved)) {
            current
        } else {
            resolved
        }
    }
}
