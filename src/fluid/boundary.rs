//! Boundary handling and collision geometry.
//!
//! This module provides:
//! - The fluid's own containment box ([`BoundingVolume`])
//! - Solid scene obstacles the fluid is kept out of (bricks, planes, spheres)

use bevy::prelude::*;

use super::error::{FluidError, FluidResult};
use super::scene::SceneCollider;

/// Penetration depth below which a point counts as touching, not inside.
const CONTACT_TOLERANCE: f32 = 1e-5;

/// Axis-aligned box the fluid is contained in.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct BoundingVolume {
    /// Minimum corner of the box.
    pub min: Vec3,
    /// Maximum corner of the box.
    pub max: Vec3,
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        }
    }
}

impl BoundingVolume {
    /// Create a bounding volume from its corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding volume from per-axis extents.
    pub fn from_extents(
        min_x: f32,
        max_x: f32,
        min_y: f32,
        max_y: f32,
        min_z: f32,
        max_z: f32,
    ) -> Self {
        Self::new(
            Vec3::new(min_x, min_y, min_z),
            Vec3::new(max_x, max_y, max_z),
        )
    }

    /// Create a box centered at origin.
    pub fn centered(half_extents: Vec3) -> Self {
        Self::new(-half_extents, half_extents)
    }

    /// Rejects empty, inverted or non-finite boxes.
    pub fn validate(&self) -> FluidResult<()> {
        let ordered = self.min.cmplt(self.max).all();
        if ordered && self.min.is_finite() && self.max.is_finite() {
            Ok(())
        } else {
            Err(FluidError::InvalidBounds {
                min: self.min,
                max: self.max,
            })
        }
    }

    /// Size of the box along each axis.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if a point is inside the box (faces included).
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Clamp each axis of a point into the box.
    ///
    /// Velocity is never touched here: the solver reconstructs it from the
    /// clamped displacement, so the outward component is dropped.
    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }
}

/// Solid axis-aligned box inside the fluid domain.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct BrickObstacle {
    pub min: Vec3,
    pub max: Vec3,
}

impl BrickObstacle {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Get the signed distance from a point to the brick surface.
    /// Negative = inside, positive = outside.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        let center = (self.min + self.max) * 0.5;
        let half_extents = (self.max - self.min) * 0.5;

        let q = (point - center).abs() - half_extents;
        let outside_dist = q.max(Vec3::ZERO).length();
        let inside_dist = q.x.max(q.y).max(q.z).min(0.0);

        outside_dist + inside_dist
    }
}

impl SceneCollider for BrickObstacle {
    fn penetrates(&self, point: Vec3) -> bool {
        self.signed_distance(point) < -CONTACT_TOLERANCE
    }

    fn resolve(&self, _current: Vec3, candidate: Vec3) -> Vec3 {
        if !self.penetrates(candidate) {
            return candidate;
        }

        // Push out through the face with the shallowest penetration
        let to_min = candidate - self.min;
        let to_max = self.max - candidate;
        let depth = to_min.min(to_max);

        let mut resolved = candidate;
        if depth.x <= depth.y && depth.x <= depth.z {
            resolved.x = if to_min.x < to_max.x { self.min.x } else { self.max.x };
        } else if depth.y <= depth.z {
            resolved.y = if to_min.y < to_max.y { self.min.y } else { self.max.y };
        } else {
            resolved.z = if to_min.z < to_max.z { self.min.z } else { self.max.z };
        }
        resolved
    }
}

/// Half-space obstacle. Everything behind the plane is solid.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct PlaneObstacle {
    /// Normal of the plane (pointing towards the fluid side).
    pub normal: Vec3,
    /// Distance from origin along the normal.
    pub distance: f32,
}

impl PlaneObstacle {
    /// Create a floor at a given height.
    pub fn floor(height: f32) -> Self {
        Self {
            normal: Vec3::Y,
            distance: height,
        }
    }

    /// Create a wall with given normal and point on the plane.
    pub fn wall(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: normal.dot(point),
        }
    }

    /// Get signed distance to the plane.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }
}

impl SceneCollider for PlaneObstacle {
    fn penetrates(&self, point: Vec3) -> bool {
        self.signed_distance(point) < -CONTACT_TOLERANCE
    }

    fn resolve(&self, _current: Vec3, candidate: Vec3) -> Vec3 {
        let dist = self.signed_distance(candidate);
        if dist < 0.0 {
            candidate - self.normal * dist
        } else {
            candidate
        }
    }
}

/// Solid ball obstacle.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct SphereObstacle {
    pub center: Vec3,
    pub radius: f32,
}

impl SphereObstacle {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Get signed distance to the sphere surface.
    /// Negative = inside, positive = outside.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.center).length() - self.radius
    }
}

impl SceneCollider for SphereObstacle {
    fn penetrates(&self, point: Vec3) -> bool {
        self.signed_distance(point) < -CONTACT_TOLERANCE
    }

    fn resolve(&self, current: Vec3, candidate: Vec3) -> Vec3 {
        if self.signed_distance(candidate) >= 0.0 {
            return candidate;
        }

        // A candidate at the exact center has no outward direction; fall back
        // to the side the particle came from.
        let normal = (candidate - self.center)
            .try_normalize()
            .or_else(|| (current - self.center).try_normalize())
            .unwrap_or(Vec3::Y);
        self.center + normal * self.radius
    }
}
