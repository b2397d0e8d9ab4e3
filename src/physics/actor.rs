//! Rigid Actors
//!
//! A rigid actor binds an entity to one rapier body with a single collider.
//! Mesh geometry references a convex geometry resource and is realized as a
//! convex hull once the resource finishes loading; the scene polls the
//! geometry storage generation and (re)creates the collider when it moves.

use glam::Vec3;
use rapier3d::prelude::{ColliderBuilder, ColliderHandle, RigidBodyHandle};

use crate::physics::to_na_point;
use crate::resources::{ConvexGeometry, ResourceStorage};
use crate::world::Entity;

/// How the body participates in simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicType {
    Static,
    Dynamic,
    Kinematic,
}

/// Collision shape of an actor.
#[derive(Debug, Clone)]
pub enum ActorGeometry {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
    /// Convex hull built from a geometry resource.
    Mesh { path: String },
}

/// One entity-bound rigid body.
pub struct RigidActor {
    pub entity: Entity,
    pub dynamic_type: DynamicType,
    pub layer: usize,
    pub geometry: ActorGeometry,
    pub is_trigger: bool,
    pub(crate) body: Option<RigidBodyHandle>,
    pub(crate) collider: Option<ColliderHandle>,
    /// Geometry storage generation the collider was built against; used to
    /// pick up mesh resources that finish loading later.
    pub(crate) geometry_generation: u64,
}

impl RigidActor {
    #[must_use]
    pub fn new(entity: Entity, dynamic_type: DynamicType, geometry: ActorGeometry) -> Self {
        Self {
            entity,
            dynamic_type,
            layer: 0,
            geometry,
            is_trigger: false,
            body: None,
            collider: None,
            geometry_generation: 0,
        }
    }

    /// Builds the collider shape, `None` while a mesh resource is not ready
    /// or its hull is degenerate.
    pub(crate) fn build_collider(
        &self,
        geometries: &ResourceStorage<ConvexGeometry>,
    ) -> Option<ColliderBuilder> {
        match &self.geometry {
            ActorGeometry::Box { half_extents } => Some(ColliderBuilder::cuboid(
                half_extents.x,
                half_extents.y,
                half_extents.z,
            )),
            ActorGeometry::Sphere { radius } => Some(ColliderBuilder::ball(*radius)),
            ActorGeometry::Capsule {
                radius,
                half_height,
            } => Some(ColliderBuilder::capsule_y(*half_height, *radius)),
            ActorGeometry::Mesh { path } => {
                let geometry = geometries.get(path)?;
                let points: Vec<_> = geometry.points.iter().map(|p| to_na_point(*p)).collect();
                ColliderBuilder::convex_hull(&points)
            }
        }
    }
}
