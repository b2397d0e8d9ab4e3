//! Physics
//!
//! Rigid-body simulation built on rapier: actors, joints, kinematic
//! character controllers, terrain heightfields, collision layers and mutable
//! ragdolls, all owned by the [`PhysicsScene`].
//!
//! The engine's math is glam-based while rapier speaks nalgebra; the
//! conversion helpers below are the only place the two meet.

pub mod actor;
pub mod character;
pub mod heightfield;
pub mod joints;
pub mod layers;
pub mod ragdoll;
pub mod scene;

pub use actor::{ActorGeometry, DynamicType, RigidActor};
pub use character::CharacterController;
pub use heightfield::Terrain;
pub use joints::{D6Motion, Joint, JointKind};
pub use layers::CollisionLayers;
pub use ragdoll::{BoneKey, Ragdoll, RagdollBone, RagdollJointKind};
pub use scene::{ContactRecord, PhysicsScene, PhysicsSceneVersion, RaycastHit};

use glam::{Quat, Vec3};
use rapier3d::na;
use rapier3d::prelude::{Isometry, Point, Vector};

use crate::world::Transform;

#[must_use]
pub(crate) fn to_na(v: Vec3) -> Vector<f32> {
    Vector::new(v.x, v.y, v.z)
}

#[must_use]
pub(crate) fn to_na_point(v: Vec3) -> Point<f32> {
    Point::new(v.x, v.y, v.z)
}

#[must_use]
pub(crate) fn from_na(v: Vector<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

#[must_use]
pub(crate) fn to_isometry(tr: Transform) -> Isometry<f32> {
    Isometry::from_parts(
        na::Translation3::new(tr.pos.x, tr.pos.y, tr.pos.z),
        na::UnitQuaternion::from_quaternion(na::Quaternion::new(
            tr.rot.w, tr.rot.x, tr.rot.y, tr.rot.z,
        )),
    )
}

#[must_use]
pub(crate) fn from_isometry(iso: &Isometry<f32>) -> Transform {
    let q = iso.rotation.quaternion();
    Transform {
        pos: from_na(iso.translation.vector),
        rot: Quat::from_xyzw(q.i, q.j, q.k, q.w),
    }
}
