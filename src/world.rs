//! Entity and Transform Registry
//!
//! The narrow surface the scenes need from an entity system: stable entity
//! ids, a rigid transform (plus a scale used only by property animators) per
//! entity, and an optional skeletal rig whose pose buffer can be locked for
//! exclusive read-modify-write during a single update stage.

use std::ops::Mul;
use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use crate::skeleton::{Pose, Skeleton};

/// Stable entity id. Plain index, never recycled by [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub u32);

/// Rigid transform: position and rotation, no scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Quat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        pos: Vec3::ZERO,
        rot: Quat::IDENTITY,
    };

    #[must_use]
    pub fn new(pos: Vec3, rot: Quat) -> Self {
        Self { pos, rot }
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rot = self.rot.inverse();
        Self {
            pos: inv_rot * -self.pos,
            rot: inv_rot,
        }
    }

    #[must_use]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rot * point + self.pos
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            pos: self.rot * rhs.pos + self.pos,
            rot: self.rot * rhs.rot,
        }
    }
}

/// A skeletal rig attached to an entity: the shared skeleton description and
/// the lockable pose buffer written by animation and ragdoll write-back.
#[derive(Clone)]
pub struct Rig {
    pub skeleton: Arc<Skeleton>,
    pose: Arc<Mutex<Pose>>,
}

impl Rig {
    #[must_use]
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        let mut pose = Pose::new(skeleton.bone_count());
        skeleton.fill_relative_bind_pose(&mut pose);
        Self {
            skeleton,
            pose: Arc::new(Mutex::new(pose)),
        }
    }

    /// Locks the pose buffer for exclusive access. Held across at most one
    /// update stage; no stage holds the lock across stage boundaries.
    pub fn lock_pose(&self) -> MutexGuard<'_, Pose> {
        self.pose.lock()
    }

    /// Shared handle to the pose buffer, for the parallel sampling stage.
    #[must_use]
    pub fn pose_handle(&self) -> Arc<Mutex<Pose>> {
        Arc::clone(&self.pose)
    }
}

struct EntityRecord {
    transform: Transform,
    scale: Vec3,
    rig: Option<Rig>,
}

/// Entity registry with transforms and optional rigs.
#[derive(Default)]
pub struct World {
    next_id: u32,
    entities: FxHashMap<Entity, EntityRecord>,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_entity(&mut self) -> Entity {
        let entity = Entity(self.next_id);
        self.next_id += 1;
        self.entities.insert(
            entity,
            EntityRecord {
                transform: Transform::IDENTITY,
                scale: Vec3::ONE,
                rig: None,
            },
        );
        entity
    }

    pub fn destroy_entity(&mut self, entity: Entity) {
        self.entities.remove(&entity);
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    #[must_use]
    pub fn transform(&self, entity: Entity) -> Transform {
        self.entities
            .get(&entity)
            .map_or(Transform::IDENTITY, |r| r.transform)
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.transform = transform;
        }
    }

    pub fn set_position(&mut self, entity: Entity, pos: Vec3) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.transform.pos = pos;
        }
    }

    pub fn set_rotation(&mut self, entity: Entity, rot: Quat) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.transform.rot = rot;
        }
    }

    #[must_use]
    pub fn scale(&self, entity: Entity) -> Vec3 {
        self.entities.get(&entity).map_or(Vec3::ONE, |r| r.scale)
    }

    pub fn set_scale(&mut self, entity: Entity, scale: Vec3) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.scale = scale;
        }
    }

    /// Attaches a skeletal rig with a fresh pose buffer.
    pub fn attach_rig(&mut self, entity: Entity, skeleton: Arc<Skeleton>) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.rig = Some(Rig::new(skeleton));
        }
    }

    #[must_use]
    pub fn rig(&self, entity: Entity) -> Option<&Rig> {
        self.entities.get(&entity)?.rig.as_ref()
    }
}
