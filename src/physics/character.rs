//! Character Controllers
//!
//! Kinematic capsule controllers moved with rapier's character control
//! solver. Game code accumulates a displacement with [`CharacterController::move_by`];
//! the scene consumes it during the update, adds gravity, slides the capsule
//! against the world and writes the resulting feet position back to the
//! entity.

use glam::Vec3;
use rapier3d::control::KinematicCharacterController;
use rapier3d::prelude::{ColliderHandle, RigidBodyHandle};

use crate::world::Entity;

pub const DEFAULT_RADIUS: f32 = 0.25;
pub const DEFAULT_HEIGHT: f32 = 1.8;
const GRAVITY: f32 = -9.8;

/// One kinematic character capsule.
pub struct CharacterController {
    pub entity: Entity,
    pub radius: f32,
    /// Cylindrical part of the capsule; total capsule height is
    /// `height + 2 * radius`.
    pub height: f32,
    pub layer: usize,
    /// Whether gravity pulls the capsule down between moves.
    pub use_gravity: bool,
    /// A free controller keeps its body but is skipped by the update, e.g.
    /// while a ragdoll drives the entity.
    pub is_free: bool,
    pub(crate) body: Option<RigidBodyHandle>,
    pub(crate) collider: Option<ColliderHandle>,
    pub(crate) controller: KinematicCharacterController,
    pub(crate) frame_change: Vec3,
    pub(crate) gravity_speed: f32,
    pub(crate) grounded: bool,
}

impl CharacterController {
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            radius: DEFAULT_RADIUS,
            height: DEFAULT_HEIGHT,
            layer: 0,
            use_gravity: true,
            is_free: false,
            body: None,
            collider: None,
            controller: KinematicCharacterController::default(),
            frame_change: Vec3::ZERO,
            gravity_speed: 0.0,
            grounded: false,
        }
    }

    /// Queues a displacement consumed by the next physics update.
    pub fn move_by(&mut self, displacement: Vec3) {
        self.frame_change += displacement;
    }

    #[must_use]
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Capsule center relative to the entity position (which is at the feet).
    #[must_use]
    pub(crate) fn center_offset(&self) -> Vec3 {
        Vec3::new(0.0, self.height * 0.5 + self.radius, 0.0)
    }

    /// Displacement for this step: queued movement plus accumulated gravity.
    pub(crate) fn take_displacement(&mut self, dt: f32) -> Vec3 {
        let mut disp = std::mem::replace(&mut self.frame_change, Vec3::ZERO);
        if self.use_gravity {
            self.gravity_speed += GRAVITY * dt;
            disp.y += self.gravity_speed * dt;
        }
        disp
    }

    pub(crate) fn set_grounded(&mut self, grounded: bool) {
        self.grounded = grounded;
        if grounded {
            self.gravity_speed = 0.0;
        }
    }
}
