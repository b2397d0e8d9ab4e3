//! Joints
//!
//! Joint components connect the body on their own entity to the body of a
//! connected entity. Descriptions only store the local frame on the owning
//! side; the connected side's frame is derived from the entities' relative
//! transform when the game starts, so joints realized at start always match
//! the authored spatial relationship.

use rapier3d::prelude::{
    GenericJoint, GenericJointBuilder, ImpulseJointHandle, JointAxesMask, JointAxis,
};

use crate::physics::to_isometry;
use crate::world::{Entity, Transform};

/// Per-axis freedom of a D6 joint, ordered X, Y, Z, AngX, AngY, AngZ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum D6Motion {
    Locked,
    Limited,
    Free,
}

/// Joint flavor and its limits.
#[derive(Debug, Clone)]
pub enum JointKind {
    /// Ball joint; optional swing limits around the frame's Y and Z axes,
    /// in radians.
    Spherical { limit: Option<(f32, f32)> },
    /// Revolute around the frame's X axis; optional angular range.
    Hinge { limit: Option<(f32, f32)> },
    Fixed,
    /// Fully configurable joint. Limited linear axes use `linear_limit`,
    /// limited angular axes `angular_limit` (both symmetric).
    D6 {
        motions: [D6Motion; 6],
        linear_limit: f32,
        angular_limit: f32,
    },
}

/// One joint component.
pub struct Joint {
    pub entity: Entity,
    pub connected_entity: Option<Entity>,
    pub kind: JointKind,
    /// Joint frame in the owning entity's space.
    pub local_frame0: Transform,
    pub(crate) handle: Option<ImpulseJointHandle>,
}

impl Joint {
    #[must_use]
    pub fn new(entity: Entity, kind: JointKind) -> Self {
        Self {
            entity,
            connected_entity: None,
            kind,
            local_frame0: Transform::IDENTITY,
            handle: None,
        }
    }

    /// Frame on the connected side, from both entities' world transforms:
    /// the two frames coincide in world space at init time.
    #[must_use]
    pub fn derive_local_frame1(&self, own: Transform, connected: Transform) -> Transform {
        connected.inverse() * own * self.local_frame0
    }

    /// Builds the rapier joint data for this description.
    #[must_use]
    pub fn build(&self, local_frame1: Transform) -> GenericJoint {
        const AXES: [JointAxis; 6] = [
            JointAxis::X,
            JointAxis::Y,
            JointAxis::Z,
            JointAxis::AngX,
            JointAxis::AngY,
            JointAxis::AngZ,
        ];
        let mut builder = match &self.kind {
            JointKind::Fixed => GenericJointBuilder::new(JointAxesMask::LOCKED_FIXED_AXES),
            JointKind::Spherical { limit } => {
                let mut b = GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES);
                if let Some((y, z)) = limit {
                    b = b
                        .limits(JointAxis::AngY, [-y.abs(), y.abs()])
                        .limits(JointAxis::AngZ, [-z.abs(), z.abs()]);
                }
                b
            }
            JointKind::Hinge { limit } => {
                let mut b = GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES);
                if let Some((min, max)) = limit {
                    b = b.limits(JointAxis::AngX, [*min, *max]);
                }
                b
            }
            JointKind::D6 {
                motions,
                linear_limit,
                angular_limit,
            } => {
                let mut mask = JointAxesMask::empty();
                for (i, motion) in motions.iter().enumerate() {
                    if *motion == D6Motion::Locked {
                        mask |= JointAxesMask::from_bits_truncate(1 << i);
                    }
                }
                let mut b = GenericJointBuilder::new(mask);
                for (i, motion) in motions.iter().enumerate() {
                    if *motion == D6Motion::Limited {
                        let limit = if i < 3 { *linear_limit } else { *angular_limit };
                        b = b.limits(AXES[i], [-limit.abs(), limit.abs()]);
                    }
                }
                b
            }
        };
        builder = builder
            .local_frame1(to_isometry(self.local_frame0))
            .local_frame2(to_isometry(local_frame1));
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn derived_frames_coincide_in_world_space() {
        let mut joint = Joint::new(Entity(0), JointKind::Fixed);
        joint.local_frame0 = Transform::new(Vec3::X, Quat::from_rotation_z(0.4));
        let own = Transform::new(Vec3::new(1.0, 2.0, 0.0), Quat::from_rotation_y(0.9));
        let connected = Transform::new(Vec3::new(-2.0, 0.0, 1.0), Quat::from_rotation_x(-0.3));

        let frame1 = joint.derive_local_frame1(own, connected);
        let world0 = own * joint.local_frame0;
        let world1 = connected * frame1;
        assert!((world0.pos - world1.pos).length() < 1e-5);
        assert!(world0.rot.dot(world1.rot).abs() > 0.9999);
    }
}
