//! Ragdolls
//!
//! A ragdoll is a mutable tree of capsule bodies bound to skeleton bones.
//! Bones can be added, removed, connected and disconnected at runtime; the
//! tree keeps itself consistent by re-parenting affected bones and
//! recreating their joints. After each physics step the body poses are
//! written back into the entity's pose buffer, overriding animation for the
//! simulated bones.
//!
//! Tree links use the first-child/next-sibling representation with an
//! intrusive doubly linked sibling list, stored in a slotmap keyed by
//! [`BoneKey`].

use glam::{Quat, Vec3};
use rapier3d::prelude::{
    ColliderBuilder, ColliderHandle, ColliderSet, GenericJointBuilder, ImpulseJointHandle,
    ImpulseJointSet, InteractionGroups, IslandManager, JointAxesMask, MultibodyJointSet,
    RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};
use slotmap::SlotMap;

use crate::errors::Result;
use crate::physics::{from_isometry, to_isometry};
use crate::skeleton::{Pose, Skeleton};
use crate::utils::blob::{InputBlob, OutputBlob};
use crate::world::{Entity, Transform};

slotmap::new_key_type! {
    /// Stable handle of one ragdoll bone.
    pub struct BoneKey;
}

/// Joint flavor between a ragdoll bone and its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RagdollJointKind {
    Revolute = 0,
    Spherical = 1,
    Fixed = 2,
}

impl RagdollJointKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RagdollJointKind::Revolute),
            1 => Some(RagdollJointKind::Spherical),
            2 => Some(RagdollJointKind::Fixed),
            _ => None,
        }
    }

    fn axes(self) -> JointAxesMask {
        match self {
            RagdollJointKind::Revolute => JointAxesMask::LOCKED_REVOLUTE_AXES,
            RagdollJointKind::Spherical => JointAxesMask::LOCKED_SPHERICAL_AXES,
            RagdollJointKind::Fixed => JointAxesMask::LOCKED_FIXED_AXES,
        }
    }
}

/// Joint description kept beside the rapier handle so it can be recreated
/// when the tree mutates or a save is restored.
#[derive(Debug, Clone)]
pub struct RagdollJoint {
    pub kind: RagdollJointKind,
    /// Frame in the parent body's space.
    pub local_frame0: Transform,
    /// Frame in this bone's body space.
    pub local_frame1: Transform,
    pub(crate) handle: Option<ImpulseJointHandle>,
}

/// One simulated bone.
pub struct RagdollBone {
    /// Index into the skeleton / pose buffer.
    pub pose_bone: usize,
    pub half_height: f32,
    pub radius: f32,
    /// Maps body space to bone space, fixed at creation time.
    pub bind_transform: Transform,
    pub(crate) body: RigidBodyHandle,
    pub(crate) collider: ColliderHandle,
    pub(crate) parent_joint: Option<RagdollJoint>,
    pub(crate) parent: Option<BoneKey>,
    pub(crate) child: Option<BoneKey>,
    pub(crate) next: Option<BoneKey>,
    pub(crate) prev: Option<BoneKey>,
}

/// Rapier sets a ragdoll mutation needs to touch.
pub(crate) struct RagdollPhysics<'a> {
    pub bodies: &'a mut RigidBodySet,
    pub colliders: &'a mut ColliderSet,
    pub joints: &'a mut ImpulseJointSet,
    pub multibody_joints: &'a mut MultibodyJointSet,
    pub islands: &'a mut IslandManager,
}

/// One ragdoll component.
pub struct Ragdoll {
    pub entity: Entity,
    pub layer: usize,
    pub(crate) root: Option<BoneKey>,
    pub(crate) bones: SlotMap<BoneKey, RagdollBone>,
    /// Entity transform at the last sync, used to follow teleports.
    pub(crate) last_entity_tr: Transform,
}

impl Ragdoll {
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            layer: 0,
            root: None,
            bones: SlotMap::with_key(),
            last_entity_tr: Transform::IDENTITY,
        }
    }

    #[must_use]
    pub fn bone(&self, key: BoneKey) -> Option<&RagdollBone> {
        self.bones.get(key)
    }

    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// Parent of a bone in the ragdoll tree, `None` for roots.
    #[must_use]
    pub fn bone_parent(&self, key: BoneKey) -> Option<BoneKey> {
        self.bones.get(key)?.parent
    }

    /// Kind of the joint connecting a bone to its parent.
    #[must_use]
    pub fn joint_kind(&self, key: BoneKey) -> Option<RagdollJointKind> {
        Some(self.bones.get(key)?.parent_joint.as_ref()?.kind)
    }

    /// Ragdoll bone bound to a skeleton bone index.
    #[must_use]
    pub fn bone_by_pose_bone(&self, pose_bone: usize) -> Option<BoneKey> {
        self.bones
            .iter()
            .find(|(_, bone)| bone.pose_bone == pose_bone)
            .map(|(key, _)| key)
    }

    /// Closest ancestor skeleton bone that already has a ragdoll bone,
    /// walking the skeleton parent chain from `pose_bone`'s parent.
    #[must_use]
    pub fn physical_parent(&self, skeleton: &Skeleton, pose_bone: usize) -> Option<BoneKey> {
        let mut current = skeleton.bone(pose_bone).parent;
        while let Some(index) = current {
            if let Some(key) = self.bone_by_pose_bone(index) {
                return Some(key);
            }
            current = skeleton.bone(index).parent;
        }
        None
    }

    // ------------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------------

    /// Creates a capsule body for a skeleton bone and splices it into the
    /// tree. Existing bones whose closest physical ancestor becomes the new
    /// bone are re-parented under it.
    pub(crate) fn create_bone(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        entity_tr: Transform,
        skeleton: &Skeleton,
        pose: &Pose,
        pose_bone: usize,
        groups: InteractionGroups,
    ) -> Option<BoneKey> {
        if self.bone_by_pose_bone(pose_bone).is_some() {
            return None;
        }
        let bone_tr = pose.bone_transform(pose_bone);

        // capsule runs along the body's X axis toward the first child bone
        let child_pos = (0..skeleton.bone_count())
            .find(|&i| skeleton.bone(i).parent == Some(pose_bone))
            .map(|i| pose.positions[i]);
        let (dir, bone_len) = match child_pos {
            Some(p) if (p - bone_tr.pos).length() > 1e-4 => {
                let d = p - bone_tr.pos;
                (d.normalize(), d.length())
            }
            _ => (bone_tr.rot * Vec3::X, 0.0),
        };
        let half_height = if bone_len > 1e-4 {
            bone_len * 0.3
        } else {
            1.0
        };
        let radius = half_height * 0.5;

        let body_model_tr = Transform {
            pos: bone_tr.pos + dir * (bone_len * 0.5),
            rot: rotation_with_x_axis(dir),
        };
        let body_world = entity_tr * body_model_tr;
        let body = ctx.bodies.insert(
            RigidBodyBuilder::dynamic()
                .position(to_isometry(body_world))
                .user_data(u128::from(self.entity.0))
                .build(),
        );
        let collider = ctx.colliders.insert_with_parent(
            ColliderBuilder::capsule_x(half_height, radius)
                .collision_groups(groups)
                .user_data(u128::from(self.entity.0))
                .build(),
            body,
            ctx.bodies,
        );

        let key = self.bones.insert(RagdollBone {
            pose_bone,
            half_height,
            radius,
            bind_transform: body_model_tr.inverse() * bone_tr,
            body,
            collider,
            parent_joint: None,
            parent: None,
            child: None,
            next: None,
            prev: None,
        });

        match self.physical_parent(skeleton, pose_bone) {
            Some(parent) => self.connect(ctx, key, parent, entity_tr, pose),
            None => self.push_root(key),
        }
        self.adopt_closer_children(ctx, key, skeleton, entity_tr, pose);
        Some(key)
    }

    /// Removes a bone; its children are re-parented one level up, exactly as
    /// in [`Ragdoll::disconnect`].
    pub(crate) fn destroy_bone(&mut self, ctx: &mut RagdollPhysics<'_>, key: BoneKey) {
        if !self.bones.contains_key(key) {
            return;
        }
        self.disconnect(ctx, key);
        // now a root with no children
        self.unlink(key);
        let bone = self.bones.remove(key).unwrap();
        if let Some(joint) = bone.parent_joint.and_then(|j| j.handle) {
            ctx.joints.remove(joint, true);
        }
        ctx.bodies.remove(
            bone.body,
            ctx.islands,
            ctx.colliders,
            ctx.joints,
            ctx.multibody_joints,
            true,
        );
    }

    /// Attaches `child` under `parent` with a revolute joint anchored at the
    /// child's bone position.
    ///
    /// # Panics
    /// Panics if `child` already has a parent or children; only freshly
    /// created or fully disconnected bones may be connected.
    pub(crate) fn connect(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        child: BoneKey,
        parent: BoneKey,
        entity_tr: Transform,
        pose: &Pose,
    ) {
        assert!(
            self.bones[child].parent.is_none() && self.bones[child].child.is_none(),
            "only a detached bone can be connected"
        );
        self.unlink(child);
        self.attach(child, parent);
        let joint = self.make_joint(
            ctx,
            child,
            parent,
            RagdollJointKind::Revolute,
            entity_tr,
            pose.bone_transform(self.bones[child].pose_bone),
        );
        self.bones[child].parent_joint = Some(joint);
    }

    /// Detaches a bone from its parent. Children are re-parented one level
    /// up with fresh revolute joints, and the bone itself becomes the head
    /// of the root list.
    pub(crate) fn disconnect(&mut self, ctx: &mut RagdollPhysics<'_>, key: BoneKey) {
        if !self.bones.contains_key(key) {
            return;
        }
        let parent = self.bones[key].parent;

        let mut child = self.bones[key].child;
        while let Some(c) = child {
            let next = self.bones[c].next;
            if let Some(joint) = self.bones[c].parent_joint.take().and_then(|j| j.handle) {
                ctx.joints.remove(joint, true);
            }
            self.unlink(c);
            match parent {
                Some(p) => {
                    self.attach(c, p);
                    let frame = self.bone_frame(ctx, c);
                    let joint =
                        self.make_joint_world(ctx, c, p, RagdollJointKind::Revolute, frame);
                    self.bones[c].parent_joint = Some(joint);
                }
                None => self.push_root(c),
            }
            child = next;
        }
        self.bones[key].child = None;

        if let Some(joint) = self.bones[key].parent_joint.take().and_then(|j| j.handle) {
            ctx.joints.remove(joint, true);
        }
        self.unlink(key);
        self.push_root(key);
    }

    /// Replaces a bone's parent joint with a different kind. The joint frame
    /// X axis is the cross product of the two bodies' capsule axes, falling
    /// back to any perpendicular of the parent axis when they are parallel.
    pub(crate) fn change_joint(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        key: BoneKey,
        kind: RagdollJointKind,
    ) {
        let Some(parent) = self.bones.get(key).and_then(|b| b.parent) else {
            return;
        };
        if let Some(joint) = self.bones[key].parent_joint.take().and_then(|j| j.handle) {
            ctx.joints.remove(joint, true);
        }
        let frame = self.joint_frame(ctx, key, parent);
        let joint = self.make_joint_world(ctx, key, parent, kind, frame);
        self.bones[key].parent_joint = Some(joint);
    }

    /// Re-parents every bone whose closest physical ancestor in the skeleton
    /// is now `new_bone`, in ascending skeleton bone order so nested
    /// adoptions resolve deterministically.
    fn adopt_closer_children(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        new_bone: BoneKey,
        skeleton: &Skeleton,
        entity_tr: Transform,
        pose: &Pose,
    ) {
        let mut candidates: Vec<(usize, BoneKey)> = self
            .bones
            .iter()
            .filter(|(key, _)| *key != new_bone)
            .map(|(key, bone)| (bone.pose_bone, key))
            .collect();
        candidates.sort_unstable();

        for (pose_bone, key) in candidates {
            if self.physical_parent(skeleton, pose_bone) != Some(new_bone)
                || self.bones[key].parent == Some(new_bone)
            {
                continue;
            }
            if let Some(joint) = self.bones[key].parent_joint.take().and_then(|j| j.handle) {
                ctx.joints.remove(joint, true);
            }
            self.unlink(key);
            self.attach(key, new_bone);
            let joint = self.make_joint(
                ctx,
                key,
                new_bone,
                RagdollJointKind::Revolute,
                entity_tr,
                pose.bone_transform(pose_bone),
            );
            self.bones[key].parent_joint = Some(joint);
        }
    }

    // ------------------------------------------------------------------------
    // Link plumbing
    // ------------------------------------------------------------------------

    fn push_root(&mut self, key: BoneKey) {
        self.bones[key].parent = None;
        self.bones[key].prev = None;
        self.bones[key].next = self.root;
        if let Some(old) = self.root {
            self.bones[old].prev = Some(key);
        }
        self.root = Some(key);
    }

    fn attach(&mut self, child: BoneKey, parent: BoneKey) {
        self.bones[child].parent = Some(parent);
        self.bones[child].prev = None;
        self.bones[child].next = self.bones[parent].child;
        if let Some(old) = self.bones[parent].child {
            self.bones[old].prev = Some(child);
        }
        self.bones[parent].child = Some(child);
    }

    /// Removes a bone from its sibling list (or the root list).
    fn unlink(&mut self, key: BoneKey) {
        let (parent, prev, next) = {
            let bone = &self.bones[key];
            (bone.parent, bone.prev, bone.next)
        };
        match prev {
            Some(p) => self.bones[p].next = next,
            None => match parent {
                Some(p) if self.bones[p].child == Some(key) => self.bones[p].child = next,
                None if self.root == Some(key) => self.root = next,
                _ => {}
            },
        }
        if let Some(n) = next {
            self.bones[n].prev = prev;
        }
        let bone = &mut self.bones[key];
        bone.parent = None;
        bone.prev = None;
        bone.next = None;
    }

    // ------------------------------------------------------------------------
    // Joint construction
    // ------------------------------------------------------------------------

    fn body_world(&self, ctx: &RagdollPhysics<'_>, key: BoneKey) -> Transform {
        from_isometry(ctx.bodies[self.bones[key].body].position())
    }

    /// World frame anchored at a bone's skeleton joint position.
    fn bone_frame(&self, ctx: &RagdollPhysics<'_>, key: BoneKey) -> Transform {
        let body = self.body_world(ctx, key);
        body * self.bones[key].bind_transform
    }

    /// World frame whose X axis is perpendicular to both capsule axes.
    fn joint_frame(&self, ctx: &RagdollPhysics<'_>, child: BoneKey, parent: BoneKey) -> Transform {
        let parent_tr = self.body_world(ctx, parent);
        let child_tr = self.body_world(ctx, child);
        let d1 = parent_tr.rot * Vec3::X;
        let d2 = child_tr.rot * Vec3::X;
        let mut axis = d1.cross(d2);
        if axis.length() < 1e-4 {
            axis = perpendicular(d1);
        }
        Transform {
            pos: self.bone_frame(ctx, child).pos,
            rot: rotation_with_x_axis(axis.normalize()),
        }
    }

    /// Joint at the child's bone position in entity space.
    fn make_joint(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        child: BoneKey,
        parent: BoneKey,
        kind: RagdollJointKind,
        entity_tr: Transform,
        bone_tr: Transform,
    ) -> RagdollJoint {
        self.make_joint_world(ctx, child, parent, kind, entity_tr * bone_tr)
    }

    /// Joint at an explicit world-space frame.
    fn make_joint_world(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        child: BoneKey,
        parent: BoneKey,
        kind: RagdollJointKind,
        world_frame: Transform,
    ) -> RagdollJoint {
        let parent_tr = self.body_world(ctx, parent);
        let child_tr = self.body_world(ctx, child);
        let local_frame0 = parent_tr.inverse() * world_frame;
        let local_frame1 = child_tr.inverse() * parent_tr * local_frame0;
        let handle = self.insert_rapier_joint(ctx, child, parent, kind, local_frame0, local_frame1);
        RagdollJoint {
            kind,
            local_frame0,
            local_frame1,
            handle: Some(handle),
        }
    }

    fn insert_rapier_joint(
        &self,
        ctx: &mut RagdollPhysics<'_>,
        child: BoneKey,
        parent: BoneKey,
        kind: RagdollJointKind,
        local_frame0: Transform,
        local_frame1: Transform,
    ) -> ImpulseJointHandle {
        let data = GenericJointBuilder::new(kind.axes())
            .local_frame1(to_isometry(local_frame0))
            .local_frame2(to_isometry(local_frame1))
            .build();
        ctx.joints.insert(
            self.bones[parent].body,
            self.bones[child].body,
            data,
            true,
        )
    }

    // ------------------------------------------------------------------------
    // Simulation coupling
    // ------------------------------------------------------------------------

    /// Writes simulated body poses back into the entity's pose buffer.
    pub(crate) fn write_pose(&self, bodies: &RigidBodySet, entity_tr: Transform, pose: &mut Pose) {
        debug_assert!(pose.is_absolute);
        let inv_entity = entity_tr.inverse();
        for bone in self.bones.values() {
            let Some(body) = bodies.get(bone.body) else {
                continue;
            };
            if bone.pose_bone >= pose.bone_count() {
                continue;
            }
            let bone_tr = inv_entity * from_isometry(body.position()) * bone.bind_transform;
            pose.set_bone_transform(bone.pose_bone, bone_tr);
        }
    }

    /// Teleports every body to follow the entity, preserving each body's
    /// pose relative to the entity.
    pub(crate) fn follow_entity(
        &self,
        bodies: &mut RigidBodySet,
        old_entity_tr: Transform,
        new_entity_tr: Transform,
    ) {
        let inv_old = old_entity_tr.inverse();
        for bone in self.bones.values() {
            let Some(body) = bodies.get_mut(bone.body) else {
                continue;
            };
            let model = inv_old * from_isometry(body.position());
            body.set_position(to_isometry(new_entity_tr * model), true);
        }
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Writes the bone tree in preorder; `-1` terminates each sibling list.
    pub(crate) fn serialize_bones(&self, bodies: &RigidBodySet, entity_tr: Transform, blob: &mut OutputBlob) {
        self.serialize_bone(bodies, entity_tr.inverse(), self.root, blob);
    }

    fn serialize_bone(
        &self,
        bodies: &RigidBodySet,
        inv_entity: Transform,
        key: Option<BoneKey>,
        blob: &mut OutputBlob,
    ) {
        let Some(key) = key else {
            blob.write_i32(-1);
            return;
        };
        let bone = &self.bones[key];
        blob.write_i32(bone.pose_bone as i32);
        blob.write_f32(bone.half_height);
        blob.write_f32(bone.radius);
        blob.write_transform(&bone.bind_transform);
        let body_model = inv_entity * from_isometry(bodies[bone.body].position());
        blob.write_transform(&body_model);
        match &bone.parent_joint {
            Some(joint) => {
                blob.write_u8(joint.kind as u8);
                blob.write_transform(&joint.local_frame0);
                blob.write_transform(&joint.local_frame1);
            }
            None => blob.write_u8(u8::MAX),
        }
        self.serialize_bone(bodies, inv_entity, bone.child, blob);
        self.serialize_bone(bodies, inv_entity, bone.next, blob);
    }

    /// Rebuilds the tree written by [`Ragdoll::serialize_bones`].
    pub(crate) fn deserialize_bones(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        entity_tr: Transform,
        groups: InteractionGroups,
        blob: &mut InputBlob<'_>,
    ) -> Result<()> {
        self.root = self.deserialize_bone(ctx, entity_tr, groups, None, blob)?;
        Ok(())
    }

    fn deserialize_bone(
        &mut self,
        ctx: &mut RagdollPhysics<'_>,
        entity_tr: Transform,
        groups: InteractionGroups,
        parent: Option<BoneKey>,
        blob: &mut InputBlob<'_>,
    ) -> Result<Option<BoneKey>> {
        let pose_bone = blob.read_i32("ragdoll bone index")?;
        if pose_bone < 0 {
            return Ok(None);
        }
        let half_height = blob.read_f32("ragdoll bone half height")?;
        let radius = blob.read_f32("ragdoll bone radius")?;
        let bind_transform = blob.read_transform("ragdoll bind transform")?;
        let body_model = blob.read_transform("ragdoll body transform")?;
        let joint_kind = blob.read_u8("ragdoll joint kind")?;
        let joint_desc = if joint_kind == u8::MAX {
            None
        } else {
            let kind = RagdollJointKind::from_u8(joint_kind)
                .ok_or(crate::errors::FableError::BlobOverrun("ragdoll joint kind"))?;
            let local_frame0 = blob.read_transform("ragdoll joint frame0")?;
            let local_frame1 = blob.read_transform("ragdoll joint frame1")?;
            Some((kind, local_frame0, local_frame1))
        };

        let body = ctx.bodies.insert(
            RigidBodyBuilder::dynamic()
                .position(to_isometry(entity_tr * body_model))
                .user_data(u128::from(self.entity.0))
                .build(),
        );
        let collider = ctx.colliders.insert_with_parent(
            ColliderBuilder::capsule_x(half_height, radius)
                .collision_groups(groups)
                .user_data(u128::from(self.entity.0))
                .build(),
            body,
            ctx.bodies,
        );
        let key = self.bones.insert(RagdollBone {
            pose_bone: pose_bone as usize,
            half_height,
            radius,
            bind_transform,
            body,
            collider,
            parent_joint: None,
            parent,
            child: None,
            next: None,
            prev: None,
        });
        if let (Some((kind, local_frame0, local_frame1)), Some(parent_key)) = (joint_desc, parent)
        {
            let handle =
                self.insert_rapier_joint(ctx, key, parent_key, kind, local_frame0, local_frame1);
            self.bones[key].parent_joint = Some(RagdollJoint {
                kind,
                local_frame0,
                local_frame1,
                handle: Some(handle),
            });
        }

        self.bones[key].child = self.deserialize_bone(ctx, entity_tr, groups, Some(key), blob)?;
        if let Some(child) = self.bones[key].child {
            self.bones[child].prev = None;
        }
        let next = self.deserialize_bone(ctx, entity_tr, groups, parent, blob)?;
        self.bones[key].next = next;
        if let Some(next) = next {
            self.bones[next].prev = Some(key);
        }
        Ok(Some(key))
    }

    /// Removes every body, collider and joint, leaves down first.
    pub(crate) fn teardown(&mut self, ctx: &mut RagdollPhysics<'_>) {
        let keys: Vec<BoneKey> = self.bones.keys().collect();
        for key in keys {
            if let Some(joint) = self.bones[key].parent_joint.take().and_then(|j| j.handle) {
                ctx.joints.remove(joint, true);
            }
        }
        for (_, bone) in self.bones.drain() {
            ctx.bodies.remove(
                bone.body,
                ctx.islands,
                ctx.colliders,
                ctx.joints,
                ctx.multibody_joints,
                true,
            );
        }
        self.root = None;
    }
}

/// Rotation whose X axis is `x` (unit). The Y axis candidate is chosen to
/// avoid degeneracy when `x` is close to the world Z axis.
fn rotation_with_x_axis(x: Vec3) -> Quat {
    let mut y = Vec3::new(-x.y, x.x, 0.0);
    if y.length() < 1e-4 {
        y = Vec3::new(x.z, 0.0, -x.x);
    }
    let y = y.normalize();
    let z = x.cross(y).normalize();
    let y = z.cross(x);
    Quat::from_mat3(&glam::Mat3::from_cols(x, y, z))
}

/// Any unit vector perpendicular to `v`.
fn perpendicular(v: Vec3) -> Vec3 {
    let candidate = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    v.cross(candidate).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_axis_rotation_is_orthonormal() {
        for dir in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.3, -0.8, 0.52).normalize()] {
            let rot = rotation_with_x_axis(dir);
            assert!((rot * Vec3::X - dir).length() < 1e-4);
            assert!((rot.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn perpendicular_is_perpendicular() {
        for v in [Vec3::X, Vec3::Y, Vec3::new(0.9, 0.1, 0.2).normalize()] {
            assert!(perpendicular(v).dot(v).abs() < 1e-5);
        }
    }
}
