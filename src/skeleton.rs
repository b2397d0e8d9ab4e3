//! Skeleton and Pose Buffers
//!
//! A [`Skeleton`] is the immutable bone description shared by every entity
//! using the same model: bone names (addressed by 32-bit name hash), parent
//! indices and the model-space bind pose. A [`Pose`] is the per-entity buffer
//! of bone positions/rotations that animation sampling, controller blending,
//! IK and ragdoll write-back all operate on.
//!
//! Bones are stored parent-before-child, so relative→absolute conversion is
//! a single forward pass and the inverse a single backward pass.

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::utils::hash::name_hash;
use crate::world::Transform;

/// One bone of a skeleton.
#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub name_hash: u32,
    /// Parent bone index; `None` for the root. Always less than this bone's
    /// own index.
    pub parent: Option<usize>,
    /// Model-space bind transform.
    pub bind_transform: Transform,
}

/// Immutable, shared bone description.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    bones: Vec<Bone>,
    by_hash: FxHashMap<u32, usize>,
}

impl Skeleton {
    /// Builds a skeleton from bones in parent-before-child order.
    ///
    /// # Panics
    /// Panics if a bone's parent index is not smaller than its own index.
    #[must_use]
    pub fn new(bones: Vec<Bone>) -> Self {
        let mut by_hash = FxHashMap::default();
        for (i, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                assert!(parent < i, "bones must be ordered parent-before-child");
            }
            by_hash.insert(bone.name_hash, i);
        }
        Self { bones, by_hash }
    }

    /// Convenience constructor from `(name, parent, bind_transform)` triples.
    #[must_use]
    pub fn from_bones(bones: &[(&str, Option<usize>, Transform)]) -> Self {
        Self::new(
            bones
                .iter()
                .map(|(name, parent, bind)| Bone {
                    name: (*name).to_string(),
                    name_hash: name_hash(name),
                    parent: *parent,
                    bind_transform: *bind,
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[must_use]
    pub fn bone(&self, index: usize) -> &Bone {
        &self.bones[index]
    }

    #[must_use]
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Resolves a bone by name hash.
    #[must_use]
    pub fn bone_index(&self, hash: u32) -> Option<usize> {
        self.by_hash.get(&hash).copied()
    }

    /// Fills `pose` with the relative (parent-local) bind pose.
    pub fn fill_relative_bind_pose(&self, pose: &mut Pose) {
        pose.resize(self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            let local = match bone.parent {
                Some(p) => self.bones[p].bind_transform.inverse() * bone.bind_transform,
                None => bone.bind_transform,
            };
            pose.positions[i] = local.pos;
            pose.rotations[i] = local.rot;
        }
        pose.is_absolute = false;
    }

    /// Fills `pose` with the model-space bind pose.
    pub fn fill_absolute_bind_pose(&self, pose: &mut Pose) {
        pose.resize(self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            pose.positions[i] = bone.bind_transform.pos;
            pose.rotations[i] = bone.bind_transform.rot;
        }
        pose.is_absolute = true;
    }
}

/// Per-entity bone transform buffer.
#[derive(Debug, Clone, Default)]
pub struct Pose {
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    /// Whether transforms are model-space (`true`) or parent-local (`false`).
    pub is_absolute: bool,
}

impl Pose {
    #[must_use]
    pub fn new(bone_count: usize) -> Self {
        Self {
            positions: vec![Vec3::ZERO; bone_count],
            rotations: vec![Quat::IDENTITY; bone_count],
            is_absolute: false,
        }
    }

    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.positions.len()
    }

    pub fn resize(&mut self, bone_count: usize) {
        self.positions.resize(bone_count, Vec3::ZERO);
        self.rotations.resize(bone_count, Quat::IDENTITY);
    }

    #[must_use]
    pub fn bone_transform(&self, index: usize) -> Transform {
        Transform::new(self.positions[index], self.rotations[index])
    }

    pub fn set_bone_transform(&mut self, index: usize, transform: Transform) {
        self.positions[index] = transform.pos;
        self.rotations[index] = transform.rot;
    }

    /// Converts parent-local transforms to model space, in place.
    pub fn compute_absolute(&mut self, skeleton: &Skeleton) {
        if self.is_absolute {
            return;
        }
        for i in 0..self.positions.len() {
            if let Some(parent) = skeleton.bone(i).parent {
                let parent_tr = Transform::new(self.positions[parent], self.rotations[parent]);
                let local = Transform::new(self.positions[i], self.rotations[i]);
                let absolute = parent_tr * local;
                self.positions[i] = absolute.pos;
                self.rotations[i] = absolute.rot;
            }
        }
        self.is_absolute = true;
    }

    /// Converts model-space transforms back to parent-local, in place.
    pub fn compute_relative(&mut self, skeleton: &Skeleton) {
        if !self.is_absolute {
            return;
        }
        for i in (0..self.positions.len()).rev() {
            if let Some(parent) = skeleton.bone(i).parent {
                let parent_tr = Transform::new(self.positions[parent], self.rotations[parent]);
                let absolute = Transform::new(self.positions[i], self.rotations[i]);
                let local = parent_tr.inverse() * absolute;
                self.positions[i] = local.pos;
                self.rotations[i] = local.rot;
            }
        }
        self.is_absolute = false;
    }

    /// Blends `other` into this pose at `weight` (nlerp on rotations).
    pub fn blend(&mut self, other: &Pose, weight: f32) {
        let count = self.positions.len().min(other.positions.len());
        for i in 0..count {
            self.positions[i] = self.positions[i].lerp(other.positions[i], weight);
            self.rotations[i] = self.rotations[i].slerp(other.rotations[i], weight);
        }
    }
}
