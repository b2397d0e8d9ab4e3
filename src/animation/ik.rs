//! Inverse Kinematics
//!
//! FABRIK chains solved against the model-space pose after controller
//! sampling. A chain names its bones root-to-leaf by name hash; bones are
//! resolved against the entity's skeleton at solve time and the whole chain
//! is skipped if any bone is missing. Bone lengths are taken from the current
//! pose, so the solver never stretches a limb.

use glam::{Quat, Vec3};
use log::warn;
use smallvec::SmallVec;

use crate::skeleton::{Pose, Skeleton};

/// Chains evaluated per entity, in order, until the first zero-weight entry.
pub const MAX_IK_CHAINS: usize = 4;
/// Maximum bones in one chain.
pub const MAX_IK_BONES: usize = 8;

/// One IK chain attached to an animated entity.
#[derive(Debug, Clone)]
pub struct IkChain {
    /// Blend between the animated pose (0) and the solved pose (1). A zero
    /// weight also stops evaluation of later chains on the same entity.
    pub weight: f32,
    pub max_iterations: u32,
    /// Bone name hashes, root to leaf.
    pub bones: SmallVec<[u32; MAX_IK_BONES]>,
    /// Target position in entity-local space.
    pub target: Vec3,
}

impl Default for IkChain {
    fn default() -> Self {
        Self {
            weight: 0.0,
            max_iterations: 5,
            bones: SmallVec::new(),
            target: Vec3::ZERO,
        }
    }
}

const END_TOLERANCE: f32 = 1e-3;

/// Solves one chain in place against a model-space pose.
///
/// `pose` must hold absolute transforms. Aborts without touching the pose if
/// any chain bone is missing from `skeleton`.
pub fn solve_chain(chain: &IkChain, skeleton: &Skeleton, pose: &mut Pose) {
    debug_assert!(pose.is_absolute, "IK operates on model-space poses");
    if chain.weight <= 0.0 || chain.bones.len() < 2 {
        return;
    }

    let mut indices: SmallVec<[usize; MAX_IK_BONES]> = SmallVec::new();
    for hash in &chain.bones {
        match skeleton.bone_index(*hash) {
            Some(index) => indices.push(index),
            None => {
                warn!("IK chain references a bone missing from the skeleton");
                return;
            }
        }
    }

    let count = indices.len();
    let old_positions: SmallVec<[Vec3; MAX_IK_BONES]> =
        indices.iter().map(|&i| pose.positions[i]).collect();
    let mut positions = old_positions.clone();

    let mut lengths: SmallVec<[f32; MAX_IK_BONES]> = SmallVec::new();
    let mut total_length = 0.0;
    for i in 0..count - 1 {
        let len = (positions[i + 1] - positions[i]).length();
        lengths.push(len);
        total_length += len;
    }
    if total_length <= f32::EPSILON {
        return;
    }

    // an out-of-reach target is clamped to the reachable sphere so the
    // backward pass converges instead of oscillating
    let root = positions[0];
    let mut target = chain.target;
    let to_target = target - root;
    if to_target.length() > total_length {
        target = root + to_target.normalize() * total_length;
    }

    for _ in 0..chain.max_iterations.max(1) {
        // backward: pin the effector to the target, pull ancestors along
        positions[count - 1] = target;
        for i in (0..count - 1).rev() {
            let dir = (positions[i] - positions[i + 1]).normalize_or_zero();
            positions[i] = positions[i + 1] + dir * lengths[i];
        }
        // forward: pin the root back, push descendants out
        positions[0] = root;
        for i in 1..count {
            let dir = (positions[i] - positions[i - 1]).normalize_or_zero();
            positions[i] = positions[i - 1] + dir * lengths[i - 1];
        }
        if (positions[count - 1] - target).length() < END_TOLERANCE {
            break;
        }
    }

    let weight = chain.weight.min(1.0);
    for i in 0..count - 1 {
        let old_dir = (old_positions[i + 1] - old_positions[i]).normalize_or_zero();
        let new_dir = (positions[i + 1] - positions[i]).normalize_or_zero();
        if old_dir == Vec3::ZERO || new_dir == Vec3::ZERO {
            continue;
        }
        let bone = indices[i];
        let rel = Quat::from_rotation_arc(old_dir, new_dir);
        let rotated = rel * pose.rotations[bone];
        pose.rotations[bone] = pose.rotations[bone].slerp(rotated, weight);
    }
    for i in 1..count {
        let bone = indices[i];
        pose.positions[bone] = pose.positions[bone].lerp(positions[i], weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Skeleton;
    use crate::utils::hash::name_hash;
    use crate::world::Transform;

    fn arm_pose() -> (Skeleton, Pose) {
        let skeleton = Skeleton::from_bones(&[
            ("shoulder", None, Transform::IDENTITY),
            (
                "elbow",
                Some(0),
                Transform::new(Vec3::Y, Quat::IDENTITY),
            ),
            (
                "hand",
                Some(1),
                Transform::new(Vec3::Y * 2.0, Quat::IDENTITY),
            ),
        ]);
        let mut pose = Pose::new(3);
        skeleton.fill_absolute_bind_pose(&mut pose);
        (skeleton, pose)
    }

    fn chain(target: Vec3, weight: f32) -> IkChain {
        IkChain {
            weight,
            max_iterations: 10,
            bones: SmallVec::from_slice(&[
                name_hash("shoulder"),
                name_hash("elbow"),
                name_hash("hand"),
            ]),
            target,
        }
    }

    #[test]
    fn reaches_target_within_range() {
        let (skeleton, mut pose) = arm_pose();
        let target = Vec3::new(1.0, 1.0, 0.0);
        solve_chain(&chain(target, 1.0), &skeleton, &mut pose);
        assert!((pose.positions[2] - target).length() < 0.01);
        // bone lengths are preserved
        assert!(((pose.positions[1] - pose.positions[0]).length() - 1.0).abs() < 0.01);
        assert!(((pose.positions[2] - pose.positions[1]).length() - 1.0).abs() < 0.01);
    }

    #[test]
    fn unreachable_target_straightens_chain() {
        let (skeleton, mut pose) = arm_pose();
        solve_chain(&chain(Vec3::new(10.0, 0.0, 0.0), 1.0), &skeleton, &mut pose);
        // clamped to the reachable sphere: fully extended along +X
        assert!((pose.positions[2] - Vec3::new(2.0, 0.0, 0.0)).length() < 0.01);
    }

    #[test]
    fn missing_bone_aborts_whole_chain() {
        let (skeleton, mut pose) = arm_pose();
        let before = pose.clone();
        let mut bad = chain(Vec3::X, 1.0);
        bad.bones[1] = name_hash("no_such_bone");
        solve_chain(&bad, &skeleton, &mut pose);
        for i in 0..3 {
            assert_eq!(pose.positions[i], before.positions[i]);
        }
    }

    #[test]
    fn zero_weight_is_a_no_op() {
        let (skeleton, mut pose) = arm_pose();
        let before = pose.clone();
        solve_chain(&chain(Vec3::X, 0.0), &skeleton, &mut pose);
        assert_eq!(pose.positions[2], before.positions[2]);
    }
}
