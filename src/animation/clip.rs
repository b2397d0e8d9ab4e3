//! Animation Clips
//!
//! An [`AnimationClip`] is an immutable resource producing a bone pose for a
//! given time offset. Tracks are keyed per bone name hash and sampled with a
//! binary search over keyframe times followed by linear interpolation
//! (positions) / slerp (rotations).

use glam::{Quat, Vec3};

use crate::skeleton::{Pose, Skeleton};
use crate::world::Transform;

/// Keyframe track for one bone.
#[derive(Debug, Clone)]
pub struct BoneTrack {
    pub bone_hash: u32,
    pub times: Vec<f32>,
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
}

impl BoneTrack {
    /// Samples the track at `time`, clamping outside the keyframe range.
    #[must_use]
    pub fn sample(&self, time: f32) -> (Vec3, Quat) {
        debug_assert!(!self.times.is_empty(), "track has no keyframes");
        // partition_point finds the first keyframe strictly after `time`
        let next = self.times.partition_point(|&t| t <= time);
        if next == 0 {
            return (self.positions[0], self.rotations[0]);
        }
        let last = self.times.len() - 1;
        if next > last {
            return (self.positions[last], self.rotations[last]);
        }
        let i = next - 1;
        let dt = self.times[next] - self.times[i];
        let t = if dt > 1e-6 {
            ((time - self.times[i]) / dt).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (
            self.positions[i].lerp(self.positions[next], t),
            self.rotations[i].slerp(self.rotations[next], t),
        )
    }
}

/// Immutable clip resource.
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub length: f32,
    pub tracks: Vec<BoneTrack>,
    /// Displacement intrinsic to one full playthrough of the clip, applied
    /// by the caller to move the owning entity.
    pub root_motion: Transform,
}

impl AnimationClip {
    /// Builds a clip; length is the largest keyframe time of any track.
    #[must_use]
    pub fn new(name: String, tracks: Vec<BoneTrack>, root_motion: Transform) -> Self {
        let length = tracks
            .iter()
            .map(|t| t.times.last().copied().unwrap_or(0.0))
            .fold(0.0_f32, f32::max);
        Self {
            name,
            length,
            tracks,
            root_motion,
        }
    }

    /// Writes (weight == 1) or blends (weight < 1) the sampled bone
    /// transforms into `pose`, which must hold relative transforms. Tracks
    /// whose bone does not exist in `skeleton` are skipped.
    pub fn sample_pose(&self, time: f32, skeleton: &Skeleton, pose: &mut Pose, weight: f32) {
        for track in &self.tracks {
            let Some(index) = skeleton.bone_index(track.bone_hash) else {
                continue;
            };
            let (pos, rot) = track.sample(time);
            if weight >= 1.0 {
                pose.positions[index] = pos;
                pose.rotations[index] = rot;
            } else {
                pose.positions[index] = pose.positions[index].lerp(pos, weight);
                pose.rotations[index] = pose.rotations[index].slerp(rot, weight);
            }
        }
    }

    /// Root-motion delta between two play cursor positions, wrap-aware.
    #[must_use]
    pub fn root_motion_between(&self, from: f32, to: f32) -> Transform {
        if self.length <= 0.0 {
            return Transform::IDENTITY;
        }
        let fraction = if to >= from {
            (to - from) / self.length
        } else {
            // wrapped past the end
            (self.length - from + to) / self.length
        };
        Transform {
            pos: self.root_motion.pos * fraction,
            rot: Quat::IDENTITY.slerp(self.root_motion.rot, fraction),
        }
    }
}
