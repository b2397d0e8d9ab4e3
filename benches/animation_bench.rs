//! Animation hot-path benchmarks: clip sampling into a pose and FABRIK
//! solving, both sized like a typical humanoid rig.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use glam::{Quat, Vec3};
use smallvec::SmallVec;

use fable::animation::clip::{AnimationClip, BoneTrack};
use fable::animation::ik::{IkChain, solve_chain};
use fable::skeleton::{Pose, Skeleton};
use fable::utils::hash::name_hash;
use fable::world::Transform;

const BONE_COUNT: usize = 64;
const KEY_COUNT: usize = 30;

/// Chain of `BONE_COUNT` bones, each one unit further along Y.
fn chain_skeleton() -> Skeleton {
    let names: Vec<String> = (0..BONE_COUNT).map(|i| format!("bone{i}")).collect();
    let bones: Vec<(&str, Option<usize>, Transform)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            (
                name.as_str(),
                i.checked_sub(1),
                Transform::new(Vec3::Y * i as f32, Quat::IDENTITY),
            )
        })
        .collect();
    Skeleton::from_bones(&bones)
}

fn dense_clip() -> AnimationClip {
    let tracks = (0..BONE_COUNT)
        .map(|i| {
            let times: Vec<f32> = (0..KEY_COUNT).map(|k| k as f32 / 30.0).collect();
            BoneTrack {
                bone_hash: name_hash(&format!("bone{i}")),
                positions: times.iter().map(|t| Vec3::new(t.sin(), 1.0, 0.0)).collect(),
                rotations: times
                    .iter()
                    .map(|t| Quat::from_rotation_z(t * 0.5))
                    .collect(),
                times,
            }
        })
        .collect();
    AnimationClip::new("bench".into(), tracks, Transform::IDENTITY)
}

fn bench_clip_sampling(c: &mut Criterion) {
    let skeleton = chain_skeleton();
    let clip = dense_clip();
    let mut pose = Pose::new(BONE_COUNT);
    skeleton.fill_relative_bind_pose(&mut pose);

    c.bench_function("clip_sample_64_bones", |b| {
        b.iter(|| {
            clip.sample_pose(black_box(0.37), &skeleton, &mut pose, 1.0);
            black_box(&pose);
        });
    });

    c.bench_function("clip_sample_blended", |b| {
        b.iter(|| {
            clip.sample_pose(black_box(0.37), &skeleton, &mut pose, 0.5);
            black_box(&pose);
        });
    });
}

fn bench_ik_solve(c: &mut Criterion) {
    let skeleton = chain_skeleton();
    let mut bind = Pose::new(BONE_COUNT);
    skeleton.fill_absolute_bind_pose(&mut bind);

    let chain = IkChain {
        weight: 1.0,
        max_iterations: 10,
        bones: SmallVec::from_iter((0..8).map(|i| name_hash(&format!("bone{i}")))),
        target: Vec3::new(3.0, 4.0, 1.0),
    };

    c.bench_function("fabrik_8_bone_chain", |b| {
        b.iter(|| {
            let mut pose = bind.clone();
            solve_chain(black_box(&chain), &skeleton, &mut pose);
            black_box(&pose);
        });
    });
}

fn bench_pose_compose(c: &mut Criterion) {
    let skeleton = chain_skeleton();
    let mut pose = Pose::new(BONE_COUNT);
    skeleton.fill_relative_bind_pose(&mut pose);

    c.bench_function("pose_compute_absolute", |b| {
        b.iter(|| {
            let mut p = pose.clone();
            p.compute_absolute(&skeleton);
            black_box(&p);
        });
    });
}

criterion_group!(
    benches,
    bench_clip_sampling,
    bench_ik_solve,
    bench_pose_compose
);
criterion_main!(benches);
