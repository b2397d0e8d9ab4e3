//! Ragdoll Tests
//!
//! Tests for:
//! - splicing bones into the tree (adoption of closer children included)
//! - destroying and disconnecting bones with one-level re-parenting
//! - switching parent joint kinds
//! - simulated bones overriding the animated pose
//! - bone tree serialization round trips

use std::sync::Arc;

use glam::Vec3;

use fable::physics::{PhysicsScene, RagdollJointKind};
use fable::resources::ResourceServer;
use fable::skeleton::Skeleton;
use fable::utils::blob::{InputBlob, OutputBlob};
use fable::world::{Entity, Transform, World};

const DT: f32 = 1.0 / 60.0;

/// hip -> knee -> foot, one unit apart along Y.
fn leg_skeleton() -> Skeleton {
    Skeleton::from_bones(&[
        (
            "hip",
            None,
            Transform::new(Vec3::new(0.0, 2.0, 0.0), glam::Quat::IDENTITY),
        ),
        (
            "knee",
            Some(0),
            Transform::new(Vec3::new(0.0, 1.0, 0.0), glam::Quat::IDENTITY),
        ),
        ("foot", Some(1), Transform::IDENTITY),
    ])
}

fn setup() -> (World, PhysicsScene, Entity) {
    let server = ResourceServer::offline();
    let mut world = World::new();
    let entity = world.create_entity();
    world.attach_rig(entity, Arc::new(leg_skeleton()));
    let mut scene = PhysicsScene::new(&server);
    scene.create_ragdoll(&world, entity);
    (world, scene, entity)
}

// ============================================================================
// Tree mutation
// ============================================================================

#[test]
fn a_gap_in_the_chain_bridges_to_the_closest_ancestor() {
    let (world, mut scene, entity) = setup();
    let hip = scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let foot = scene.create_ragdoll_bone(&world, entity, 2).unwrap();

    let ragdoll = scene.ragdoll(entity).unwrap();
    assert_eq!(ragdoll.bone_parent(foot), Some(hip));
    assert_eq!(ragdoll.joint_kind(foot), Some(RagdollJointKind::Revolute));
}

#[test]
fn inserting_a_middle_bone_adopts_closer_children() {
    let (world, mut scene, entity) = setup();
    let hip = scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let foot = scene.create_ragdoll_bone(&world, entity, 2).unwrap();
    let knee = scene.create_ragdoll_bone(&world, entity, 1).unwrap();

    let ragdoll = scene.ragdoll(entity).unwrap();
    assert_eq!(ragdoll.bone_parent(knee), Some(hip));
    assert_eq!(ragdoll.bone_parent(foot), Some(knee));
}

#[test]
fn a_bone_can_only_exist_once_per_skeleton_bone() {
    let (world, mut scene, entity) = setup();
    assert!(scene.create_ragdoll_bone(&world, entity, 0).is_some());
    assert!(scene.create_ragdoll_bone(&world, entity, 0).is_none());
}

#[test]
fn destroying_a_bone_reparents_its_children_one_level_up() {
    let (world, mut scene, entity) = setup();
    let hip = scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let knee = scene.create_ragdoll_bone(&world, entity, 1).unwrap();
    let foot = scene.create_ragdoll_bone(&world, entity, 2).unwrap();
    assert_eq!(scene.ragdoll(entity).unwrap().bone_parent(foot), Some(knee));

    scene.destroy_ragdoll_bone(entity, knee);
    let ragdoll = scene.ragdoll(entity).unwrap();
    assert_eq!(ragdoll.bone_count(), 2);
    assert_eq!(ragdoll.bone_parent(foot), Some(hip));
    assert!(ragdoll.bone_by_pose_bone(1).is_none());
}

#[test]
fn disconnecting_a_bone_makes_it_a_root() {
    let (world, mut scene, entity) = setup();
    scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let knee = scene.create_ragdoll_bone(&world, entity, 1).unwrap();

    scene.disconnect_ragdoll_bone(entity, knee);
    let ragdoll = scene.ragdoll(entity).unwrap();
    assert_eq!(ragdoll.bone_parent(knee), None);
    assert_eq!(ragdoll.joint_kind(knee), None);
}

#[test]
fn joint_kind_can_be_changed_in_place() {
    let (world, mut scene, entity) = setup();
    scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let knee = scene.create_ragdoll_bone(&world, entity, 1).unwrap();
    assert_eq!(
        scene.ragdoll(entity).unwrap().joint_kind(knee),
        Some(RagdollJointKind::Revolute)
    );

    scene.change_ragdoll_bone_joint(entity, knee, RagdollJointKind::Spherical);
    assert_eq!(
        scene.ragdoll(entity).unwrap().joint_kind(knee),
        Some(RagdollJointKind::Spherical)
    );
}

#[test]
fn destroying_the_ragdoll_removes_the_component() {
    let (world, mut scene, entity) = setup();
    scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    scene.destroy_ragdoll(entity);
    assert!(scene.ragdoll(entity).is_none());
}

// ============================================================================
// Simulation coupling
// ============================================================================

#[test]
fn simulated_bones_override_the_pose() {
    let (mut world, mut scene, entity) = setup();
    scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    scene.create_ragdoll_bone(&world, entity, 1).unwrap();

    scene.start_game(&world);
    for _ in 0..60 {
        scene.update(&mut world, DT);
    }
    // nothing under the capsules, the hip falls from its bind height
    let pose = world.rig(entity).unwrap().lock_pose();
    assert!(pose.positions[0].y < 1.9);
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn bone_tree_round_trips_through_a_blob() {
    let (world, mut scene, entity) = setup();
    scene.create_ragdoll_bone(&world, entity, 0).unwrap();
    let knee = scene.create_ragdoll_bone(&world, entity, 1).unwrap();
    scene.create_ragdoll_bone(&world, entity, 2).unwrap();
    scene.change_ragdoll_bone_joint(entity, knee, RagdollJointKind::Spherical);

    let mut blob = OutputBlob::new();
    scene.serialize(&mut blob).unwrap();

    let server = ResourceServer::offline();
    let mut restored = PhysicsScene::new(&server);
    restored
        .deserialize(&world, &mut InputBlob::new(blob.as_slice()))
        .unwrap();

    let ragdoll = restored.ragdoll(entity).unwrap();
    assert_eq!(ragdoll.bone_count(), 3);
    let hip = ragdoll.bone_by_pose_bone(0).unwrap();
    let knee = ragdoll.bone_by_pose_bone(1).unwrap();
    let foot = ragdoll.bone_by_pose_bone(2).unwrap();
    assert_eq!(ragdoll.bone_parent(hip), None);
    assert_eq!(ragdoll.bone_parent(knee), Some(hip));
    assert_eq!(ragdoll.bone_parent(foot), Some(knee));
    assert_eq!(ragdoll.joint_kind(knee), Some(RagdollJointKind::Spherical));
    assert_eq!(ragdoll.joint_kind(foot), Some(RagdollJointKind::Revolute));
}
