//! Physics Scene Tests
//!
//! Tests for:
//! - rigid actors falling, resting and mirroring into entity transforms
//! - raycasts against the stepped world
//! - collision layers filtering contacts
//! - character controllers walking and standing on geometry
//! - queued forces and contact events
//! - scene serialization round trips

use glam::Vec3;

use fable::physics::{
    ActorGeometry, DynamicType, JointKind, PhysicsScene,
};
use fable::resources::ResourceServer;
use fable::utils::blob::{InputBlob, OutputBlob};
use fable::world::{Entity, Transform, World};

const DT: f32 = 1.0 / 60.0;

fn setup() -> (World, PhysicsScene) {
    let server = ResourceServer::offline();
    (World::new(), PhysicsScene::new(&server))
}

/// Large static box whose top face sits at y = 0.
fn spawn_ground(world: &mut World, scene: &mut PhysicsScene) -> Entity {
    let ground = world.create_entity();
    world.set_position(ground, Vec3::new(0.0, -0.5, 0.0));
    scene.create_actor(
        world,
        ground,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::new(10.0, 0.5, 10.0),
        },
    );
    ground
}

fn step(world: &mut World, scene: &mut PhysicsScene, ticks: usize) {
    for _ in 0..ticks {
        scene.update(world, DT);
    }
}

// ============================================================================
// Actors
// ============================================================================

#[test]
fn dynamic_actor_falls_under_gravity() {
    let (mut world, mut scene) = setup();
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 30);
    assert!(world.transform(ball).pos.y < 4.9);
}

#[test]
fn scene_does_not_step_before_the_game_starts() {
    let (mut world, mut scene) = setup();
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    step(&mut world, &mut scene, 30);
    assert!((world.transform(ball).pos.y - 5.0).abs() < 1e-5);
}

#[test]
fn dynamic_sphere_rests_on_a_static_box() {
    let (mut world, mut scene) = setup();
    spawn_ground(&mut world, &mut scene);
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 2.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 400);
    // resting on the top face, center one radius above it
    assert!((world.transform(ball).pos.y - 0.5).abs() < 0.1);
}

#[test]
fn a_long_hitch_is_clamped() {
    let (mut world, mut scene) = setup();
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    scene.start_game(&world);
    scene.update(&mut world, 10.0);
    // integrated as one short step, not ten seconds of free fall
    assert!(world.transform(ball).pos.y > 4.0);
}

#[test]
fn actor_speed_reports_only_dynamic_bodies() {
    let (mut world, mut scene) = setup();
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );
    let wall = world.create_entity();
    scene.create_actor(
        &world,
        wall,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::ONE,
        },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 30);
    assert!(scene.actor_speed(ball).unwrap() > 0.1);
    assert!(scene.actor_speed(wall).is_none());
}

#[test]
fn queued_force_overcomes_gravity() {
    let (mut world, mut scene) = setup();
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    scene.start_game(&world);
    scene.apply_force(ball, Vec3::new(0.0, 1.0e5, 0.0));
    step(&mut world, &mut scene, 30);
    assert!(world.transform(ball).pos.y > 5.0);
}

// ============================================================================
// Raycasts
// ============================================================================

#[test]
fn raycast_hits_the_closest_collider() {
    let (mut world, mut scene) = setup();
    let block = world.create_entity();
    scene.create_actor(
        &world,
        block,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::ONE,
        },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 1);

    let hit = scene
        .raycast(Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 20.0, None)
        .unwrap();
    assert_eq!(hit.entity, block);
    assert!((hit.distance - 4.0).abs() < 0.01);
    assert!((hit.position.y - 1.0).abs() < 0.01);
    assert!((hit.normal - Vec3::Y).length() < 0.01);
}

#[test]
fn raycast_misses_beyond_max_distance() {
    let (mut world, mut scene) = setup();
    let block = world.create_entity();
    scene.create_actor(
        &world,
        block,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::ONE,
        },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 1);
    let hit = scene.raycast(Vec3::new(0.0, 5.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 2.0, None);
    assert!(hit.is_none());
}

#[test]
fn raycast_can_ignore_an_entity() {
    let (mut world, mut scene) = setup();
    let top = world.create_entity();
    world.set_position(top, Vec3::new(0.0, 3.0, 0.0));
    scene.create_actor(
        &world,
        top,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::ONE,
        },
    );
    let bottom = world.create_entity();
    scene.create_actor(
        &world,
        bottom,
        DynamicType::Static,
        ActorGeometry::Box {
            half_extents: Vec3::ONE,
        },
    );

    scene.start_game(&world);
    step(&mut world, &mut scene, 1);
    let hit = scene
        .raycast(
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
            20.0,
            Some(top),
        )
        .unwrap();
    assert_eq!(hit.entity, bottom);
}

// ============================================================================
// Contacts and layers
// ============================================================================

#[test]
fn contact_events_report_the_entity_pair() {
    let (mut world, mut scene) = setup();
    let ground = spawn_ground(&mut world, &mut scene);
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 1.5, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );

    scene.start_game(&world);
    let mut touched = false;
    for _ in 0..240 {
        scene.update(&mut world, DT);
        if scene.contacts().iter().any(|c| {
            c.started
                && ((c.entity_a, c.entity_b) == (ball, ground)
                    || (c.entity_a, c.entity_b) == (ground, ball))
        }) {
            touched = true;
            break;
        }
    }
    assert!(touched);
}

#[test]
fn disabled_layers_let_bodies_pass_through() {
    let (mut world, mut scene) = setup();
    spawn_ground(&mut world, &mut scene);
    let ball = world.create_entity();
    world.set_position(ball, Vec3::new(0.0, 2.0, 0.0));
    scene.create_actor(
        &world,
        ball,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.5 },
    );
    scene.set_actor_layer(ball, 1);
    scene.set_layers_can_collide(0, 1, false);

    scene.start_game(&world);
    step(&mut world, &mut scene, 240);
    assert!(world.transform(ball).pos.y < -1.0);
}

#[test]
fn layer_matrix_is_symmetric_through_the_scene() {
    let (_, mut scene) = setup();
    assert_eq!(scene.layers().count(), 2);
    let added = scene.add_layer().unwrap();
    assert_eq!(added, 2);
    scene.set_layer_name(added, "debris");
    scene.set_layers_can_collide(0, added, false);
    assert!(!scene.layers().can_collide(added, 0));
    assert_eq!(scene.layers().name(added), "debris");
}

// ============================================================================
// Character controllers
// ============================================================================

#[test]
fn controller_lands_and_reports_grounded() {
    let (mut world, mut scene) = setup();
    spawn_ground(&mut world, &mut scene);
    let hero = world.create_entity();
    world.set_position(hero, Vec3::new(0.0, 0.5, 0.0));
    scene.create_controller(&world, hero);

    scene.start_game(&world);
    step(&mut world, &mut scene, 240);
    assert!(scene.controller(hero).unwrap().is_grounded());
    // entity position is at the feet
    assert!(world.transform(hero).pos.y.abs() < 0.1);
}

#[test]
fn controller_walks_where_it_is_told() {
    let (mut world, mut scene) = setup();
    spawn_ground(&mut world, &mut scene);
    let hero = world.create_entity();
    world.set_position(hero, Vec3::new(0.0, 0.1, 0.0));
    scene.create_controller(&world, hero);

    scene.start_game(&world);
    for _ in 0..120 {
        scene.move_controller(hero, Vec3::new(0.03, 0.0, 0.0));
        scene.update(&mut world, DT);
    }
    assert!(world.transform(hero).pos.x > 1.0);
}

#[test]
fn free_controller_is_skipped_by_the_update() {
    let (mut world, mut scene) = setup();
    let ghost = world.create_entity();
    world.set_position(ghost, Vec3::new(0.0, 3.0, 0.0));
    scene.create_controller(&world, ghost);
    scene.controller_mut(ghost).unwrap().is_free = true;

    scene.start_game(&world);
    step(&mut world, &mut scene, 120);
    // no ground anywhere, yet the free controller never moves
    assert!((world.transform(ghost).pos.y - 3.0).abs() < 1e-4);
}

// ============================================================================
// Terrains
// ============================================================================

#[test]
fn terrain_raycasts_at_scaled_sample_heights() {
    let server = ResourceServer::offline();
    server.heightmaps.insert_ready(
        "maps/flat.json",
        fable::resources::Heightmap::new(3, 3, vec![0.5; 9]),
    );
    let mut world = World::new();
    let mut scene = PhysicsScene::new(&server);
    let terrain = world.create_entity();
    scene.create_terrain(&world, terrain, "maps/flat.json", 1.0, 2.0);

    scene.start_game(&world);
    scene.update(&mut world, DT);
    let hit = scene
        .raycast(Vec3::new(1.0, 5.0, 1.0), Vec3::new(0.0, -1.0, 0.0), 20.0, None)
        .unwrap();
    assert_eq!(hit.entity, terrain);
    // sample value 0.5 at y_scale 2 puts the surface at y = 1
    assert!((hit.position.y - 1.0).abs() < 0.05);
}

#[test]
fn terrain_collider_appears_once_the_heightmap_loads() {
    let server = ResourceServer::offline();
    let mut world = World::new();
    let mut scene = PhysicsScene::new(&server);
    let terrain = world.create_entity();
    scene.create_terrain(&world, terrain, "maps/late.json", 1.0, 1.0);

    scene.start_game(&world);
    scene.update(&mut world, DT);
    let origin = Vec3::new(1.0, 5.0, 1.0);
    let down = Vec3::new(0.0, -1.0, 0.0);
    assert!(scene.raycast(origin, down, 20.0, None).is_none());

    server.heightmaps.insert_ready(
        "maps/late.json",
        fable::resources::Heightmap::new(3, 3, vec![0.0; 9]),
    );
    scene.update(&mut world, DT);
    let hit = scene.raycast(origin, down, 20.0, None).unwrap();
    assert_eq!(hit.entity, terrain);
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn scene_round_trips_through_a_blob() {
    let server = ResourceServer::offline();
    let mut world = World::new();
    let mut scene = PhysicsScene::new(&server);

    let layer = scene.add_layer().unwrap();
    scene.set_layer_name(layer, "props");
    scene.set_layers_can_collide(0, layer, false);

    let crate_entity = world.create_entity();
    world.set_position(crate_entity, Vec3::new(1.0, 2.0, 3.0));
    scene.create_actor(
        &world,
        crate_entity,
        DynamicType::Dynamic,
        ActorGeometry::Box {
            half_extents: Vec3::new(0.5, 0.25, 0.5),
        },
    );
    scene.set_actor_layer(crate_entity, layer);

    let anchor = world.create_entity();
    scene.create_actor(
        &world,
        anchor,
        DynamicType::Static,
        ActorGeometry::Sphere { radius: 0.1 },
    );

    let hero = world.create_entity();
    scene.create_controller(&world, hero);
    scene.controller_mut(hero).unwrap().radius = 0.4;
    scene.controller_mut(hero).unwrap().use_gravity = false;
    scene.controller_mut(hero).unwrap().is_free = true;

    scene.create_joint(
        crate_entity,
        JointKind::Hinge {
            limit: Some((-0.5, 0.5)),
        },
    );
    scene.joint_mut(crate_entity).unwrap().connected_entity = Some(anchor);
    scene.joint_mut(crate_entity).unwrap().local_frame0 =
        Transform::new(Vec3::X, glam::Quat::IDENTITY);

    let mut blob = OutputBlob::new();
    scene.serialize(&mut blob).unwrap();

    let mut restored = PhysicsScene::new(&server);
    restored
        .deserialize(&world, &mut InputBlob::new(blob.as_slice()))
        .unwrap();

    assert_eq!(restored.layers().count(), 3);
    assert_eq!(restored.layers().name(layer), "props");
    assert!(!restored.layers().can_collide(0, layer));

    let actor = restored.actor(crate_entity).unwrap();
    assert_eq!(actor.dynamic_type, DynamicType::Dynamic);
    assert_eq!(actor.layer, layer);
    match &actor.geometry {
        ActorGeometry::Box { half_extents } => {
            assert!((*half_extents - Vec3::new(0.5, 0.25, 0.5)).length() < 1e-5);
        }
        other => panic!("unexpected geometry {other:?}"),
    }

    let controller = restored.controller(hero).unwrap();
    assert!((controller.radius - 0.4).abs() < 1e-5);
    assert!(!controller.use_gravity);
    assert!(controller.is_free);

    let joint = restored.joint(crate_entity).unwrap();
    assert_eq!(joint.connected_entity, Some(anchor));
    assert!((joint.local_frame0.pos - Vec3::X).length() < 1e-5);
    match &joint.kind {
        JointKind::Hinge { limit } => assert_eq!(*limit, Some((-0.5, 0.5))),
        other => panic!("unexpected joint kind {other:?}"),
    }
}

#[test]
fn old_streams_skip_the_gated_blocks() {
    let server = ResourceServer::offline();
    let world = World::new();
    let mut scene = PhysicsScene::new(&server);

    // version 0 stream: no layer block, no per-component layers, no ragdoll
    // or joint blocks
    let mut blob = OutputBlob::new();
    blob.write_u32(0);
    blob.write_u32(0); // actors
    blob.write_u32(0); // terrains
    blob.write_u32(0); // controllers
    scene
        .deserialize(&world, &mut InputBlob::new(blob.as_slice()))
        .unwrap();
    assert_eq!(scene.layers().count(), 2);
    assert!(scene.contacts().is_empty());
}

#[test]
fn deserialize_rejects_a_future_version() {
    let server = ResourceServer::offline();
    let world = World::new();
    let mut scene = PhysicsScene::new(&server);
    let mut blob = OutputBlob::new();
    blob.write_u32(999);
    assert!(
        scene
            .deserialize(&world, &mut InputBlob::new(blob.as_slice()))
            .is_err()
    );
}

#[test]
fn jointed_bodies_stay_near_their_anchor() {
    let (mut world, mut scene) = setup();
    let anchor = world.create_entity();
    world.set_position(anchor, Vec3::new(0.0, 5.0, 0.0));
    scene.create_actor(
        &world,
        anchor,
        DynamicType::Static,
        ActorGeometry::Sphere { radius: 0.1 },
    );

    let bob = world.create_entity();
    world.set_position(bob, Vec3::new(0.0, 4.0, 0.0));
    scene.create_actor(
        &world,
        bob,
        DynamicType::Dynamic,
        ActorGeometry::Sphere { radius: 0.2 },
    );
    scene.create_joint(bob, JointKind::Spherical { limit: None });
    scene.joint_mut(bob).unwrap().connected_entity = Some(anchor);

    scene.start_game(&world);
    step(&mut world, &mut scene, 300);
    // the ball joint keeps the bob from free-falling away
    let pos = world.transform(bob).pos;
    assert!((pos - Vec3::new(0.0, 4.0, 0.0)).length() < 1.5);
}
