//! Physics Scene
//!
//! Owns the rapier simulation sets and every physics component. The per-tick
//! pipeline:
//!
//! 1. apply queued forces
//! 2. clamp dt (a long hitch never explodes the simulation)
//! 3. step the pipeline, collecting contact events
//! 4. write ragdoll bodies back into pose buffers
//! 5. mirror dynamic actor bodies to entity transforms
//! 6. move character controllers and write their feet positions back
//!
//! Joints are realized when the game starts so their connected-side frames
//! always match the authored entity layout. Contact records from the last
//! step stay readable until the next one.

use std::sync::Arc;

use glam::Vec3;
use log::warn;
use parking_lot::Mutex;
use rapier3d::control::KinematicCharacterController;
use rapier3d::prelude::{
    ActiveEvents, BroadPhase, CCDSolver, Collider, ColliderBuilder, ColliderHandle, ColliderSet,
    CollisionEvent, ContactPair, EventHandler, ImpulseJointSet, IntegrationParameters,
    IslandManager, Isometry, MultibodyJointSet, NarrowPhase, PhysicsPipeline, QueryFilter,
    QueryPipeline, Ray, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, Vector,
};

use crate::errors::{FableError, Result};
use crate::physics::actor::{ActorGeometry, DynamicType, RigidActor};
use crate::physics::character::CharacterController;
use crate::physics::heightfield::Terrain;
use crate::physics::joints::{D6Motion, Joint, JointKind};
use crate::physics::layers::CollisionLayers;
use crate::physics::ragdoll::{BoneKey, Ragdoll, RagdollJointKind, RagdollPhysics};
use crate::physics::{from_isometry, from_na, to_isometry, to_na, to_na_point};
use crate::resources::{ConvexGeometry, Heightmap, ResourceServer, ResourceStorage};
use crate::utils::blob::{InputBlob, OutputBlob};
use crate::world::{Entity, World};

/// Stream format versions of the physics scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum PhysicsSceneVersion {
    Layers = 0,
    Joints = 1,
    HingeJoint = 2,
    SphericalJoint = 3,
    CapsuleActor = 4,
    SphereActor = 5,
    Ragdolls = 6,
    D6Joint = 7,
    JointRefactor = 8,
    Latest = 9,
}

/// Longest step the simulation will integrate in one update.
const MAX_TIMESTEP: f32 = 1.0 / 20.0;

/// One begin/end contact between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactRecord {
    pub entity_a: Entity,
    pub entity_b: Entity,
    pub started: bool,
}

/// Result of a [`PhysicsScene::raycast`].
#[derive(Debug, Clone, Copy)]
pub struct RaycastHit {
    pub entity: Entity,
    pub position: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Collects collision events emitted during a pipeline step.
#[derive(Default)]
struct CollisionCollector {
    events: Mutex<Vec<ContactRecord>>,
}

impl EventHandler for CollisionCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        let (a, b, started) = match event {
            CollisionEvent::Started(a, b, _) => (a, b, true),
            CollisionEvent::Stopped(a, b, _) => (a, b, false),
        };
        let (Some(ca), Some(cb)) = (colliders.get(a), colliders.get(b)) else {
            return;
        };
        self.events.lock().push(ContactRecord {
            entity_a: Entity(ca.user_data as u32),
            entity_b: Entity(cb.user_data as u32),
            started,
        });
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

// ============================================================================
// Scene
// ============================================================================

/// The scene-level physics system.
pub struct PhysicsScene {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    gravity: Vector<f32>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    queries: QueryPipeline,
    collector: CollisionCollector,

    layers: CollisionLayers,
    actors: Vec<RigidActor>,
    joints: Vec<Joint>,
    controllers: Vec<CharacterController>,
    terrains: Vec<Terrain>,
    ragdolls: Vec<Ragdoll>,

    heightmaps: Arc<ResourceStorage<Heightmap>>,
    geometries: Arc<ResourceStorage<ConvexGeometry>>,

    queued_forces: Vec<(Entity, Vec3)>,
    contacts: Vec<ContactRecord>,
    is_game_running: bool,
}

impl PhysicsScene {
    #[must_use]
    pub fn new(server: &ResourceServer) -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            gravity: Vector::new(0.0, -9.81, 0.0),
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            queries: QueryPipeline::new(),
            collector: CollisionCollector::default(),
            layers: CollisionLayers::new(),
            actors: Vec::new(),
            joints: Vec::new(),
            controllers: Vec::new(),
            terrains: Vec::new(),
            ragdolls: Vec::new(),
            heightmaps: Arc::clone(&server.heightmaps),
            geometries: Arc::clone(&server.geometries),
            queued_forces: Vec::new(),
            contacts: Vec::new(),
            is_game_running: false,
        }
    }

    /// Realizes every joint against the current entity layout and starts
    /// simulating.
    pub fn start_game(&mut self, world: &World) {
        self.init_joints(world);
        self.is_game_running = true;
    }

    /// Stops simulating and tears realized joints down; a later start
    /// re-derives them from the entity layout at that time.
    pub fn stop_game(&mut self) {
        self.is_game_running = false;
        for joint in &mut self.joints {
            if let Some(handle) = joint.handle.take() {
                self.impulse_joints.remove(handle, true);
            }
        }
    }

    /// Contact events from the last step.
    #[must_use]
    pub fn contacts(&self) -> &[ContactRecord] {
        &self.contacts
    }

    // ------------------------------------------------------------------------
    // Layers
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn layers(&self) -> &CollisionLayers {
        &self.layers
    }

    pub fn add_layer(&mut self) -> Option<usize> {
        self.layers.add_layer()
    }

    pub fn remove_layer(&mut self) {
        self.layers.remove_layer();
        self.reapply_collision_groups();
    }

    pub fn set_layer_name(&mut self, layer: usize, name: &str) {
        self.layers.set_name(layer, name);
    }

    /// Updates the matrix and pushes the new filters to every collider.
    pub fn set_layers_can_collide(&mut self, a: usize, b: usize, value: bool) {
        self.layers.set_can_collide(a, b, value);
        self.reapply_collision_groups();
    }

    fn reapply_collision_groups(&mut self) {
        for actor in &self.actors {
            if let Some(collider) = actor.collider.and_then(|h| self.colliders.get_mut(h)) {
                collider.set_collision_groups(self.layers.interaction_groups(actor.layer));
            }
        }
        for controller in &self.controllers {
            if let Some(collider) = controller.collider.and_then(|h| self.colliders.get_mut(h)) {
                collider.set_collision_groups(self.layers.interaction_groups(controller.layer));
            }
        }
        for terrain in &self.terrains {
            if let Some(collider) = terrain.collider.and_then(|h| self.colliders.get_mut(h)) {
                collider.set_collision_groups(self.layers.interaction_groups(terrain.layer));
            }
        }
        for ragdoll in &self.ragdolls {
            let groups = self.layers.interaction_groups(ragdoll.layer);
            for bone in ragdoll.bones.values() {
                if let Some(collider) = self.colliders.get_mut(bone.collider) {
                    collider.set_collision_groups(groups);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Actors
    // ------------------------------------------------------------------------

    pub fn create_actor(
        &mut self,
        world: &World,
        entity: Entity,
        dynamic_type: DynamicType,
        geometry: ActorGeometry,
    ) {
        if let ActorGeometry::Mesh { path } = &geometry {
            self.geometries.begin_load(path);
        }
        let mut actor = RigidActor::new(entity, dynamic_type, geometry);
        self.realize_actor(world, &mut actor);
        self.actors.push(actor);
    }

    pub fn destroy_actor(&mut self, entity: Entity) {
        if let Some(index) = self.actors.iter().position(|a| a.entity == entity) {
            let actor = self.actors.swap_remove(index);
            if let Some(body) = actor.body {
                self.bodies.remove(
                    body,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
            }
        }
    }

    #[must_use]
    pub fn actor(&self, entity: Entity) -> Option<&RigidActor> {
        self.actors.iter().find(|a| a.entity == entity)
    }

    pub fn set_actor_layer(&mut self, entity: Entity, layer: usize) {
        let Some(actor) = self.actors.iter_mut().find(|a| a.entity == entity) else {
            return;
        };
        actor.layer = layer;
        if let Some(collider) = actor.collider.and_then(|h| self.colliders.get_mut(h)) {
            collider.set_collision_groups(self.layers.interaction_groups(layer));
        }
    }

    /// Replaces an actor's geometry and rebuilds its collider.
    pub fn set_actor_geometry(&mut self, entity: Entity, geometry: ActorGeometry) {
        let Some(actor) = self.actors.iter_mut().find(|a| a.entity == entity) else {
            return;
        };
        if let ActorGeometry::Mesh { path } = &geometry {
            self.geometries.begin_load(path);
        }
        if let Some(collider) = actor.collider.take() {
            self.colliders
                .remove(collider, &mut self.islands, &mut self.bodies, false);
        }
        actor.geometry = geometry;
        Self::attach_actor_collider(
            &mut self.bodies,
            &mut self.colliders,
            &self.layers,
            &self.geometries,
            actor,
        );
    }

    fn realize_actor(&mut self, world: &World, actor: &mut RigidActor) {
        let position = to_isometry(world.transform(actor.entity));
        let builder = match actor.dynamic_type {
            DynamicType::Static => RigidBodyBuilder::fixed(),
            DynamicType::Dynamic => RigidBodyBuilder::dynamic(),
            DynamicType::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        };
        let body = self.bodies.insert(
            builder
                .position(position)
                .user_data(u128::from(actor.entity.0))
                .build(),
        );
        actor.body = Some(body);
        Self::attach_actor_collider(
            &mut self.bodies,
            &mut self.colliders,
            &self.layers,
            &self.geometries,
            actor,
        );
    }

    fn attach_actor_collider(
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
        layers: &CollisionLayers,
        geometries: &ResourceStorage<ConvexGeometry>,
        actor: &mut RigidActor,
    ) {
        let Some(body) = actor.body else {
            return;
        };
        actor.geometry_generation = geometries.generation();
        let Some(builder) = actor.build_collider(geometries) else {
            return;
        };
        let collider = builder
            .collision_groups(layers.interaction_groups(actor.layer))
            .sensor(actor.is_trigger)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(u128::from(actor.entity.0))
            .build();
        actor.collider = Some(colliders.insert_with_parent(collider, body, bodies));
    }

    /// Gives actors and terrains whose resource finished loading (or was
    /// reloaded) a collider.
    fn refresh_pending_colliders(&mut self) {
        let geometry_generation = self.geometries.generation();
        for actor in &mut self.actors {
            if actor.collider.is_some() || actor.geometry_generation == geometry_generation {
                continue;
            }
            Self::attach_actor_collider(
                &mut self.bodies,
                &mut self.colliders,
                &self.layers,
                &self.geometries,
                actor,
            );
        }

        let heightmap_generation = self.heightmaps.generation();
        let pending: Vec<usize> = self
            .terrains
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.collider.is_none() && t.heightmap_generation != heightmap_generation
            })
            .map(|(i, _)| i)
            .collect();
        for i in pending {
            self.attach_terrain_collider(i);
        }
    }

    // ------------------------------------------------------------------------
    // Terrains
    // ------------------------------------------------------------------------

    pub fn create_terrain(
        &mut self,
        world: &World,
        entity: Entity,
        heightmap_path: &str,
        xz_scale: f32,
        y_scale: f32,
    ) {
        self.heightmaps.begin_load(heightmap_path);
        let mut terrain = Terrain::new(entity, heightmap_path, xz_scale, y_scale);
        let body = self.bodies.insert(
            RigidBodyBuilder::fixed()
                .position(to_isometry(world.transform(entity)))
                .user_data(u128::from(entity.0))
                .build(),
        );
        terrain.body = Some(body);
        self.terrains.push(terrain);
        self.attach_terrain_collider(self.terrains.len() - 1);
    }

    pub fn destroy_terrain(&mut self, entity: Entity) {
        if let Some(index) = self.terrains.iter().position(|t| t.entity == entity) {
            let terrain = self.terrains.swap_remove(index);
            if let Some(body) = terrain.body {
                self.bodies.remove(
                    body,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
            }
        }
    }

    #[must_use]
    pub fn terrain(&self, entity: Entity) -> Option<&Terrain> {
        self.terrains.iter().find(|t| t.entity == entity)
    }

    fn attach_terrain_collider(&mut self, index: usize) {
        let terrain = &mut self.terrains[index];
        terrain.heightmap_generation = self.heightmaps.generation();
        let Some(body) = terrain.body else {
            return;
        };
        let Some(heightmap) = self.heightmaps.get(&terrain.heightmap_path) else {
            return;
        };
        let Some(builder) = terrain.build_collider(&heightmap) else {
            return;
        };
        let collider = builder
            .collision_groups(self.layers.interaction_groups(terrain.layer))
            .user_data(u128::from(terrain.entity.0))
            .build();
        terrain.collider = Some(self.colliders.insert_with_parent(
            collider,
            body,
            &mut self.bodies,
        ));
    }

    // ------------------------------------------------------------------------
    // Joints
    // ------------------------------------------------------------------------

    pub fn create_joint(&mut self, entity: Entity, kind: JointKind) {
        self.joints.push(Joint::new(entity, kind));
    }

    pub fn destroy_joint(&mut self, entity: Entity) {
        if let Some(index) = self.joints.iter().position(|j| j.entity == entity) {
            let joint = self.joints.swap_remove(index);
            if let Some(handle) = joint.handle {
                self.impulse_joints.remove(handle, true);
            }
        }
    }

    pub fn joint_mut(&mut self, entity: Entity) -> Option<&mut Joint> {
        self.joints.iter_mut().find(|j| j.entity == entity)
    }

    #[must_use]
    pub fn joint(&self, entity: Entity) -> Option<&Joint> {
        self.joints.iter().find(|j| j.entity == entity)
    }

    /// Realizes every joint whose two bodies exist. The connected-side frame
    /// is derived from the entities' world transforms at this moment.
    fn init_joints(&mut self, world: &World) {
        for i in 0..self.joints.len() {
            if self.joints[i].handle.is_some() {
                continue;
            }
            let entity = self.joints[i].entity;
            let Some(connected) = self.joints[i].connected_entity else {
                continue;
            };
            let Some(body0) = self.body_of(entity) else {
                warn!("joint on an entity without a body");
                continue;
            };
            let Some(body1) = self.body_of(connected) else {
                warn!("joint connected to an entity without a body");
                continue;
            };
            let frame1 = self.joints[i]
                .derive_local_frame1(world.transform(entity), world.transform(connected));
            let data = self.joints[i].build(frame1);
            self.joints[i].handle =
                Some(self.impulse_joints.insert(body0, body1, data, true));
        }
    }

    fn body_of(&self, entity: Entity) -> Option<RigidBodyHandle> {
        self.actors
            .iter()
            .find(|a| a.entity == entity)
            .and_then(|a| a.body)
    }

    // ------------------------------------------------------------------------
    // Character controllers
    // ------------------------------------------------------------------------

    pub fn create_controller(&mut self, world: &World, entity: Entity) {
        let controller = CharacterController::new(entity);
        self.spawn_controller(world, controller);
    }

    fn spawn_controller(&mut self, world: &World, mut controller: CharacterController) {
        let center = world.transform(controller.entity).pos + controller.center_offset();
        let body = self.bodies.insert(
            RigidBodyBuilder::kinematic_position_based()
                .translation(to_na(center))
                .user_data(u128::from(controller.entity.0))
                .build(),
        );
        let collider = ColliderBuilder::capsule_y(controller.height * 0.5, controller.radius)
            .collision_groups(self.layers.interaction_groups(controller.layer))
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(u128::from(controller.entity.0))
            .build();
        controller.body = Some(body);
        controller.collider = Some(self.colliders.insert_with_parent(
            collider,
            body,
            &mut self.bodies,
        ));
        controller.controller = KinematicCharacterController::default();
        self.controllers.push(controller);
    }

    pub fn destroy_controller(&mut self, entity: Entity) {
        if let Some(index) = self.controllers.iter().position(|c| c.entity == entity) {
            let controller = self.controllers.swap_remove(index);
            if let Some(body) = controller.body {
                self.bodies.remove(
                    body,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
            }
        }
    }

    pub fn controller_mut(&mut self, entity: Entity) -> Option<&mut CharacterController> {
        self.controllers.iter_mut().find(|c| c.entity == entity)
    }

    #[must_use]
    pub fn controller(&self, entity: Entity) -> Option<&CharacterController> {
        self.controllers.iter().find(|c| c.entity == entity)
    }

    /// Queues a controller displacement for the next update.
    pub fn move_controller(&mut self, entity: Entity, displacement: Vec3) {
        if let Some(controller) = self.controller_mut(entity) {
            controller.move_by(displacement);
        } else {
            warn!("move_controller on an entity without a controller");
        }
    }

    // ------------------------------------------------------------------------
    // Ragdolls
    // ------------------------------------------------------------------------

    pub fn create_ragdoll(&mut self, world: &World, entity: Entity) {
        let mut ragdoll = Ragdoll::new(entity);
        ragdoll.last_entity_tr = world.transform(entity);
        self.ragdolls.push(ragdoll);
    }

    pub fn destroy_ragdoll(&mut self, entity: Entity) {
        if let Some(index) = self.ragdolls.iter().position(|r| r.entity == entity) {
            let mut ragdoll = self.ragdolls.swap_remove(index);
            let mut ctx = RagdollPhysics {
                bodies: &mut self.bodies,
                colliders: &mut self.colliders,
                joints: &mut self.impulse_joints,
                multibody_joints: &mut self.multibody_joints,
                islands: &mut self.islands,
            };
            ragdoll.teardown(&mut ctx);
        }
    }

    #[must_use]
    pub fn ragdoll(&self, entity: Entity) -> Option<&Ragdoll> {
        self.ragdolls.iter().find(|r| r.entity == entity)
    }

    pub fn set_ragdoll_layer(&mut self, entity: Entity, layer: usize) {
        if let Some(ragdoll) = self.ragdolls.iter_mut().find(|r| r.entity == entity) {
            ragdoll.layer = layer;
        }
        self.reapply_collision_groups();
    }

    /// Adds a capsule body for one skeleton bone, splicing it into the
    /// ragdoll tree.
    pub fn create_ragdoll_bone(
        &mut self,
        world: &World,
        entity: Entity,
        pose_bone: usize,
    ) -> Option<BoneKey> {
        let index = self.ragdolls.iter().position(|r| r.entity == entity)?;
        let rig = world.rig(entity)?;
        let mut pose = rig.lock_pose();
        pose.compute_absolute(&rig.skeleton);

        let groups = self.layers.interaction_groups(self.ragdolls[index].layer);
        let entity_tr = world.transform(entity);
        let mut ctx = RagdollPhysics {
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            joints: &mut self.impulse_joints,
            multibody_joints: &mut self.multibody_joints,
            islands: &mut self.islands,
        };
        self.ragdolls[index].create_bone(&mut ctx, entity_tr, &rig.skeleton, &pose, pose_bone, groups)
    }

    pub fn destroy_ragdoll_bone(&mut self, entity: Entity, bone: BoneKey) {
        let Some(index) = self.ragdolls.iter().position(|r| r.entity == entity) else {
            return;
        };
        let mut ctx = RagdollPhysics {
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            joints: &mut self.impulse_joints,
            multibody_joints: &mut self.multibody_joints,
            islands: &mut self.islands,
        };
        self.ragdolls[index].destroy_bone(&mut ctx, bone);
    }

    /// Detaches a bone from its parent; its children move one level up.
    pub fn disconnect_ragdoll_bone(&mut self, entity: Entity, bone: BoneKey) {
        let Some(index) = self.ragdolls.iter().position(|r| r.entity == entity) else {
            return;
        };
        let mut ctx = RagdollPhysics {
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            joints: &mut self.impulse_joints,
            multibody_joints: &mut self.multibody_joints,
            islands: &mut self.islands,
        };
        self.ragdolls[index].disconnect(&mut ctx, bone);
    }

    /// Swaps the joint flavor between a bone and its parent.
    pub fn change_ragdoll_bone_joint(
        &mut self,
        entity: Entity,
        bone: BoneKey,
        kind: RagdollJointKind,
    ) {
        let Some(index) = self.ragdolls.iter().position(|r| r.entity == entity) else {
            return;
        };
        let mut ctx = RagdollPhysics {
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            joints: &mut self.impulse_joints,
            multibody_joints: &mut self.multibody_joints,
            islands: &mut self.islands,
        };
        self.ragdolls[index].change_joint(&mut ctx, bone, kind);
    }

    // ------------------------------------------------------------------------
    // Forces, queries, misc scripting surface
    // ------------------------------------------------------------------------

    /// Queues a force application for the next update.
    pub fn apply_force(&mut self, entity: Entity, force: Vec3) {
        self.queued_forces.push((entity, force));
    }

    /// Linear speed of a dynamic actor's body; `None` (with a warning) for
    /// static actors.
    #[must_use]
    pub fn actor_speed(&self, entity: Entity) -> Option<f32> {
        let actor = self.actors.iter().find(|a| a.entity == entity)?;
        if actor.dynamic_type != DynamicType::Dynamic {
            warn!("actor_speed on a non-dynamic actor");
            return None;
        }
        let body = self.bodies.get(actor.body?)?;
        Some(body.linvel().norm())
    }

    pub fn put_to_sleep(&mut self, entity: Entity) {
        let Some(actor) = self.actors.iter().find(|a| a.entity == entity) else {
            return;
        };
        if actor.dynamic_type != DynamicType::Dynamic {
            warn!("put_to_sleep on a non-dynamic actor");
            return;
        }
        if let Some(body) = actor.body.and_then(|h| self.bodies.get_mut(h)) {
            body.sleep();
        }
    }

    /// Closest hit along a ray, optionally ignoring one entity's colliders.
    #[must_use]
    pub fn raycast(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        ignore: Option<Entity>,
    ) -> Option<RaycastHit> {
        let ray = Ray::new(to_na_point(origin), to_na(direction));
        let predicate = |_: ColliderHandle, collider: &Collider| match ignore {
            Some(entity) => collider.user_data != u128::from(entity.0),
            None => true,
        };
        let filter = QueryFilter::default().predicate(&predicate);
        let (handle, hit) = self.queries.cast_ray_and_get_normal(
            &self.bodies,
            &self.colliders,
            &ray,
            max_distance,
            true,
            filter,
        )?;
        let collider = self.colliders.get(handle)?;
        Some(RaycastHit {
            entity: Entity(collider.user_data as u32),
            position: origin + direction * hit.toi,
            normal: from_na(hit.normal),
            distance: hit.toi,
        })
    }

    /// Re-syncs bodies after game code teleports an entity.
    pub fn on_entity_moved(&mut self, world: &World, entity: Entity) {
        let tr = world.transform(entity);
        if let Some(actor) = self.actors.iter().find(|a| a.entity == entity) {
            if let Some(body) = actor.body.and_then(|h| self.bodies.get_mut(h)) {
                match actor.dynamic_type {
                    DynamicType::Kinematic => body.set_next_kinematic_position(to_isometry(tr)),
                    _ => body.set_position(to_isometry(tr), true),
                }
            }
        }
        if let Some(index) = self.controllers.iter().position(|c| c.entity == entity) {
            let center = tr.pos + self.controllers[index].center_offset();
            if let Some(body) = self.controllers[index]
                .body
                .and_then(|h| self.bodies.get_mut(h))
            {
                body.set_position(Isometry::translation(center.x, center.y, center.z), true);
            }
        }
        if let Some(index) = self.ragdolls.iter().position(|r| r.entity == entity) {
            let old = self.ragdolls[index].last_entity_tr;
            self.ragdolls[index].follow_entity(&mut self.bodies, old, tr);
            self.ragdolls[index].last_entity_tr = tr;
        }
    }

    // ------------------------------------------------------------------------
    // Update pipeline
    // ------------------------------------------------------------------------

    pub fn update(&mut self, world: &mut World, dt: f32) {
        if !self.is_game_running {
            return;
        }
        self.contacts.clear();
        self.refresh_pending_colliders();
        let forced = self.apply_queued_forces();

        let dt = dt.min(MAX_TIMESTEP);
        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            None,
            &(),
            &self.collector,
        );
        self.queries.update(&self.bodies, &self.colliders);
        self.contacts.append(&mut self.collector.events.lock());

        // queued forces last one simulation frame
        for handle in forced {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.reset_forces(false);
            }
        }

        self.write_ragdoll_poses(world);
        self.sync_dynamic_actors(world);
        self.update_controllers(world, dt);
    }

    fn apply_queued_forces(&mut self) -> Vec<RigidBodyHandle> {
        let mut forced = Vec::new();
        for (entity, force) in self.queued_forces.drain(..) {
            let Some(actor) = self.actors.iter().find(|a| a.entity == entity) else {
                continue;
            };
            let Some(handle) = actor.body else {
                continue;
            };
            if let Some(body) = self.bodies.get_mut(handle) {
                body.add_force(to_na(force), true);
                forced.push(handle);
            }
        }
        forced
    }

    /// Simulated ragdoll bones override the animated pose.
    fn write_ragdoll_poses(&mut self, world: &World) {
        for ragdoll in &mut self.ragdolls {
            let Some(rig) = world.rig(ragdoll.entity) else {
                continue;
            };
            let entity_tr = world.transform(ragdoll.entity);
            ragdoll.last_entity_tr = entity_tr;
            let mut pose = rig.lock_pose();
            pose.compute_absolute(&rig.skeleton);
            ragdoll.write_pose(&self.bodies, entity_tr, &mut pose);
        }
    }

    fn sync_dynamic_actors(&mut self, world: &mut World) {
        for actor in &self.actors {
            if actor.dynamic_type != DynamicType::Dynamic {
                continue;
            }
            let Some(body) = actor.body.and_then(|h| self.bodies.get(h)) else {
                continue;
            };
            world.set_transform(actor.entity, from_isometry(body.position()));
        }
    }

    fn update_controllers(&mut self, world: &mut World, dt: f32) {
        for controller in &mut self.controllers {
            if controller.is_free {
                continue;
            }
            let (Some(body_handle), Some(collider_handle)) = (controller.body, controller.collider)
            else {
                continue;
            };
            let displacement = controller.take_displacement(dt);
            let shape_pos = *self.bodies[body_handle].position();
            let shape = self.colliders[collider_handle].shared_shape().clone();

            let movement = controller.controller.move_shape(
                dt,
                &self.bodies,
                &self.colliders,
                &self.queries,
                &*shape,
                &shape_pos,
                to_na(displacement),
                QueryFilter::default().exclude_rigid_body(body_handle),
                |_| {},
            );
            controller.set_grounded(movement.grounded);

            let new_center = from_na(shape_pos.translation.vector + movement.translation);
            self.bodies[body_handle].set_next_kinematic_position(Isometry::translation(
                new_center.x,
                new_center.y,
                new_center.z,
            ));
            // the entity sits at the feet
            world.set_position(controller.entity, new_center - controller.center_offset());
        }
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    pub fn serialize(&self, blob: &mut OutputBlob) -> Result<()> {
        blob.write_u32(PhysicsSceneVersion::Latest as u32);
        self.layers.serialize(blob)?;

        blob.write_u32(self.actors.len() as u32);
        for actor in &self.actors {
            blob.write_entity(actor.entity);
            blob.write_u8(match actor.dynamic_type {
                DynamicType::Static => 0,
                DynamicType::Dynamic => 1,
                DynamicType::Kinematic => 2,
            });
            blob.write_u32(actor.layer as u32);
            blob.write_bool(actor.is_trigger);
            match &actor.geometry {
                ActorGeometry::Box { half_extents } => {
                    blob.write_u8(0);
                    blob.write_vec3(*half_extents);
                }
                ActorGeometry::Sphere { radius } => {
                    blob.write_u8(1);
                    blob.write_f32(*radius);
                }
                ActorGeometry::Capsule {
                    radius,
                    half_height,
                } => {
                    blob.write_u8(2);
                    blob.write_f32(*radius);
                    blob.write_f32(*half_height);
                }
                ActorGeometry::Mesh { path } => {
                    blob.write_u8(3);
                    blob.write_path(path)?;
                }
            }
        }

        blob.write_u32(self.terrains.len() as u32);
        for terrain in &self.terrains {
            blob.write_entity(terrain.entity);
            blob.write_path(&terrain.heightmap_path)?;
            blob.write_f32(terrain.xz_scale);
            blob.write_f32(terrain.y_scale);
            blob.write_u32(terrain.layer as u32);
        }

        blob.write_u32(self.controllers.len() as u32);
        for controller in &self.controllers {
            blob.write_entity(controller.entity);
            blob.write_f32(controller.radius);
            blob.write_f32(controller.height);
            blob.write_u32(controller.layer as u32);
            blob.write_bool(controller.use_gravity);
            blob.write_bool(controller.is_free);
        }

        blob.write_u32(self.ragdolls.len() as u32);
        for ragdoll in &self.ragdolls {
            blob.write_entity(ragdoll.entity);
            blob.write_u32(ragdoll.layer as u32);
            ragdoll.serialize_bones(&self.bodies, ragdoll.last_entity_tr, blob);
        }

        blob.write_u32(self.joints.len() as u32);
        for joint in &self.joints {
            blob.write_entity(joint.entity);
            blob.write_u32(joint.connected_entity.map_or(u32::MAX, |e| e.0));
            blob.write_transform(&joint.local_frame0);
            match &joint.kind {
                JointKind::Spherical { limit } => {
                    blob.write_u8(0);
                    blob.write_bool(limit.is_some());
                    let (y, z) = limit.unwrap_or((0.0, 0.0));
                    blob.write_f32(y);
                    blob.write_f32(z);
                }
                JointKind::Hinge { limit } => {
                    blob.write_u8(1);
                    blob.write_bool(limit.is_some());
                    let (min, max) = limit.unwrap_or((0.0, 0.0));
                    blob.write_f32(min);
                    blob.write_f32(max);
                }
                JointKind::Fixed => blob.write_u8(2),
                JointKind::D6 {
                    motions,
                    linear_limit,
                    angular_limit,
                } => {
                    blob.write_u8(3);
                    for motion in motions {
                        blob.write_u8(match motion {
                            D6Motion::Locked => 0,
                            D6Motion::Limited => 1,
                            D6Motion::Free => 2,
                        });
                    }
                    blob.write_f32(*linear_limit);
                    blob.write_f32(*angular_limit);
                }
            }
        }
        Ok(())
    }

    pub fn deserialize(&mut self, world: &World, blob: &mut InputBlob<'_>) -> Result<()> {
        let version = blob.read_u32("physics scene version")?;
        if version > PhysicsSceneVersion::Latest as u32 {
            return Err(FableError::UnknownVersion(version));
        }
        self.clear();

        if version > PhysicsSceneVersion::Layers as u32 {
            self.layers.deserialize(blob)?;
        }

        let count = blob.read_u32("actor count")?;
        for _ in 0..count {
            let entity = blob.read_entity("actor entity")?;
            let dynamic_type = match blob.read_u8("actor dynamic type")? {
                0 => DynamicType::Static,
                1 => DynamicType::Dynamic,
                _ => DynamicType::Kinematic,
            };
            let layer = if version > PhysicsSceneVersion::Layers as u32 {
                blob.read_u32("actor layer")? as usize
            } else {
                0
            };
            let is_trigger = blob.read_bool("actor trigger flag")?;
            let geometry = match blob.read_u8("actor geometry tag")? {
                0 => ActorGeometry::Box {
                    half_extents: blob.read_vec3("box half extents")?,
                },
                1 => ActorGeometry::Sphere {
                    radius: blob.read_f32("sphere radius")?,
                },
                2 => ActorGeometry::Capsule {
                    radius: blob.read_f32("capsule radius")?,
                    half_height: blob.read_f32("capsule half height")?,
                },
                3 => ActorGeometry::Mesh {
                    path: blob.read_path("mesh geometry path")?,
                },
                _ => return Err(FableError::BlobOverrun("actor geometry tag")),
            };
            if let ActorGeometry::Mesh { path } = &geometry {
                self.geometries.begin_load(path);
            }
            let mut actor = RigidActor::new(entity, dynamic_type, geometry);
            actor.layer = layer;
            actor.is_trigger = is_trigger;
            self.realize_actor(world, &mut actor);
            self.actors.push(actor);
        }

        let count = blob.read_u32("terrain count")?;
        for _ in 0..count {
            let entity = blob.read_entity("terrain entity")?;
            let path = blob.read_path("heightmap path")?;
            let xz_scale = blob.read_f32("terrain xz scale")?;
            let y_scale = blob.read_f32("terrain y scale")?;
            let layer = if version > PhysicsSceneVersion::Layers as u32 {
                blob.read_u32("terrain layer")? as usize
            } else {
                0
            };
            self.create_terrain(world, entity, &path, xz_scale, y_scale);
            if let Some(terrain) = self.terrains.last_mut() {
                terrain.layer = layer;
            }
        }

        let count = blob.read_u32("controller count")?;
        for _ in 0..count {
            let entity = blob.read_entity("controller entity")?;
            let radius = blob.read_f32("controller radius")?;
            let height = blob.read_f32("controller height")?;
            let layer = if version > PhysicsSceneVersion::Layers as u32 {
                blob.read_u32("controller layer")? as usize
            } else {
                0
            };
            let use_gravity = blob.read_bool("controller gravity flag")?;
            let is_free = blob.read_bool("controller free flag")?;
            let mut controller = CharacterController::new(entity);
            controller.radius = radius;
            controller.height = height;
            controller.layer = layer;
            controller.use_gravity = use_gravity;
            controller.is_free = is_free;
            self.spawn_controller(world, controller);
        }

        if version > PhysicsSceneVersion::Ragdolls as u32 {
            let count = blob.read_u32("ragdoll count")?;
            for _ in 0..count {
                let entity = blob.read_entity("ragdoll entity")?;
                let layer = blob.read_u32("ragdoll layer")? as usize;
                let mut ragdoll = Ragdoll::new(entity);
                ragdoll.layer = layer;
                ragdoll.last_entity_tr = world.transform(entity);
                let groups = self.layers.interaction_groups(layer);
                let mut ctx = RagdollPhysics {
                    bodies: &mut self.bodies,
                    colliders: &mut self.colliders,
                    joints: &mut self.impulse_joints,
                    multibody_joints: &mut self.multibody_joints,
                    islands: &mut self.islands,
                };
                ragdoll.deserialize_bones(&mut ctx, ragdoll.last_entity_tr, groups, blob)?;
                self.ragdolls.push(ragdoll);
            }
        }

        if version > PhysicsSceneVersion::JointRefactor as u32 {
            let count = blob.read_u32("joint count")?;
            for _ in 0..count {
                let entity = blob.read_entity("joint entity")?;
                let connected = blob.read_u32("joint connected entity")?;
                let local_frame0 = blob.read_transform("joint frame")?;
                let kind = match blob.read_u8("joint kind")? {
                    0 => {
                        let has_limit = blob.read_bool("joint limit flag")?;
                        let y = blob.read_f32("joint limit")?;
                        let z = blob.read_f32("joint limit")?;
                        JointKind::Spherical {
                            limit: has_limit.then_some((y, z)),
                        }
                    }
                    1 => {
                        let has_limit = blob.read_bool("joint limit flag")?;
                        let min = blob.read_f32("joint limit")?;
                        let max = blob.read_f32("joint limit")?;
                        JointKind::Hinge {
                            limit: has_limit.then_some((min, max)),
                        }
                    }
                    2 => JointKind::Fixed,
                    3 => {
                        let mut motions = [D6Motion::Locked; 6];
                        for motion in &mut motions {
                            *motion = match blob.read_u8("d6 motion")? {
                                0 => D6Motion::Locked,
                                1 => D6Motion::Limited,
                                _ => D6Motion::Free,
                            };
                        }
                        JointKind::D6 {
                            motions,
                            linear_limit: blob.read_f32("d6 linear limit")?,
                            angular_limit: blob.read_f32("d6 angular limit")?,
                        }
                    }
                    _ => return Err(FableError::BlobOverrun("joint kind")),
                };
                let mut joint = Joint::new(entity, kind);
                joint.connected_entity = (connected != u32::MAX).then_some(Entity(connected));
                joint.local_frame0 = local_frame0;
                self.joints.push(joint);
            }
        }
        self.reapply_collision_groups();
        Ok(())
    }

    /// Drops every component and resets the simulation sets.
    fn clear(&mut self) {
        self.bodies = RigidBodySet::new();
        self.colliders = ColliderSet::new();
        self.impulse_joints = ImpulseJointSet::new();
        self.multibody_joints = MultibodyJointSet::new();
        self.islands = IslandManager::new();
        self.broad_phase = BroadPhase::new();
        self.narrow_phase = NarrowPhase::new();
        self.queries = QueryPipeline::new();
        self.actors.clear();
        self.joints.clear();
        self.controllers.clear();
        self.terrains.clear();
        self.ragdolls.clear();
        self.contacts.clear();
        self.queued_forces.clear();
    }
}
