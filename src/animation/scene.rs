//! Animation Scene
//!
//! Owns every animation component and runs the per-tick pipeline:
//!
//! 1. clear the event stream
//! 2. sample animables in parallel batches
//! 3. advance property animators
//! 4. update animator components in array order (lazy runtime init, graph
//!    update, pose fill, IK)
//! 5. mirror shared animators from their source entity
//! 6. process deferred `set_input` events
//!
//! Animator runtimes are rebuilt lazily: the scene polls resource storage
//! generations each tick and tears a runtime down when its controller is
//! gone, replaced or no longer ready, so hot reload needs no callbacks.

use std::sync::Arc;

use log::warn;
use rayon::prelude::*;

use crate::animation::clip::AnimationClip;
use crate::animation::controller::{ControllerResource, InputType, InputValue, write_input};
use crate::animation::ik::{IkChain, MAX_IK_CHAINS, solve_chain};
use crate::animation::nodes::{AnimSet, NodeInstance, RunningContext};
use crate::animation::property::{PropertyAnimation, PropertyAnimatorFlags, TargetProperty};
use crate::errors::{FableError, Result};
use crate::events::{EventStream, SET_INPUT_EVENT, SetInputPayload};
use crate::resources::{ResourceServer, ResourceStorage};
use crate::utils::blob::{InputBlob, OutputBlob};
use crate::utils::hash::name_hash;
use crate::world::{Entity, Transform, World};

/// Resolves one animation set to ready clips; `None` while any clip of the
/// set is still loading or failed. A controller with no sets yields an empty
/// map for set 0.
fn build_anim_set(
    resource: &ControllerResource,
    set_index: usize,
    clips: &ResourceStorage<AnimationClip>,
) -> Option<AnimSet> {
    let Some(set) = resource.sets.get(set_index) else {
        return (set_index == 0 && resource.sets.is_empty()).then(AnimSet::default);
    };
    let mut anim_set = AnimSet::default();
    for (slot, path) in &set.clips {
        anim_set.insert(*slot, clips.get(path)?);
    }
    Some(anim_set)
}

/// Stream format versions of the animation scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum AnimationSceneVersion {
    SharedController = 0,
    PropertyAnimator = 1,
    Latest = 2,
}

const MAX_SAMPLE_BATCHES: usize = 16;

// ============================================================================
// Components
// ============================================================================

/// Plays one clip on a rigged entity, no controller involved.
#[derive(Debug, Clone)]
pub struct Animable {
    pub entity: Entity,
    pub clip_path: String,
    pub time: f32,
    /// Playback speed multiplier.
    pub time_scale: f32,
    /// Cursor position playback begins at; game code resetting the animable
    /// rewinds `time` to this.
    pub start_time: f32,
}

/// Drives entity position/scale components from a property animation.
#[derive(Debug, Clone)]
pub struct PropertyAnimator {
    pub entity: Entity,
    pub path: String,
    pub flags: PropertyAnimatorFlags,
    pub time: f32,
}

/// Live state of an initialized animator.
struct AnimatorRuntime {
    resource: Arc<ControllerResource>,
    root: Option<NodeInstance>,
    input: Vec<u8>,
    anim_set: AnimSet,
    active_set: usize,
    clips_generation: u64,
    last_root_motion: Transform,
}

/// Controller-driven animator component. The runtime half is rebuilt lazily
/// whenever the controller resource or its clips change.
pub struct Animator {
    pub entity: Entity,
    pub path: String,
    /// Name hash of the animation set applied at init; 0 selects set 0.
    pub default_set: u32,
    pub use_root_motion: bool,
    pub ik: [IkChain; MAX_IK_CHAINS],
    runtime: Option<AnimatorRuntime>,
}

/// Mirrors the pose produced by `source`'s animator onto this entity.
#[derive(Debug, Clone)]
pub struct SharedAnimator {
    pub entity: Entity,
    pub source: Entity,
}

// ============================================================================
// Scene
// ============================================================================

/// The scene-level animation system.
pub struct AnimationScene {
    clips: Arc<ResourceStorage<AnimationClip>>,
    controllers: Arc<ResourceStorage<ControllerResource>>,
    property_animations: Arc<ResourceStorage<PropertyAnimation>>,
    animables: Vec<Animable>,
    property_animators: Vec<PropertyAnimator>,
    animators: Vec<Animator>,
    shared_animators: Vec<SharedAnimator>,
    events: EventStream,
    is_game_running: bool,
}

impl AnimationScene {
    #[must_use]
    pub fn new(server: &ResourceServer) -> Self {
        Self {
            clips: Arc::clone(&server.clips),
            controllers: Arc::clone(&server.controllers),
            property_animations: Arc::clone(&server.property_animations),
            animables: Vec::new(),
            property_animators: Vec::new(),
            animators: Vec::new(),
            shared_animators: Vec::new(),
            events: EventStream::new(),
            is_game_running: false,
        }
    }

    pub fn start_game(&mut self) {
        self.is_game_running = true;
    }

    /// Stops simulation and drops all animator runtimes; they re-initialize
    /// on the next started tick.
    pub fn stop_game(&mut self) {
        self.is_game_running = false;
        for animator in &mut self.animators {
            animator.runtime = None;
        }
    }

    /// Events produced by the last update; valid until the next update.
    #[must_use]
    pub fn events(&self) -> &EventStream {
        &self.events
    }

    // ------------------------------------------------------------------------
    // Component management
    // ------------------------------------------------------------------------

    pub fn create_animable(&mut self, entity: Entity, clip_path: &str) {
        self.animables.push(Animable {
            entity,
            clip_path: clip_path.to_string(),
            time: 0.0,
            time_scale: 1.0,
            start_time: 0.0,
        });
    }

    pub fn destroy_animable(&mut self, entity: Entity) {
        self.animables.retain(|a| a.entity != entity);
    }

    #[must_use]
    pub fn animable(&self, entity: Entity) -> Option<&Animable> {
        self.animables.iter().find(|a| a.entity == entity)
    }

    pub fn animable_mut(&mut self, entity: Entity) -> Option<&mut Animable> {
        self.animables.iter_mut().find(|a| a.entity == entity)
    }

    pub fn create_property_animator(
        &mut self,
        entity: Entity,
        path: &str,
        flags: PropertyAnimatorFlags,
    ) {
        self.property_animators.push(PropertyAnimator {
            entity,
            path: path.to_string(),
            flags,
            time: 0.0,
        });
    }

    pub fn destroy_property_animator(&mut self, entity: Entity) {
        self.property_animators.retain(|a| a.entity != entity);
    }

    pub fn property_animator_mut(&mut self, entity: Entity) -> Option<&mut PropertyAnimator> {
        self.property_animators
            .iter_mut()
            .find(|a| a.entity == entity)
    }

    pub fn create_animator(&mut self, entity: Entity, path: &str) {
        self.animators.push(Animator {
            entity,
            path: path.to_string(),
            default_set: 0,
            use_root_motion: false,
            ik: std::array::from_fn(|_| IkChain::default()),
            runtime: None,
        });
    }

    pub fn destroy_animator(&mut self, entity: Entity) {
        self.animators.retain(|a| a.entity != entity);
    }

    /// Swaps an animator's controller path; the runtime is dropped and
    /// re-initialized once the new controller is ready.
    pub fn set_animator_source(&mut self, entity: Entity, path: &str) {
        if let Some(animator) = self.animator_mut(entity) {
            animator.path = path.to_string();
            animator.runtime = None;
        }
    }

    #[must_use]
    pub fn animator(&self, entity: Entity) -> Option<&Animator> {
        self.animators.iter().find(|a| a.entity == entity)
    }

    pub fn animator_mut(&mut self, entity: Entity) -> Option<&mut Animator> {
        self.animators.iter_mut().find(|a| a.entity == entity)
    }

    pub fn create_shared_animator(&mut self, entity: Entity, source: Entity) {
        self.shared_animators.push(SharedAnimator { entity, source });
    }

    pub fn destroy_shared_animator(&mut self, entity: Entity) {
        self.shared_animators.retain(|a| a.entity != entity);
    }

    // ------------------------------------------------------------------------
    // Scripting surface
    // ------------------------------------------------------------------------

    /// Index of a controller input by name, once the runtime exists.
    #[must_use]
    pub fn input_index(&self, entity: Entity, name: &str) -> Option<usize> {
        let runtime = self.animator(entity)?.runtime.as_ref()?;
        runtime.resource.input_decl.index_of(name_hash(name))
    }

    pub fn set_input(&mut self, entity: Entity, index: usize, value: InputValue) {
        let Some(runtime) = self
            .animator_mut(entity)
            .and_then(|a| a.runtime.as_mut())
        else {
            warn!("set_input on an entity without an initialized animator");
            return;
        };
        if !write_input(&runtime.resource.input_decl, &mut runtime.input, index, value) {
            warn!("set_input with a bad index or mismatched type");
        }
    }

    #[must_use]
    pub fn input(&self, entity: Entity, index: usize) -> Option<InputValue> {
        let runtime = self.animator(entity)?.runtime.as_ref()?;
        crate::animation::controller::read_input(
            &runtime.resource.input_decl,
            &runtime.input,
            index,
        )
    }

    /// Retargets one IK chain; `target` is in entity-local space.
    pub fn set_ik_target(&mut self, entity: Entity, chain: usize, target: glam::Vec3) {
        if let Some(animator) = self.animator_mut(entity) {
            if let Some(slot) = animator.ik.get_mut(chain) {
                slot.target = target;
                return;
            }
        }
        warn!("set_ik_target on a missing animator or chain");
    }

    pub fn set_ik_weight(&mut self, entity: Entity, chain: usize, weight: f32) {
        if let Some(animator) = self.animator_mut(entity) {
            if let Some(slot) = animator.ik.get_mut(chain) {
                slot.weight = weight;
                return;
            }
        }
        warn!("set_ik_weight on a missing animator or chain");
    }

    pub fn ik_chain_mut(&mut self, entity: Entity, chain: usize) -> Option<&mut IkChain> {
        self.animator_mut(entity)?.ik.get_mut(chain)
    }

    /// Switches the animator to a named animation set. Applies immediately
    /// when the runtime exists; otherwise takes effect at init.
    pub fn apply_animation_set(&mut self, entity: Entity, set_name: &str) {
        let clips = Arc::clone(&self.clips);
        let Some(animator) = self.animator_mut(entity) else {
            warn!("apply_animation_set on an entity without an animator");
            return;
        };
        let hash = name_hash(set_name);
        animator.default_set = hash;
        if let Some(runtime) = &mut animator.runtime {
            if let Some(index) = runtime.resource.set_by_hash(hash) {
                if let Some(set) = build_anim_set(&runtime.resource, index, &clips) {
                    runtime.active_set = index;
                    runtime.anim_set = set;
                    runtime.clips_generation = clips.generation();
                }
            } else {
                warn!("animation set '{set_name}' does not exist in the controller");
            }
        }
    }

    pub fn set_use_root_motion(&mut self, entity: Entity, value: bool) {
        if let Some(animator) = self.animator_mut(entity) {
            animator.use_root_motion = value;
        }
    }

    /// Root-motion delta produced by the last update of this animator.
    #[must_use]
    pub fn root_motion(&self, entity: Entity) -> Transform {
        self.animator(entity)
            .and_then(|a| a.runtime.as_ref())
            .map_or(Transform::IDENTITY, |rt| rt.last_root_motion)
    }

    // ------------------------------------------------------------------------
    // Update pipeline
    // ------------------------------------------------------------------------

    pub fn update(&mut self, world: &mut World, dt: f32) {
        if !self.is_game_running {
            return;
        }
        self.events.clear();
        self.update_animables(world, dt);
        self.update_property_animators(world, dt);
        self.update_animators(world, dt);
        self.update_shared_animators(world);
        self.process_events();
    }

    /// Samples animables into their pose buffers, in parallel batches. Each
    /// animable owns its entity's pose lock for the duration of the stage.
    fn update_animables(&mut self, world: &World, dt: f32) {
        struct Item {
            pose: Arc<parking_lot::Mutex<crate::skeleton::Pose>>,
            skeleton: Arc<crate::skeleton::Skeleton>,
            clip: Arc<AnimationClip>,
            time: f32,
        }

        let mut items = Vec::new();
        for animable in &mut self.animables {
            let Some(clip) = self.clips.get(&animable.clip_path) else {
                continue;
            };
            let Some(rig) = world.rig(animable.entity) else {
                continue;
            };
            let mut time = animable.time + dt * animable.time_scale;
            if clip.length > 0.0 {
                while time > clip.length {
                    time -= clip.length;
                }
            } else {
                time = 0.0;
            }
            animable.time = time;
            items.push(Item {
                pose: rig.pose_handle(),
                skeleton: Arc::clone(&rig.skeleton),
                clip,
                time,
            });
        }

        if items.is_empty() {
            return;
        }
        let batch = items.len().div_ceil(MAX_SAMPLE_BATCHES).max(1);
        items.par_iter().with_min_len(batch).for_each(|item| {
            let mut pose = item.pose.lock();
            item.skeleton.fill_relative_bind_pose(&mut pose);
            item.clip
                .sample_pose(item.time, &item.skeleton, &mut pose, 1.0);
            pose.compute_absolute(&item.skeleton);
        });
    }

    fn update_property_animators(&mut self, world: &mut World, dt: f32) {
        for animator in &mut self.property_animators {
            let Some(animation) = self.property_animations.get(&animator.path) else {
                continue;
            };
            animator.time += dt;
            let looped = animator.flags.contains(PropertyAnimatorFlags::LOOPED);
            let frame = animation.frame_at(animator.time, looped);

            let mut pos = world.transform(animator.entity).pos;
            let mut scale = world.scale(animator.entity);
            for curve in &animation.curves {
                let value = curve.evaluate(frame);
                match curve.target {
                    TargetProperty::PositionX => pos.x = value,
                    TargetProperty::PositionY => pos.y = value,
                    TargetProperty::PositionZ => pos.z = value,
                    TargetProperty::ScaleX => scale.x = value,
                    TargetProperty::ScaleY => scale.y = value,
                    TargetProperty::ScaleZ => scale.z = value,
                }
            }
            world.set_position(animator.entity, pos);
            world.set_scale(animator.entity, scale);
        }
    }

    fn update_animators(&mut self, world: &mut World, dt: f32) {
        for index in 0..self.animators.len() {
            self.refresh_animator_runtime(index);

            let animator = &mut self.animators[index];
            let Some(runtime) = &mut animator.runtime else {
                continue;
            };
            let Some(root) = runtime.root.take() else {
                continue;
            };

            let resource = Arc::clone(&runtime.resource);
            let input = runtime.input.clone();
            let anim_set = runtime.anim_set.clone();
            let mut ctx = RunningContext {
                dt,
                input: &input,
                anim_set: &anim_set,
                events: &mut self.events,
                entity: animator.entity,
            };
            let root = root.update(&resource, &mut ctx, true);

            runtime.last_root_motion = root.root_motion(&resource, &runtime.anim_set);
            if animator.use_root_motion {
                let delta = runtime.last_root_motion;
                let mut tr = world.transform(animator.entity);
                tr.pos += tr.rot * delta.pos;
                tr.rot *= delta.rot;
                world.set_transform(animator.entity, tr);
            }

            if let Some(rig) = world.rig(animator.entity) {
                let mut pose = rig.lock_pose();
                rig.skeleton.fill_relative_bind_pose(&mut pose);
                root.fill_pose(
                    &runtime.resource,
                    &runtime.anim_set,
                    &runtime.input,
                    &rig.skeleton,
                    &mut pose,
                    1.0,
                );
                pose.compute_absolute(&rig.skeleton);
                for chain in &animator.ik {
                    if chain.weight <= 0.0 {
                        break;
                    }
                    solve_chain(chain, &rig.skeleton, &mut pose);
                }
            }
            runtime.root = Some(root);
        }
    }

    /// Tears down a stale runtime and lazily initializes a fresh one when
    /// the controller and all clips of the selected set are ready.
    fn refresh_animator_runtime(&mut self, index: usize) {
        let clips = Arc::clone(&self.clips);
        let animator = &mut self.animators[index];

        let Some(resource) = self.controllers.get(&animator.path) else {
            animator.runtime = None;
            return;
        };
        let mut teardown = false;
        let mut stale_set = None;
        if let Some(runtime) = &animator.runtime {
            if Arc::ptr_eq(&runtime.resource, &resource) {
                if runtime.clips_generation != clips.generation() {
                    stale_set = Some(runtime.active_set);
                }
            } else {
                teardown = true;
            }
        }
        if teardown {
            animator.runtime = None;
        } else if let Some(active) = stale_set {
            // a clip changed somewhere; rebuild the set or tear down
            match build_anim_set(&resource, active, &clips) {
                Some(set) => {
                    if let Some(runtime) = &mut animator.runtime {
                        runtime.anim_set = set;
                        runtime.clips_generation = clips.generation();
                    }
                }
                None => animator.runtime = None,
            }
        }
        if animator.runtime.is_some() {
            return;
        }

        // a controller without declared inputs cannot drive anything
        if resource.input_decl.is_empty() {
            warn!("controller '{}' declares no inputs", animator.path);
            return;
        }
        let set_index = if animator.default_set == 0 {
            0
        } else {
            resource.set_by_hash(animator.default_set).unwrap_or(0)
        };
        let Some(anim_set) = build_anim_set(&resource, set_index, &clips) else {
            return;
        };
        let input = vec![0u8; resource.input_decl.size()];
        let root = resource
            .root
            .map(|id| NodeInstance::instantiate(&resource, id));
        animator.runtime = Some(AnimatorRuntime {
            root,
            input,
            anim_set,
            active_set: set_index,
            clips_generation: clips.generation(),
            last_root_motion: Transform::IDENTITY,
            resource,
        });
    }

    /// Copies the pose computed by each shared animator's source entity.
    fn update_shared_animators(&mut self, world: &World) {
        for shared in &self.shared_animators {
            let Some(source_animator) = self.animators.iter().find(|a| a.entity == shared.source)
            else {
                continue;
            };
            let Some(runtime) = &source_animator.runtime else {
                continue;
            };
            let Some(root) = &runtime.root else {
                continue;
            };
            let Some(rig) = world.rig(shared.entity) else {
                continue;
            };
            let mut pose = rig.lock_pose();
            rig.skeleton.fill_relative_bind_pose(&mut pose);
            root.fill_pose(
                &runtime.resource,
                &runtime.anim_set,
                &runtime.input,
                &rig.skeleton,
                &mut pose,
                1.0,
            );
            pose.compute_absolute(&rig.skeleton);
        }
    }

    /// Applies deferred `set_input` records. The stream itself stays intact
    /// so game code can read user events until the next update.
    fn process_events(&mut self) {
        let events = std::mem::take(&mut self.events);
        for record in &events {
            if record.type_hash != SET_INPUT_EVENT {
                continue;
            }
            let Some(payload) = SetInputPayload::decode(record.payload) else {
                continue;
            };
            let Some(runtime) = self
                .animators
                .iter_mut()
                .find(|a| a.entity == record.owner)
                .and_then(|a| a.runtime.as_mut())
            else {
                continue;
            };
            let index = payload.input_index as usize;
            let Some(slot) = runtime.resource.input_decl.slot(index) else {
                continue;
            };
            let value = match (slot.ty, payload.value) {
                (InputType::Bool, [v, ..]) => InputValue::Bool(*v != 0),
                (InputType::Int, bytes) if bytes.len() >= 4 => {
                    InputValue::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap()))
                }
                (InputType::Float, bytes) if bytes.len() >= 4 => {
                    InputValue::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap()))
                }
                _ => continue,
            };
            write_input(
                &runtime.resource.input_decl,
                &mut runtime.input,
                index,
                value,
            );
        }
        self.events = events;
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Writes every component to the blob, prefixed by the stream version.
    pub fn serialize(&self, blob: &mut OutputBlob) -> Result<()> {
        blob.write_u32(AnimationSceneVersion::Latest as u32);

        blob.write_u32(self.animables.len() as u32);
        for animable in &self.animables {
            blob.write_entity(animable.entity);
            blob.write_f32(animable.time);
            blob.write_f32(animable.time_scale);
            blob.write_f32(animable.start_time);
            blob.write_path(&animable.clip_path)?;
        }

        blob.write_u32(self.property_animators.len() as u32);
        for animator in &self.property_animators {
            blob.write_entity(animator.entity);
            blob.write_path(&animator.path)?;
            blob.write_u32(animator.flags.bits());
            blob.write_f32(animator.time);
        }

        blob.write_u32(self.animators.len() as u32);
        for animator in &self.animators {
            blob.write_entity(animator.entity);
            blob.write_path(&animator.path)?;
            blob.write_u32(animator.default_set);
            blob.write_bool(animator.use_root_motion);
        }

        blob.write_u32(self.shared_animators.len() as u32);
        for shared in &self.shared_animators {
            blob.write_entity(shared.entity);
            blob.write_entity(shared.source);
        }
        Ok(())
    }

    /// Restores components from a blob written by any supported version.
    pub fn deserialize(&mut self, blob: &mut InputBlob<'_>) -> Result<()> {
        let version = blob.read_u32("animation scene version")?;
        if version > AnimationSceneVersion::Latest as u32 {
            return Err(FableError::UnknownVersion(version));
        }

        self.animables.clear();
        let count = blob.read_u32("animable count")?;
        for _ in 0..count {
            let entity = blob.read_entity("animable entity")?;
            let time = blob.read_f32("animable time")?;
            let time_scale = blob.read_f32("animable time scale")?;
            let start_time = blob.read_f32("animable start time")?;
            let path = blob.read_path("animable clip path")?;
            self.clips.begin_load(&path);
            self.animables.push(Animable {
                entity,
                clip_path: path,
                time,
                time_scale,
                start_time,
            });
        }

        self.property_animators.clear();
        if version >= AnimationSceneVersion::PropertyAnimator as u32 {
            let count = blob.read_u32("property animator count")?;
            for _ in 0..count {
                let entity = blob.read_entity("property animator entity")?;
                let path = blob.read_path("property animation path")?;
                let flags = PropertyAnimatorFlags::from_bits_truncate(
                    blob.read_u32("property animator flags")?,
                );
                let time = blob.read_f32("property animator time")?;
                self.property_animators.push(PropertyAnimator {
                    entity,
                    path,
                    flags,
                    time,
                });
            }
        }

        self.animators.clear();
        let count = blob.read_u32("animator count")?;
        for _ in 0..count {
            let entity = blob.read_entity("animator entity")?;
            let path = blob.read_path("controller path")?;
            let default_set = if version > AnimationSceneVersion::SharedController as u32 {
                blob.read_u32("animator default set")?
            } else {
                0
            };
            let use_root_motion = blob.read_bool("animator root motion flag")?;
            self.animators.push(Animator {
                entity,
                path,
                default_set,
                use_root_motion,
                ik: std::array::from_fn(|_| IkChain::default()),
                runtime: None,
            });
        }

        self.shared_animators.clear();
        let count = blob.read_u32("shared animator count")?;
        for _ in 0..count {
            let entity = blob.read_entity("shared animator entity")?;
            let source = blob.read_entity("shared animator source")?;
            self.shared_animators.push(SharedAnimator { entity, source });
        }
        Ok(())
    }
}
