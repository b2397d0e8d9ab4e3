//! Resource Server
//!
//! Owns one [`ResourceStorage`] per resource kind and a background loader
//! thread fed over a flume channel. Load requests are fire-and-forget; the
//! loader reads and parses JSON descriptions off the game thread and sends
//! completions back, which [`ResourceServer::poll`] drains once per tick.
//!
//! Controllers reference clips through their animation sets, so a parsed
//! controller is held back until every referenced clip has finished loading;
//! only then does it flip to `Ready`. A failed clip fails the controller.
//!
//! The loader thread exits when the server (and with it the request sender)
//! is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use glam::{Quat, Vec3};
use log::warn;
use serde::Deserialize;

use crate::animation::clip::{AnimationClip, BoneTrack};
use crate::animation::controller::{
    AnimationSet, CompareOp, Condition, ControllerResource, GraphNode, InputDecl, InputType,
    InputValue, NodeId, TimedEvent, TimedEventKind, TransitionDesc,
};
use crate::animation::property::{PropertyAnimation, PropertyCurve, TargetProperty};
use crate::errors::{FableError, Result};
use crate::resources::storage::ResourceStorage;
use crate::resources::{ConvexGeometry, Heightmap};
use crate::utils::hash::name_hash;
use crate::world::Transform;

// ============================================================================
// JSON descriptions
// ============================================================================

#[derive(Deserialize)]
struct TrackDesc {
    bone: String,
    times: Vec<f32>,
    positions: Vec<[f32; 3]>,
    rotations: Vec<[f32; 4]>,
}

#[derive(Deserialize, Default)]
struct RootMotionDesc {
    position: [f32; 3],
    rotation: [f32; 4],
}

#[derive(Deserialize)]
struct ClipDesc {
    name: String,
    tracks: Vec<TrackDesc>,
    root_motion: Option<RootMotionDesc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum InputTypeDesc {
    Bool,
    Int,
    Float,
}

#[derive(Deserialize)]
struct InputDesc {
    name: String,
    #[serde(rename = "type")]
    ty: InputTypeDesc,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum CompareOpDesc {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ConditionDesc {
    Always,
    Bool {
        input: String,
        value: bool,
    },
    IntCompare {
        input: String,
        op: CompareOpDesc,
        value: i32,
    },
    FloatCompare {
        input: String,
        op: CompareOpDesc,
        value: f32,
    },
    Not {
        inner: Box<ConditionDesc>,
    },
    And {
        lhs: Box<ConditionDesc>,
        rhs: Box<ConditionDesc>,
    },
    Or {
        lhs: Box<ConditionDesc>,
        rhs: Box<ConditionDesc>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EventKindDesc {
    SetInput { input: String, value: serde_json::Value },
    User { event: String },
}

#[derive(Deserialize)]
struct EventDesc {
    time: f32,
    #[serde(flatten)]
    kind: EventKindDesc,
}

#[derive(Deserialize)]
struct TransitionJsonDesc {
    from: usize,
    to: usize,
    condition: ConditionDesc,
    #[serde(default)]
    blend_length: f32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeDesc {
    Clip {
        slot: String,
        #[serde(default)]
        looped: bool,
        #[serde(default)]
        events: Vec<EventDesc>,
    },
    Blend1d {
        input: String,
        children: Vec<(f32, usize)>,
    },
    StateMachine {
        states: Vec<usize>,
        default_state: usize,
        #[serde(default)]
        transitions: Vec<TransitionJsonDesc>,
    },
}

#[derive(Deserialize)]
struct SetDesc {
    name: String,
    clips: std::collections::BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ControllerDesc {
    name: String,
    #[serde(default)]
    inputs: Vec<InputDesc>,
    nodes: Vec<NodeDesc>,
    root: Option<usize>,
    #[serde(default)]
    sets: Vec<SetDesc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TargetDesc {
    PositionX,
    PositionY,
    PositionZ,
    ScaleX,
    ScaleY,
    ScaleZ,
}

#[derive(Deserialize)]
struct CurveDesc {
    target: TargetDesc,
    frames: Vec<i32>,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct PropertyAnimationDesc {
    fps: f32,
    curves: Vec<CurveDesc>,
}

#[derive(Deserialize)]
struct HeightmapDesc {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GeometryDesc {
    points: Vec<[f32; 3]>,
}

// ============================================================================
// Desc -> resource conversion
// ============================================================================

fn parse_error(path: &str, message: impl Into<String>) -> FableError {
    FableError::ResourceParse {
        path: path.to_string(),
        message: message.into(),
    }
}

fn build_clip(path: &str, desc: ClipDesc) -> Result<AnimationClip> {
    let mut tracks = Vec::with_capacity(desc.tracks.len());
    for track in desc.tracks {
        if track.times.len() != track.positions.len() || track.times.len() != track.rotations.len()
        {
            return Err(parse_error(
                path,
                format!("track '{}' has mismatched keyframe arrays", track.bone),
            ));
        }
        if track.times.is_empty() {
            return Err(parse_error(
                path,
                format!("track '{}' has no keyframes", track.bone),
            ));
        }
        tracks.push(BoneTrack {
            bone_hash: name_hash(&track.bone),
            times: track.times,
            positions: track.positions.into_iter().map(Vec3::from).collect(),
            rotations: track
                .rotations
                .into_iter()
                .map(Quat::from_array)
                .collect(),
        });
    }
    let root_motion = desc.root_motion.map_or(Transform::IDENTITY, |rm| {
        Transform::new(Vec3::from(rm.position), Quat::from_array(rm.rotation))
    });
    Ok(AnimationClip::new(desc.name, tracks, root_motion))
}

impl From<CompareOpDesc> for CompareOp {
    fn from(op: CompareOpDesc) -> Self {
        match op {
            CompareOpDesc::Eq => CompareOp::Eq,
            CompareOpDesc::Ne => CompareOp::Ne,
            CompareOpDesc::Lt => CompareOp::Lt,
            CompareOpDesc::Le => CompareOp::Le,
            CompareOpDesc::Gt => CompareOp::Gt,
            CompareOpDesc::Ge => CompareOp::Ge,
        }
    }
}

fn build_condition(path: &str, decl: &InputDecl, desc: ConditionDesc) -> Result<Condition> {
    let resolve = |name: &str| -> Result<usize> {
        decl.index_of(name_hash(name))
            .ok_or_else(|| parse_error(path, format!("condition references unknown input '{name}'")))
    };
    Ok(match desc {
        ConditionDesc::Always => Condition::Always,
        ConditionDesc::Bool { input, value } => Condition::BoolInput {
            index: resolve(&input)?,
            value,
        },
        ConditionDesc::IntCompare { input, op, value } => Condition::IntCompare {
            index: resolve(&input)?,
            op: op.into(),
            value,
        },
        ConditionDesc::FloatCompare { input, op, value } => Condition::FloatCompare {
            index: resolve(&input)?,
            op: op.into(),
            value,
        },
        ConditionDesc::Not { inner } => {
            Condition::Not(Box::new(build_condition(path, decl, *inner)?))
        }
        ConditionDesc::And { lhs, rhs } => Condition::And(
            Box::new(build_condition(path, decl, *lhs)?),
            Box::new(build_condition(path, decl, *rhs)?),
        ),
        ConditionDesc::Or { lhs, rhs } => Condition::Or(
            Box::new(build_condition(path, decl, *lhs)?),
            Box::new(build_condition(path, decl, *rhs)?),
        ),
    })
}

fn build_event(path: &str, decl: &InputDecl, desc: EventDesc) -> Result<TimedEvent> {
    let kind = match desc.kind {
        EventKindDesc::SetInput { input, value } => {
            let index = decl
                .index_of(name_hash(&input))
                .ok_or_else(|| parse_error(path, format!("event targets unknown input '{input}'")))?;
            let slot = decl.slot(index).map(|s| s.ty);
            let value = match (slot, value) {
                (Some(InputType::Bool), serde_json::Value::Bool(v)) => InputValue::Bool(v),
                (Some(InputType::Int), serde_json::Value::Number(n)) => {
                    InputValue::Int(n.as_i64().unwrap_or(0) as i32)
                }
                (Some(InputType::Float), serde_json::Value::Number(n)) => {
                    InputValue::Float(n.as_f64().unwrap_or(0.0) as f32)
                }
                _ => {
                    return Err(parse_error(
                        path,
                        format!("event value does not match type of input '{input}'"),
                    ));
                }
            };
            TimedEventKind::SetInput {
                input_index: index as u32,
                value,
            }
        }
        EventKindDesc::User { event } => TimedEventKind::User {
            type_hash: name_hash(&event),
            payload: Vec::new(),
        },
    };
    Ok(TimedEvent {
        time: desc.time,
        kind,
    })
}

fn build_controller(path: &str, desc: ControllerDesc) -> Result<ControllerResource> {
    let mut controller = ControllerResource::new(&desc.name);
    for input in &desc.inputs {
        let ty = match input.ty {
            InputTypeDesc::Bool => InputType::Bool,
            InputTypeDesc::Int => InputType::Int,
            InputTypeDesc::Float => InputType::Float,
        };
        controller.input_decl.add(&input.name, ty);
    }

    let node_count = desc.nodes.len();
    let check = |index: usize| -> Result<NodeId> {
        if index < node_count {
            Ok(NodeId(index))
        } else {
            Err(parse_error(path, format!("node index {index} out of range")))
        }
    };

    for node in desc.nodes {
        let node = match node {
            NodeDesc::Clip {
                slot,
                looped,
                events,
            } => GraphNode::Clip {
                slot_hash: name_hash(&slot),
                looped,
                events: events
                    .into_iter()
                    .map(|e| build_event(path, &controller.input_decl, e))
                    .collect::<Result<Vec<_>>>()?,
            },
            NodeDesc::Blend1d { input, children } => {
                let input_index = controller
                    .input_decl
                    .index_of(name_hash(&input))
                    .ok_or_else(|| {
                        parse_error(path, format!("blend references unknown input '{input}'"))
                    })?;
                let mut resolved = Vec::with_capacity(children.len());
                for (threshold, child) in children {
                    resolved.push((threshold, check(child)?));
                }
                GraphNode::Blend1D {
                    input_index,
                    children: resolved,
                }
            }
            NodeDesc::StateMachine {
                states,
                default_state,
                transitions,
            } => {
                let states = states
                    .into_iter()
                    .map(check)
                    .collect::<Result<Vec<_>>>()?;
                if default_state >= states.len() {
                    return Err(parse_error(path, "default state out of range"));
                }
                let transitions = transitions
                    .into_iter()
                    .map(|t| {
                        Ok(TransitionDesc {
                            from: t.from,
                            to: t.to,
                            condition: build_condition(path, &controller.input_decl, t.condition)?,
                            blend_length: t.blend_length,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                GraphNode::StateMachine {
                    states,
                    default_state,
                    transitions,
                }
            }
        };
        controller.add_node(node);
    }

    controller.root = desc.root.map(check).transpose()?;

    for set in desc.sets {
        let mut animation_set = AnimationSet::new(&set.name);
        for (slot, clip_path) in &set.clips {
            animation_set.add_clip(slot, clip_path);
        }
        controller.sets.push(animation_set);
    }
    Ok(controller)
}

fn build_property_animation(desc: PropertyAnimationDesc) -> PropertyAnimation {
    let mut anim = PropertyAnimation::new(desc.fps);
    for curve in desc.curves {
        anim.curves.push(PropertyCurve {
            target: match curve.target {
                TargetDesc::PositionX => TargetProperty::PositionX,
                TargetDesc::PositionY => TargetProperty::PositionY,
                TargetDesc::PositionZ => TargetProperty::PositionZ,
                TargetDesc::ScaleX => TargetProperty::ScaleX,
                TargetDesc::ScaleY => TargetProperty::ScaleY,
                TargetDesc::ScaleZ => TargetProperty::ScaleZ,
            },
            frames: curve.frames,
            values: curve.values,
        });
    }
    anim
}

// ============================================================================
// Loader thread plumbing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Clip,
    Controller,
    PropertyAnimation,
    Heightmap,
    Geometry,
}

struct LoadRequest {
    kind: ResourceKind,
    path: String,
}

enum LoadedValue {
    Clip(AnimationClip),
    Controller(ControllerResource),
    PropertyAnimation(PropertyAnimation),
    Heightmap(Heightmap),
    Geometry(ConvexGeometry),
}

struct LoadResult {
    path: String,
    value: Result<LoadedValue>,
}

fn load_one(root: &std::path::Path, request: &LoadRequest) -> Result<LoadedValue> {
    let full = root.join(&request.path);
    let text = std::fs::read_to_string(&full)
        .map_err(|_| FableError::ResourceNotFound(request.path.clone()))?;
    match request.kind {
        ResourceKind::Clip => {
            let desc: ClipDesc = serde_json::from_str(&text)?;
            Ok(LoadedValue::Clip(build_clip(&request.path, desc)?))
        }
        ResourceKind::Controller => {
            let desc: ControllerDesc = serde_json::from_str(&text)?;
            Ok(LoadedValue::Controller(build_controller(
                &request.path,
                desc,
            )?))
        }
        ResourceKind::PropertyAnimation => {
            let desc: PropertyAnimationDesc = serde_json::from_str(&text)?;
            Ok(LoadedValue::PropertyAnimation(build_property_animation(
                desc,
            )))
        }
        ResourceKind::Heightmap => {
            let desc: HeightmapDesc = serde_json::from_str(&text)?;
            if desc.values.len() != desc.width * desc.height {
                return Err(parse_error(&request.path, "heightmap sample count"));
            }
            Ok(LoadedValue::Heightmap(Heightmap::new(
                desc.width,
                desc.height,
                desc.values,
            )))
        }
        ResourceKind::Geometry => {
            let desc: GeometryDesc = serde_json::from_str(&text)?;
            Ok(LoadedValue::Geometry(ConvexGeometry {
                points: desc.points.into_iter().map(Vec3::from).collect(),
            }))
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Central resource access point: typed storages plus async loading.
pub struct ResourceServer {
    pub clips: Arc<ResourceStorage<AnimationClip>>,
    pub controllers: Arc<ResourceStorage<ControllerResource>>,
    pub property_animations: Arc<ResourceStorage<PropertyAnimation>>,
    pub heightmaps: Arc<ResourceStorage<Heightmap>>,
    pub geometries: Arc<ResourceStorage<ConvexGeometry>>,
    requests: Option<flume::Sender<LoadRequest>>,
    completions: flume::Receiver<LoadResult>,
    /// Parsed controllers waiting for their referenced clips.
    pending_controllers: Vec<(String, Arc<ControllerResource>)>,
}

impl ResourceServer {
    /// Creates a server loading from `root` on a background thread.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let (req_tx, req_rx) = flume::unbounded::<LoadRequest>();
        let (done_tx, done_rx) = flume::unbounded::<LoadResult>();
        thread::spawn(move || {
            while let Ok(request) = req_rx.recv() {
                let value = load_one(&root, &request);
                if done_tx
                    .send(LoadResult {
                        path: request.path,
                        value,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
        Self {
            clips: Arc::new(ResourceStorage::new()),
            controllers: Arc::new(ResourceStorage::new()),
            property_animations: Arc::new(ResourceStorage::new()),
            heightmaps: Arc::new(ResourceStorage::new()),
            geometries: Arc::new(ResourceStorage::new()),
            requests: Some(req_tx),
            completions: done_rx,
            pending_controllers: Vec::new(),
        }
    }

    /// Server without a loader thread; storages are filled directly with
    /// [`ResourceStorage::insert_ready`]. Used by tests and procedural
    /// content.
    #[must_use]
    pub fn offline() -> Self {
        let (_, done_rx) = flume::unbounded::<LoadResult>();
        Self {
            clips: Arc::new(ResourceStorage::new()),
            controllers: Arc::new(ResourceStorage::new()),
            property_animations: Arc::new(ResourceStorage::new()),
            heightmaps: Arc::new(ResourceStorage::new()),
            geometries: Arc::new(ResourceStorage::new()),
            requests: None,
            completions: done_rx,
            pending_controllers: Vec::new(),
        }
    }

    fn request(&self, kind: ResourceKind, path: &str) {
        if let Some(requests) = &self.requests {
            let _ = requests.send(LoadRequest {
                kind,
                path: path.to_string(),
            });
        }
    }

    pub fn load_clip(&self, path: &str) {
        if self.clips.begin_load(path) {
            self.request(ResourceKind::Clip, path);
        }
    }

    pub fn load_controller(&self, path: &str) {
        if self.controllers.begin_load(path) {
            self.request(ResourceKind::Controller, path);
        }
    }

    pub fn load_property_animation(&self, path: &str) {
        if self.property_animations.begin_load(path) {
            self.request(ResourceKind::PropertyAnimation, path);
        }
    }

    pub fn load_heightmap(&self, path: &str) {
        if self.heightmaps.begin_load(path) {
            self.request(ResourceKind::Heightmap, path);
        }
    }

    pub fn load_geometry(&self, path: &str) {
        if self.geometries.begin_load(path) {
            self.request(ResourceKind::Geometry, path);
        }
    }

    /// Drains finished loads into the storages and resolves controller
    /// dependencies. Call once per tick before scene updates.
    pub fn poll(&mut self) {
        while let Ok(result) = self.completions.try_recv() {
            match result.value {
                Ok(LoadedValue::Clip(clip)) => self.clips.set_ready(&result.path, Arc::new(clip)),
                Ok(LoadedValue::Controller(controller)) => {
                    self.pending_controllers
                        .push((result.path, Arc::new(controller)));
                }
                Ok(LoadedValue::PropertyAnimation(anim)) => {
                    self.property_animations
                        .set_ready(&result.path, Arc::new(anim));
                }
                Ok(LoadedValue::Heightmap(map)) => {
                    self.heightmaps.set_ready(&result.path, Arc::new(map));
                }
                Ok(LoadedValue::Geometry(geometry)) => {
                    self.geometries.set_ready(&result.path, Arc::new(geometry));
                }
                Err(error) => {
                    warn!("failed to load '{}': {error}", result.path);
                    self.mark_failed(&result.path);
                }
            }
        }
        self.resolve_pending_controllers();
    }

    /// A failed path may belong to any storage; only the one that was
    /// actually loading it has an entry to flip.
    fn mark_failed(&self, path: &str) {
        if self.clips.contains(path) {
            self.clips.set_failed(path);
        }
        if self.controllers.contains(path) {
            self.controllers.set_failed(path);
        }
        if self.property_animations.contains(path) {
            self.property_animations.set_failed(path);
        }
        if self.heightmaps.contains(path) {
            self.heightmaps.set_failed(path);
        }
        if self.geometries.contains(path) {
            self.geometries.set_failed(path);
        }
    }

    fn resolve_pending_controllers(&mut self) {
        let mut still_pending = Vec::new();
        for (path, controller) in std::mem::take(&mut self.pending_controllers) {
            let mut ready = true;
            let mut failed = false;
            for clip_path in controller.referenced_clip_paths() {
                if self.clips.is_failed(clip_path) {
                    failed = true;
                } else if !self.clips.is_ready(clip_path) {
                    self.load_clip(clip_path);
                    ready = false;
                }
            }
            if failed {
                warn!("controller '{path}' failed: missing clip dependency");
                self.controllers.set_failed(&path);
            } else if ready {
                self.controllers.set_ready(&path, controller);
            } else {
                still_pending.push((path, controller));
            }
        }
        self.pending_controllers = still_pending;
    }

    /// Hot reload: flips the entry back to `Loading` and re-requests it.
    pub fn reload(&mut self, path: &str) {
        if self.clips.contains(path) {
            self.clips.invalidate(path);
            self.request(ResourceKind::Clip, path);
        }
        if self.controllers.contains(path) {
            self.controllers.invalidate(path);
            self.pending_controllers.retain(|(p, _)| p != path);
            self.request(ResourceKind::Controller, path);
        }
        if self.property_animations.contains(path) {
            self.property_animations.invalidate(path);
            self.request(ResourceKind::PropertyAnimation, path);
        }
        if self.heightmaps.contains(path) {
            self.heightmaps.invalidate(path);
            self.request(ResourceKind::Heightmap, path);
        }
        if self.geometries.contains(path) {
            self.geometries.invalidate(path);
            self.request(ResourceKind::Geometry, path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_server_serves_injected_resources() {
        let server = ResourceServer::offline();
        server.clips.insert_ready(
            "clips/idle.json",
            AnimationClip::new("idle".into(), Vec::new(), Transform::IDENTITY),
        );
        assert!(server.clips.is_ready("clips/idle.json"));
        assert!(server.clips.get("clips/missing.json").is_none());
    }

    #[test]
    fn controller_desc_parses_and_resolves_inputs() {
        let json = r#"{
            "name": "biped",
            "inputs": [
                {"name": "run", "type": "bool"},
                {"name": "speed", "type": "float"}
            ],
            "nodes": [
                {"type": "clip", "slot": "idle", "looped": true},
                {"type": "clip", "slot": "walk", "looped": true},
                {"type": "state_machine", "states": [0, 1], "default_state": 0,
                 "transitions": [
                    {"from": 0, "to": 1,
                     "condition": {"type": "bool", "input": "run", "value": true},
                     "blend_length": 0.3}
                 ]}
            ],
            "root": 2,
            "sets": [
                {"name": "default", "clips": {"idle": "clips/idle.json", "walk": "clips/walk.json"}}
            ]
        }"#;
        let desc: ControllerDesc = serde_json::from_str(json).unwrap();
        let controller = build_controller("ctrl.json", desc).unwrap();
        assert_eq!(controller.input_decl.len(), 2);
        assert_eq!(controller.root, Some(NodeId(2)));
        let paths: Vec<&str> = controller.referenced_clip_paths().collect();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn controller_desc_rejects_unknown_input() {
        let json = r#"{
            "name": "bad",
            "inputs": [],
            "nodes": [
                {"type": "clip", "slot": "idle"},
                {"type": "state_machine", "states": [0], "default_state": 0,
                 "transitions": [
                    {"from": 0, "to": 0,
                     "condition": {"type": "bool", "input": "missing", "value": true}}
                 ]}
            ],
            "root": 1
        }"#;
        let desc: ControllerDesc = serde_json::from_str(json).unwrap();
        assert!(build_controller("bad.json", desc).is_err());
    }
}
