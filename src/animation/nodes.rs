//! Controller Runtime Nodes
//!
//! Per-component instances of the controller graph. Instances mirror the
//! resource nodes ([`GraphNode`]) but carry mutable playback state: clip
//! cursors, the active state of a state machine and in-flight cross-fades.
//!
//! `update` consumes the instance and returns its replacement, so a state
//! machine switches states by returning a new child and a finished cross-fade
//! collapses back to its target node. The scene stores the root instance and
//! reassigns it every tick.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::animation::clip::AnimationClip;
use crate::animation::controller::{
    ControllerResource, GraphNode, InputValue, NodeId, TimedEvent, TimedEventKind, read_input,
};
use crate::events::EventStream;
use crate::skeleton::{Pose, Skeleton};
use crate::world::{Entity, Transform};

/// Resolved clips of the active animation set, keyed by slot hash.
pub type AnimSet = FxHashMap<u32, Arc<AnimationClip>>;

/// Everything a node needs for one update step.
pub struct RunningContext<'a> {
    pub dt: f32,
    pub input: &'a [u8],
    pub anim_set: &'a AnimSet,
    pub events: &'a mut EventStream,
    pub entity: Entity,
}

// ============================================================================
// Instances
// ============================================================================

/// Playback state of one clip leaf.
#[derive(Debug, Clone)]
pub struct ClipInstance {
    node: NodeId,
    time: f32,
    prev_time: f32,
}

/// A 1-D blend with live child instances, parallel to the resource children.
#[derive(Debug, Clone)]
pub struct BlendInstance {
    node: NodeId,
    children: Vec<NodeInstance>,
}

/// State machine with one active child (possibly a cross-fade).
#[derive(Debug, Clone)]
pub struct StateMachineInstance {
    node: NodeId,
    current_state: usize,
    current: Box<NodeInstance>,
}

/// Cross-fade between two nodes; collapses to `to` when `time` reaches
/// `length`.
#[derive(Debug, Clone)]
pub struct TransitionInstance {
    from: Box<NodeInstance>,
    to: Box<NodeInstance>,
    time: f32,
    length: f32,
}

/// A live controller graph node.
#[derive(Debug, Clone)]
pub enum NodeInstance {
    Clip(ClipInstance),
    Blend(BlendInstance),
    StateMachine(StateMachineInstance),
    Transition(TransitionInstance),
}

impl NodeInstance {
    /// Builds the instance tree for a resource node.
    #[must_use]
    pub fn instantiate(res: &ControllerResource, id: NodeId) -> NodeInstance {
        match res.node(id) {
            GraphNode::Clip { .. } => NodeInstance::Clip(ClipInstance {
                node: id,
                time: 0.0,
                prev_time: 0.0,
            }),
            GraphNode::Blend1D { children, .. } => NodeInstance::Blend(BlendInstance {
                node: id,
                children: children
                    .iter()
                    .map(|(_, child)| NodeInstance::instantiate(res, *child))
                    .collect(),
            }),
            GraphNode::StateMachine {
                states,
                default_state,
                ..
            } => NodeInstance::StateMachine(StateMachineInstance {
                node: id,
                current_state: *default_state,
                current: Box::new(NodeInstance::instantiate(res, states[*default_state])),
            }),
        }
    }

    /// Advances playback by `ctx.dt` and returns the node that replaces this
    /// one. `check_edges` is cleared inside a cross-fade so a half-finished
    /// transition is never interrupted by another edge.
    #[must_use]
    pub fn update(
        self,
        res: &ControllerResource,
        ctx: &mut RunningContext<'_>,
        check_edges: bool,
    ) -> NodeInstance {
        match self {
            NodeInstance::Clip(mut clip) => {
                clip.advance(res, ctx);
                NodeInstance::Clip(clip)
            }
            NodeInstance::Blend(mut blend) => {
                // every child advances by raw dt so switching the blend input
                // never skips a child's cursor
                blend.children = blend
                    .children
                    .into_iter()
                    .map(|child| child.update(res, ctx, check_edges))
                    .collect();
                NodeInstance::Blend(blend)
            }
            NodeInstance::StateMachine(machine) => {
                let StateMachineInstance {
                    node,
                    mut current_state,
                    current,
                } = machine;
                let in_transition = matches!(*current, NodeInstance::Transition(_));
                let mut current = (*current).update(res, ctx, false);
                if check_edges && !in_transition {
                    (current_state, current) =
                        follow_edges(res, node, current_state, current, ctx);
                }
                NodeInstance::StateMachine(StateMachineInstance {
                    node,
                    current_state,
                    current: Box::new(current),
                })
            }
            NodeInstance::Transition(mut transition) => {
                transition.time += ctx.dt;
                transition.from = Box::new((*transition.from).update(res, ctx, false));
                transition.to = Box::new((*transition.to).update(res, ctx, false));
                if transition.time >= transition.length {
                    *transition.to
                } else {
                    NodeInstance::Transition(transition)
                }
            }
        }
    }

    /// Samples this node into `pose` at `weight`; `pose` holds relative bone
    /// transforms.
    pub fn fill_pose(
        &self,
        res: &ControllerResource,
        anim_set: &AnimSet,
        input: &[u8],
        skeleton: &Skeleton,
        pose: &mut Pose,
        weight: f32,
    ) {
        match self {
            NodeInstance::Clip(clip) => {
                let GraphNode::Clip { slot_hash, .. } = res.node(clip.node) else {
                    return;
                };
                if let Some(animation) = anim_set.get(slot_hash) {
                    animation.sample_pose(clip.time, skeleton, pose, weight);
                }
            }
            NodeInstance::Blend(blend) => {
                let Some((lower, upper, t)) = blend.bracket(res, input) else {
                    return;
                };
                blend.children[lower].fill_pose(res, anim_set, input, skeleton, pose, weight);
                if upper != lower && t > 0.0 {
                    blend.children[upper]
                        .fill_pose(res, anim_set, input, skeleton, pose, weight * t);
                }
            }
            NodeInstance::StateMachine(machine) => {
                machine
                    .current
                    .fill_pose(res, anim_set, input, skeleton, pose, weight);
            }
            NodeInstance::Transition(transition) => {
                let t = (transition.time / transition.length).clamp(0.0, 1.0);
                transition
                    .from
                    .fill_pose(res, anim_set, input, skeleton, pose, weight);
                transition
                    .to
                    .fill_pose(res, anim_set, input, skeleton, pose, weight * t);
            }
        }
    }

    /// Root-motion delta accumulated by the last `update`.
    #[must_use]
    pub fn root_motion(&self, res: &ControllerResource, anim_set: &AnimSet) -> Transform {
        match self {
            NodeInstance::Clip(clip) => {
                let GraphNode::Clip { slot_hash, .. } = res.node(clip.node) else {
                    return Transform::IDENTITY;
                };
                anim_set.get(slot_hash).map_or(Transform::IDENTITY, |anim| {
                    anim.root_motion_between(clip.prev_time, clip.time)
                })
            }
            NodeInstance::Blend(blend) => blend
                .children
                .first()
                .map_or(Transform::IDENTITY, |child| child.root_motion(res, anim_set)),
            NodeInstance::StateMachine(machine) => machine.current.root_motion(res, anim_set),
            NodeInstance::Transition(transition) => {
                let from = transition.from.root_motion(res, anim_set);
                let to = transition.to.root_motion(res, anim_set);
                let t = (transition.time / transition.length).clamp(0.0, 1.0);
                Transform {
                    pos: from.pos.lerp(to.pos, t),
                    rot: from.rot.slerp(to.rot, t),
                }
            }
        }
    }
}

impl ClipInstance {
    /// Advances the cursor, wrapping looped clips and firing timed events
    /// whose trigger time was crossed.
    fn advance(&mut self, res: &ControllerResource, ctx: &mut RunningContext<'_>) {
        let GraphNode::Clip {
            slot_hash,
            looped,
            events,
        } = res.node(self.node)
        else {
            return;
        };
        let length = ctx
            .anim_set
            .get(slot_hash)
            .map_or(0.0, |animation| animation.length);

        self.prev_time = self.time;
        self.time += ctx.dt;
        if length <= 0.0 {
            self.time = 0.0;
            self.prev_time = 0.0;
            return;
        }

        if *looped {
            if self.time > length {
                // fire the tail of this loop, then wrap and fire the head
                fire_events(events, self.prev_time, length, ctx);
                while self.time > length {
                    self.time -= length;
                }
                fire_events(events, -1.0, self.time, ctx);
            } else {
                fire_events(events, self.prev_time, self.time, ctx);
            }
        } else {
            self.time = self.time.min(length);
            fire_events(events, self.prev_time, self.time, ctx);
        }
    }

    #[must_use]
    pub fn time(&self) -> f32 {
        self.time
    }
}

/// Fires every event with trigger time in `(from, to]`.
fn fire_events(events: &[TimedEvent], from: f32, to: f32, ctx: &mut RunningContext<'_>) {
    for event in events {
        if event.time > from && event.time <= to {
            match &event.kind {
                TimedEventKind::SetInput { input_index, value } => {
                    let (bytes, len) = value.to_bytes();
                    ctx.events
                        .append_set_input(ctx.entity, *input_index, &bytes[..len]);
                }
                TimedEventKind::User { type_hash, payload } => {
                    ctx.events.append(*type_hash, ctx.entity, payload);
                }
            }
        }
    }
}

impl BlendInstance {
    /// Child pair bracketing the blend input, plus the blend factor.
    fn bracket(&self, res: &ControllerResource, input: &[u8]) -> Option<(usize, usize, f32)> {
        let GraphNode::Blend1D {
            input_index,
            children,
        } = res.node(self.node)
        else {
            return None;
        };
        if children.is_empty() {
            return None;
        }
        let value = match read_input(&res.input_decl, input, *input_index) {
            Some(InputValue::Float(v)) => v,
            _ => 0.0,
        };
        let next = children.partition_point(|(threshold, _)| *threshold <= value);
        if next == 0 {
            return Some((0, 0, 0.0));
        }
        let last = children.len() - 1;
        if next > last {
            return Some((last, last, 0.0));
        }
        let i = next - 1;
        let span = children[next].0 - children[i].0;
        let t = if span > f32::EPSILON {
            ((value - children[i].0) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some((i, next, t))
    }
}

impl StateMachineInstance {
    #[must_use]
    pub fn current_state(&self) -> usize {
        self.current_state
    }
}

/// Checks condition-guarded edges leaving `current_state`; the first edge
/// that fires replaces `current` with a cross-fade (or a hard switch when the
/// blend length is zero).
fn follow_edges(
    res: &ControllerResource,
    node: NodeId,
    current_state: usize,
    current: NodeInstance,
    ctx: &RunningContext<'_>,
) -> (usize, NodeInstance) {
    let GraphNode::StateMachine {
        states,
        transitions,
        ..
    } = res.node(node)
    else {
        return (current_state, current);
    };
    for transition in transitions {
        if transition.from != current_state
            || !transition.condition.evaluate(&res.input_decl, ctx.input)
        {
            continue;
        }
        let target = NodeInstance::instantiate(res, states[transition.to]);
        let next = if transition.blend_length > 0.0 {
            NodeInstance::Transition(TransitionInstance {
                from: Box::new(current),
                to: Box::new(target),
                time: 0.0,
                length: transition.blend_length,
            })
        } else {
            target
        };
        return (transition.to, next);
    }
    (current_state, current)
}
