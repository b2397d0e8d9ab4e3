//! Controller Resource
//!
//! The immutable description of an animation controller: a typed input
//! declaration, a node graph (clip leaves, 1-D blend trees, state machines)
//! and named animation sets mapping slot hashes to clip paths. The runtime
//! side lives in [`crate::animation::nodes`]; this module only describes.
//!
//! Inputs are packed into a flat byte buffer (bools 1 byte, ints/floats 4),
//! so transition conditions and timed events address inputs by index and
//! read/write raw bytes at the slot offset.

use rustc_hash::FxHashMap;

use crate::utils::hash::name_hash;

/// Type of one controller input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Bool,
    Int,
    Float,
}

impl InputType {
    /// Packed size in the input buffer.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            InputType::Bool => 1,
            InputType::Int | InputType::Float => 4,
        }
    }
}

/// One declared input.
#[derive(Debug, Clone)]
pub struct InputSlot {
    pub name: String,
    pub name_hash: u32,
    pub ty: InputType,
    /// Byte offset in the packed input buffer.
    pub offset: usize,
}

/// Ordered declaration of all controller inputs.
#[derive(Debug, Clone, Default)]
pub struct InputDecl {
    slots: Vec<InputSlot>,
    size: usize,
}

impl InputDecl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input and returns its index.
    pub fn add(&mut self, name: &str, ty: InputType) -> usize {
        let index = self.slots.len();
        self.slots.push(InputSlot {
            name: name.to_string(),
            name_hash: name_hash(name),
            ty,
            offset: self.size,
        });
        self.size += ty.size();
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total packed buffer size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&InputSlot> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn slots(&self) -> &[InputSlot] {
        &self.slots
    }

    /// Index of the input with the given name hash.
    #[must_use]
    pub fn index_of(&self, hash: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.name_hash == hash)
    }
}

/// A typed input value, as carried by timed events and scripting calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl InputValue {
    #[must_use]
    pub fn ty(self) -> InputType {
        match self {
            InputValue::Bool(_) => InputType::Bool,
            InputValue::Int(_) => InputType::Int,
            InputValue::Float(_) => InputType::Float,
        }
    }

    /// Raw little-endian bytes matching the packed buffer layout.
    #[must_use]
    pub fn to_bytes(self) -> ([u8; 4], usize) {
        let mut bytes = [0u8; 4];
        match self {
            InputValue::Bool(v) => {
                bytes[0] = u8::from(v);
                (bytes, 1)
            }
            InputValue::Int(v) => {
                bytes.copy_from_slice(&v.to_le_bytes());
                (bytes, 4)
            }
            InputValue::Float(v) => {
                bytes.copy_from_slice(&v.to_le_bytes());
                (bytes, 4)
            }
        }
    }
}

// ============================================================================
// Input buffer access
// ============================================================================

/// Reads a typed value from a packed input buffer.
#[must_use]
pub fn read_input(decl: &InputDecl, buffer: &[u8], index: usize) -> Option<InputValue> {
    let slot = decl.slot(index)?;
    let at = slot.offset;
    match slot.ty {
        InputType::Bool => Some(InputValue::Bool(*buffer.get(at)? != 0)),
        InputType::Int => Some(InputValue::Int(i32::from_le_bytes(
            buffer.get(at..at + 4)?.try_into().ok()?,
        ))),
        InputType::Float => Some(InputValue::Float(f32::from_le_bytes(
            buffer.get(at..at + 4)?.try_into().ok()?,
        ))),
    }
}

/// Writes a typed value into a packed input buffer. Returns `false` on a bad
/// index or a type mismatch; the buffer is left untouched.
pub fn write_input(decl: &InputDecl, buffer: &mut [u8], index: usize, value: InputValue) -> bool {
    let Some(slot) = decl.slot(index) else {
        return false;
    };
    if slot.ty != value.ty() {
        return false;
    }
    let (bytes, len) = value.to_bytes();
    let at = slot.offset;
    if at + len > buffer.len() {
        return false;
    }
    buffer[at..at + len].copy_from_slice(&bytes[..len]);
    true
}

// ============================================================================
// Transition conditions
// ============================================================================

/// Comparison operator used by transition conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply_i32(self, a: i32, b: i32) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }

    fn apply_f32(self, a: f32, b: f32) -> bool {
        match self {
            CompareOp::Eq => (a - b).abs() < f32::EPSILON,
            CompareOp::Ne => (a - b).abs() >= f32::EPSILON,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }
}

/// A boolean expression over the packed input buffer.
#[derive(Debug, Clone)]
pub enum Condition {
    Always,
    BoolInput { index: usize, value: bool },
    IntCompare { index: usize, op: CompareOp, value: i32 },
    FloatCompare { index: usize, op: CompareOp, value: f32 },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Evaluates against a packed input buffer. A reference to a missing or
    /// mistyped input evaluates to `false`.
    #[must_use]
    pub fn evaluate(&self, decl: &InputDecl, buffer: &[u8]) -> bool {
        match self {
            Condition::Always => true,
            Condition::BoolInput { index, value } => {
                matches!(read_input(decl, buffer, *index), Some(InputValue::Bool(v)) if v == *value)
            }
            Condition::IntCompare { index, op, value } => {
                matches!(read_input(decl, buffer, *index), Some(InputValue::Int(v)) if op.apply_i32(v, *value))
            }
            Condition::FloatCompare { index, op, value } => {
                matches!(read_input(decl, buffer, *index), Some(InputValue::Float(v)) if op.apply_f32(v, *value))
            }
            Condition::Not(inner) => !inner.evaluate(decl, buffer),
            Condition::And(a, b) => a.evaluate(decl, buffer) && b.evaluate(decl, buffer),
            Condition::Or(a, b) => a.evaluate(decl, buffer) || b.evaluate(decl, buffer),
        }
    }
}

// ============================================================================
// Graph nodes
// ============================================================================

/// Index of a node in [`ControllerResource::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub usize);

/// What a timed event does when its trigger time is crossed.
#[derive(Debug, Clone)]
pub enum TimedEventKind {
    /// Defer an input write through the event stream.
    SetInput { input_index: u32, value: InputValue },
    /// Emit an opaque record for game code to consume.
    User { type_hash: u32, payload: Vec<u8> },
}

/// An event fired when clip playback crosses `time`.
#[derive(Debug, Clone)]
pub struct TimedEvent {
    pub time: f32,
    pub kind: TimedEventKind,
}

/// A transition edge between two state-machine states.
#[derive(Debug, Clone)]
pub struct TransitionDesc {
    pub from: usize,
    pub to: usize,
    pub condition: Condition,
    /// Cross-fade duration in seconds; zero switches instantly.
    pub blend_length: f32,
}

/// One node of the controller graph.
#[derive(Debug, Clone)]
pub enum GraphNode {
    /// Leaf playing one animation slot.
    Clip {
        /// Hash of the animation slot name, resolved through the active
        /// animation set.
        slot_hash: u32,
        looped: bool,
        events: Vec<TimedEvent>,
    },
    /// 1-D blend over a float input: children sorted by threshold, the two
    /// bracketing the input value are cross-faded.
    Blend1D {
        input_index: usize,
        children: Vec<(f32, NodeId)>,
    },
    /// State machine: one active child state plus condition-guarded edges.
    StateMachine {
        states: Vec<NodeId>,
        default_state: usize,
        transitions: Vec<TransitionDesc>,
    },
}

// ============================================================================
// Animation sets
// ============================================================================

/// Named mapping from animation slot hash to clip resource path.
#[derive(Debug, Clone)]
pub struct AnimationSet {
    pub name: String,
    pub name_hash: u32,
    pub clips: FxHashMap<u32, String>,
}

impl AnimationSet {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            name_hash: name_hash(name),
            clips: FxHashMap::default(),
        }
    }

    pub fn add_clip(&mut self, slot: &str, path: &str) {
        self.clips.insert(name_hash(slot), path.to_string());
    }
}

// ============================================================================
// Controller resource
// ============================================================================

/// Immutable controller description shared by every component referencing the
/// same controller path.
#[derive(Debug, Clone)]
pub struct ControllerResource {
    pub name: String,
    pub input_decl: InputDecl,
    pub nodes: Vec<GraphNode>,
    pub root: Option<NodeId>,
    pub sets: Vec<AnimationSet>,
}

impl ControllerResource {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input_decl: InputDecl::new(),
            nodes: Vec::new(),
            root: None,
            sets: Vec::new(),
        }
    }

    /// Appends a node and returns its id.
    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    /// Animation set by name hash; index 0 is the default set.
    #[must_use]
    pub fn set_by_hash(&self, hash: u32) -> Option<usize> {
        self.sets.iter().position(|s| s.name_hash == hash)
    }

    /// Every clip path referenced by any animation set. Used to decide when
    /// the controller and its dependencies are fully loaded.
    pub fn referenced_clip_paths(&self) -> impl Iterator<Item = &str> {
        self.sets
            .iter()
            .flat_map(|set| set.clips.values().map(String::as_str))
    }
}
