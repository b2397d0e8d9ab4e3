//! Event Stream
//!
//! A per-tick append-only buffer of typed, variable-size records produced by
//! controller updates and drained once per tick by the animation scene.
//! Deferring side effects (input propagation, user events) to a single drain
//! point keeps the controller update free of re-entrant mutation.
//!
//! Wire format, per record:
//!
//! ```text
//! [type_hash: u32][owner_entity: u32][payload_size: u8][payload bytes]
//! ```
//!
//! Readers must skip unrecognized `type_hash` values by `payload_size` to
//! stay framing-compatible with future record types. A truncated tail ends
//! iteration without panicking.

use glam::Vec3;

use crate::utils::hash::const_name_hash;
use crate::world::Entity;

/// Type hash of the input-change record emitted by controller timed events.
pub const SET_INPUT_EVENT: u32 = const_name_hash("set_input");

/// Maximum payload size of a single record.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// One decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord<'a> {
    pub type_hash: u32,
    pub owner: Entity,
    pub payload: &'a [u8],
}

/// Append-only per-tick event buffer.
#[derive(Debug, Default, Clone)]
pub struct EventStream {
    data: Vec<u8>,
}

impl EventStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Appends one record.
    ///
    /// # Panics
    /// Panics if `payload` exceeds [`MAX_PAYLOAD_SIZE`]; record layouts are
    /// fixed by their emitters, so an oversized payload is a programmer error.
    pub fn append(&mut self, type_hash: u32, owner: Entity, payload: &[u8]) {
        assert!(payload.len() <= MAX_PAYLOAD_SIZE, "event payload too large");
        self.data.extend_from_slice(&type_hash.to_le_bytes());
        self.data.extend_from_slice(&owner.0.to_le_bytes());
        self.data.push(payload.len() as u8);
        self.data.extend_from_slice(payload);
    }

    /// Appends a `set_input` record carrying the raw new slot value.
    pub fn append_set_input(&mut self, owner: Entity, input_index: u32, value: &[u8]) {
        let mut payload = [0u8; 4 + 4];
        payload[..4].copy_from_slice(&input_index.to_le_bytes());
        payload[4..4 + value.len()].copy_from_slice(value);
        self.append(SET_INPUT_EVENT, owner, &payload[..4 + value.len()]);
    }

    /// Iterates records in append order until the reported byte length is
    /// exhausted. A record whose header or payload runs past the end of the
    /// buffer terminates iteration.
    #[must_use]
    pub fn iter(&self) -> EventIter<'_> {
        EventIter {
            data: &self.data,
            pos: 0,
        }
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = EventRecord<'a>;
    type IntoIter = EventIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`EventStream`] records.
pub struct EventIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for EventIter<'a> {
    type Item = EventRecord<'a>;

    fn next(&mut self) -> Option<EventRecord<'a>> {
        const HEADER: usize = 4 + 4 + 1;
        if self.pos + HEADER > self.data.len() {
            return None;
        }
        let type_hash = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        let owner = u32::from_le_bytes(self.data[self.pos + 4..self.pos + 8].try_into().unwrap());
        let size = self.data[self.pos + 8] as usize;
        let start = self.pos + HEADER;
        if start + size > self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        self.pos = start + size;
        Some(EventRecord {
            type_hash,
            owner: Entity(owner),
            payload: &self.data[start..start + size],
        })
    }
}

/// Decoded payload of a [`SET_INPUT_EVENT`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetInputPayload<'a> {
    pub input_index: u32,
    pub value: &'a [u8],
}

impl<'a> SetInputPayload<'a> {
    /// Decodes the payload of a `set_input` record, `None` if malformed.
    #[must_use]
    pub fn decode(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        Some(Self {
            input_index: u32::from_le_bytes(payload[..4].try_into().unwrap()),
            value: &payload[4..],
        })
    }
}

/// Helper used by event emitters for float-valued inputs.
#[must_use]
pub fn float_value_bytes(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Helper used by event emitters for vector payloads (user events).
#[must_use]
pub fn vec3_payload(value: Vec3) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&value.x.to_le_bytes());
    bytes[4..8].copy_from_slice(&value.y.to_le_bytes());
    bytes[8..].copy_from_slice(&value.z.to_le_bytes());
    bytes
}
