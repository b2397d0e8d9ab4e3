//! Event Stream Tests
//!
//! Framing coverage for the per-tick event buffer: append/iterate order,
//! skipping unknown record types by their size byte, truncated tails and
//! `set_input` payload decoding.

use fable::events::{EventStream, SET_INPUT_EVENT, SetInputPayload, float_value_bytes, vec3_payload};
use fable::world::Entity;

#[test]
fn records_iterate_in_append_order() {
    let mut stream = EventStream::new();
    stream.append(1, Entity(10), b"a");
    stream.append(2, Entity(11), b"bc");
    stream.append(3, Entity(12), b"");

    let records: Vec<_> = stream.iter().collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].type_hash, 1);
    assert_eq!(records[0].payload, b"a");
    assert_eq!(records[1].owner, Entity(11));
    assert_eq!(records[1].payload, b"bc");
    assert_eq!(records[2].payload, b"");
}

#[test]
fn unknown_record_types_are_skipped_by_size() {
    let mut stream = EventStream::new();
    stream.append(0xdead, Entity(1), &[1, 2, 3, 4, 5, 6, 7]);
    stream.append(42, Entity(2), b"ok");

    // a reader only interested in type 42 still finds it behind the
    // unknown record
    let found: Vec<_> = stream.iter().filter(|r| r.type_hash == 42).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].payload, b"ok");
}

#[test]
fn vec3_payload_encodes_little_endian_components() {
    let bytes = vec3_payload(glam::Vec3::new(1.0, -2.0, 0.5));
    assert_eq!(f32::from_le_bytes(bytes[..4].try_into().unwrap()), 1.0);
    assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -2.0);
    assert_eq!(f32::from_le_bytes(bytes[8..].try_into().unwrap()), 0.5);
}

#[test]
fn clear_empties_the_stream() {
    let mut stream = EventStream::new();
    stream.append(1, Entity(0), b"x");
    assert!(!stream.is_empty());
    stream.clear();
    assert!(stream.is_empty());
    assert_eq!(stream.iter().count(), 0);
}

#[test]
fn set_input_payload_round_trips() {
    let mut stream = EventStream::new();
    stream.append_set_input(Entity(5), 3, &float_value_bytes(1.25));

    let record = stream.iter().next().unwrap();
    assert_eq!(record.type_hash, SET_INPUT_EVENT);
    assert_eq!(record.owner, Entity(5));
    let payload = SetInputPayload::decode(record.payload).unwrap();
    assert_eq!(payload.input_index, 3);
    assert!((f32::from_le_bytes(payload.value.try_into().unwrap()) - 1.25).abs() < f32::EPSILON);
}

#[test]
fn malformed_set_input_payload_is_rejected() {
    assert!(SetInputPayload::decode(&[1, 2]).is_none());
}

#[test]
#[should_panic(expected = "event payload too large")]
fn oversized_payload_panics() {
    let mut stream = EventStream::new();
    stream.append(1, Entity(0), &[0u8; 300]);
}
