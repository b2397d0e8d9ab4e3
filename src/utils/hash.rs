//! Name hashing.
//!
//! Bones, controller inputs, animation slots and event types are all
//! addressed by a 32-bit hash of their name. The wire format of the event
//! stream and the serialized scenes store these hashes directly, so the
//! function must stay stable across builds.

use xxhash_rust::const_xxh32::xxh32 as const_xxh32;
use xxhash_rust::xxh32::xxh32;

/// Hashes a name to its 32-bit identity.
#[inline]
#[must_use]
pub fn name_hash(name: &str) -> u32 {
    xxh32(name.as_bytes(), 0)
}

/// Const variant of [`name_hash`], usable for event type constants.
#[inline]
#[must_use]
pub const fn const_name_hash(name: &str) -> u32 {
    const_xxh32(name.as_bytes(), 0)
}
