//! Binary Streams
//!
//! [`OutputBlob`] and [`InputBlob`] implement the little-endian, unframed
//! byte streams used by scene serialization and the per-tick event stream.
//!
//! Paths are stored as raw bytes followed by a NUL terminator with a fixed
//! maximum length ([`MAX_PATH_LENGTH`]); an empty string means "no resource
//! bound". Readers return [`FableError::BlobOverrun`] when the stream ends in
//! the middle of a value, so a truncated save file fails cleanly instead of
//! reading garbage.

use glam::{Quat, Vec3};

use crate::errors::{FableError, Result};
use crate::world::{Entity, Transform};

/// Maximum serialized path length in bytes, including the NUL terminator.
pub const MAX_PATH_LENGTH: usize = 260;

/// Growable little-endian output stream.
#[derive(Default, Debug, Clone)]
pub struct OutputBlob {
    data: Vec<u8>,
}

impl OutputBlob {
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

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32_slice(&mut self, values: &[f32]) {
        self.data.extend_from_slice(bytemuck::cast_slice(values));
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32_slice(&value.to_array());
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32_slice(&value.to_array());
    }

    pub fn write_transform(&mut self, value: &Transform) {
        self.write_vec3(value.pos);
        self.write_quat(value.rot);
    }

    pub fn write_entity(&mut self, value: Entity) {
        self.write_u32(value.0);
    }

    /// Writes a NUL-terminated path. Empty string = "no resource bound".
    pub fn write_path(&mut self, path: &str) -> Result<()> {
        if path.len() + 1 > MAX_PATH_LENGTH {
            return Err(FableError::PathTooLong {
                max: MAX_PATH_LENGTH,
            });
        }
        self.data.extend_from_slice(path.as_bytes());
        self.data.push(0);
        Ok(())
    }
}

/// Cursor over a borrowed byte slice, counterpart of [`OutputBlob`].
#[derive(Debug)]
pub struct InputBlob<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> InputBlob<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Skips `count` bytes, clamped to the end of the stream.
    pub fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.data.len());
    }

    pub fn read_bytes(&mut self, count: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(FableError::BlobOverrun(what));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.read_bytes(1, what)?[0])
    }

    pub fn read_bool(&mut self, what: &'static str) -> Result<bool> {
        Ok(self.read_u8(what)? != 0)
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self, what: &'static str) -> Result<u64> {
        let bytes = self.read_bytes(8, what)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f32(&mut self, what: &'static str) -> Result<f32> {
        let bytes = self.read_bytes(4, what)?;
        Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_vec3(&mut self, what: &'static str) -> Result<Vec3> {
        Ok(Vec3::new(
            self.read_f32(what)?,
            self.read_f32(what)?,
            self.read_f32(what)?,
        ))
    }

    pub fn read_quat(&mut self, what: &'static str) -> Result<Quat> {
        Ok(Quat::from_xyzw(
            self.read_f32(what)?,
            self.read_f32(what)?,
            self.read_f32(what)?,
            self.read_f32(what)?,
        ))
    }

    pub fn read_transform(&mut self, what: &'static str) -> Result<Transform> {
        Ok(Transform {
            pos: self.read_vec3(what)?,
            rot: self.read_quat(what)?,
        })
    }

    pub fn read_entity(&mut self, what: &'static str) -> Result<Entity> {
        Ok(Entity(self.read_u32(what)?))
    }

    /// Reads a NUL-terminated path written by [`OutputBlob::write_path`].
    pub fn read_path(&mut self, what: &'static str) -> Result<String> {
        let start = self.pos;
        let limit = (start + MAX_PATH_LENGTH).min(self.data.len());
        let Some(nul) = self.data[start..limit].iter().position(|&b| b == 0) else {
            if limit - start >= MAX_PATH_LENGTH {
                return Err(FableError::PathTooLong {
                    max: MAX_PATH_LENGTH,
                });
            }
            return Err(FableError::BlobOverrun(what));
        };
        let bytes = &self.data[start..start + nul];
        self.pos = start + nul + 1;
        String::from_utf8(bytes.to_vec()).map_err(|_| FableError::BlobOverrun(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut out = OutputBlob::new();
        out.write_u32(0xdead_beef);
        out.write_f32(1.5);
        out.write_bool(true);
        out.write_i32(-7);

        let mut input = InputBlob::new(out.as_slice());
        assert_eq!(input.read_u32("a").unwrap(), 0xdead_beef);
        assert!((input.read_f32("b").unwrap() - 1.5).abs() < f32::EPSILON);
        assert!(input.read_bool("c").unwrap());
        assert_eq!(input.read_i32("d").unwrap(), -7);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn path_round_trip_and_empty() {
        let mut out = OutputBlob::new();
        out.write_path("models/ragdoll.json").unwrap();
        out.write_path("").unwrap();

        let mut input = InputBlob::new(out.as_slice());
        assert_eq!(input.read_path("path").unwrap(), "models/ragdoll.json");
        assert_eq!(input.read_path("path").unwrap(), "");
    }

    #[test]
    fn overlong_path_rejected() {
        let mut out = OutputBlob::new();
        let long = "x".repeat(MAX_PATH_LENGTH);
        assert!(matches!(
            out.write_path(&long),
            Err(FableError::PathTooLong { .. })
        ));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut out = OutputBlob::new();
        out.write_u32(1);
        let mut input = InputBlob::new(&out.as_slice()[..2]);
        assert!(matches!(
            input.read_u32("value"),
            Err(FableError::BlobOverrun("value"))
        ));
    }
}
