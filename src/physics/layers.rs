//! Collision Layers
//!
//! Up to 32 named layers with a symmetric collision matrix. Every collider
//! carries its layer as a rapier membership group and the matrix row as its
//! filter, so two colliders interact only when their layers are set to
//! collide.

use rapier3d::prelude::{Group, InteractionGroups};

use crate::errors::{FableError, Result};
use crate::utils::blob::{InputBlob, OutputBlob};

/// Hard cap of the layer matrix.
pub const MAX_LAYERS: usize = 32;

/// Named collision layers and their symmetric interaction matrix.
#[derive(Debug, Clone)]
pub struct CollisionLayers {
    names: [String; MAX_LAYERS],
    /// Row per layer; bit `b` set means "collides with layer b".
    filter: [u32; MAX_LAYERS],
    count: usize,
}

impl Default for CollisionLayers {
    fn default() -> Self {
        Self {
            names: std::array::from_fn(|i| format!("Layer{i}")),
            filter: [u32::MAX; MAX_LAYERS],
            count: 2,
        }
    }
}

impl CollisionLayers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Adds a layer, up to [`MAX_LAYERS`]. Returns the new layer's index.
    pub fn add_layer(&mut self) -> Option<usize> {
        if self.count >= MAX_LAYERS {
            return None;
        }
        self.count += 1;
        Some(self.count - 1)
    }

    pub fn remove_layer(&mut self) {
        // at least one layer must remain
        self.count = self.count.saturating_sub(1).max(1);
    }

    #[must_use]
    pub fn name(&self, layer: usize) -> &str {
        &self.names[layer]
    }

    pub fn set_name(&mut self, layer: usize, name: &str) {
        if layer < MAX_LAYERS {
            self.names[layer] = name.to_string();
        }
    }

    #[must_use]
    pub fn can_collide(&self, a: usize, b: usize) -> bool {
        self.filter[a] & (1 << b) != 0
    }

    /// Sets whether layers `a` and `b` collide. Symmetric.
    pub fn set_can_collide(&mut self, a: usize, b: usize, value: bool) {
        if value {
            self.filter[a] |= 1 << b;
            self.filter[b] |= 1 << a;
        } else {
            self.filter[a] &= !(1 << b);
            self.filter[b] &= !(1 << a);
        }
    }

    /// Membership/filter pair for a collider living on `layer`.
    #[must_use]
    pub fn interaction_groups(&self, layer: usize) -> InteractionGroups {
        let layer = layer.min(MAX_LAYERS - 1);
        InteractionGroups::new(
            Group::from_bits_truncate(1 << layer),
            Group::from_bits_truncate(self.filter[layer]),
        )
    }

    pub fn serialize(&self, blob: &mut OutputBlob) -> Result<()> {
        blob.write_u32(self.count as u32);
        for i in 0..self.count {
            blob.write_path(&self.names[i])?;
            blob.write_u32(self.filter[i]);
        }
        Ok(())
    }

    pub fn deserialize(&mut self, blob: &mut InputBlob<'_>) -> Result<()> {
        let count = blob.read_u32("layer count")? as usize;
        if count > MAX_LAYERS {
            return Err(FableError::BlobOverrun("layer count"));
        }
        *self = Self::default();
        self.count = count.max(1);
        for i in 0..count {
            self.names[i] = blob.read_path("layer name")?;
            self.filter[i] = blob.read_u32("layer filter")?;
        }
        Ok(())
    }
}
