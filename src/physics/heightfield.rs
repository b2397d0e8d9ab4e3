//! Terrain Heightfields
//!
//! Static terrain collision from a heightmap resource. The rapier
//! heightfield shape is centered on its body, while terrain entities sit at
//! the grid's corner, so the collider is offset by half the field extents
//! and half the height scale: the terrain then spans the positive X/Z
//! quadrant from the entity, with samples scaled into `[0, y_scale]`.

use rapier3d::na::DMatrix;
use rapier3d::prelude::{ColliderBuilder, ColliderHandle, RigidBodyHandle, Vector};

use crate::resources::Heightmap;
use crate::world::Entity;

/// One terrain component.
pub struct Terrain {
    pub entity: Entity,
    pub heightmap_path: String,
    /// Spacing between grid samples, world units.
    pub xz_scale: f32,
    /// World height of a sample with value 1.
    pub y_scale: f32,
    pub layer: usize,
    pub(crate) body: Option<RigidBodyHandle>,
    pub(crate) collider: Option<ColliderHandle>,
    pub(crate) heightmap_generation: u64,
}

impl Terrain {
    #[must_use]
    pub fn new(entity: Entity, heightmap_path: &str, xz_scale: f32, y_scale: f32) -> Self {
        Self {
            entity,
            heightmap_path: heightmap_path.to_string(),
            xz_scale,
            y_scale,
            layer: 0,
            body: None,
            collider: None,
            heightmap_generation: 0,
        }
    }

    /// Builds the collider, `None` until the heightmap is ready or if the
    /// grid is too small to form a surface.
    pub(crate) fn build_collider(&self, heightmap: &Heightmap) -> Option<ColliderBuilder> {
        if heightmap.width < 2 || heightmap.height < 2 {
            return None;
        }
        // rapier rows run along Z, columns along X; samples are re-centered
        // around zero and the collider shifted up by half the height scale,
        // so a sample value v lands at world height v * y_scale
        let heights = DMatrix::from_fn(heightmap.height, heightmap.width, |row, col| {
            heightmap.value(col, row) - 0.5
        });
        let scale = Vector::new(
            (heightmap.width - 1) as f32 * self.xz_scale,
            self.y_scale,
            (heightmap.height - 1) as f32 * self.xz_scale,
        );
        let offset = Vector::new(scale.x * 0.5, self.y_scale * 0.5, scale.z * 0.5);
        Some(ColliderBuilder::heightfield(heights, scale).translation(offset))
    }
}
