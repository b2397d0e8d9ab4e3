//! Resource Layer
//!
//! Path-keyed, asynchronously loaded resources. Each resource kind lives in
//! its own [`ResourceStorage`]; the [`ResourceServer`] owns the storages, a
//! background loader thread and the controller→clip dependency bookkeeping.
//!
//! Scenes never block on a load: they poll storages by generation each tick
//! and lazily initialize runtimes once everything they reference is ready.

pub mod server;
pub mod storage;

pub use server::ResourceServer;
pub use storage::{ResourceState, ResourceStorage};

use glam::Vec3;

/// Grid of terrain height samples, row-major, `width * height` values.
#[derive(Debug, Clone)]
pub struct Heightmap {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f32>,
}

impl Heightmap {
    #[must_use]
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), width * height, "heightmap sample count");
        Self {
            width,
            height,
            values,
        }
    }

    #[must_use]
    pub fn value(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }
}

/// Point cloud collision geometry; actors build a convex hull from it.
#[derive(Debug, Clone)]
pub struct ConvexGeometry {
    pub points: Vec<Vec3>,
}
