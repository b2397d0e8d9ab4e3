//! Utility Module
//!
//! Small infrastructure shared by the animation and physics scenes:
//!
//! - [`hash`]: 32-bit name hashing for bone names, input names and event types
//! - [`blob`]: binary output/input streams used for scene serialization and
//!   the per-tick event stream wire format

pub mod blob;
pub mod hash;
