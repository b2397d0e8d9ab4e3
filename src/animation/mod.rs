//! Animation
//!
//! Skeletal and property animation: clip resources, controller graphs with
//! their per-entity runtimes, FABRIK IK, and the [`AnimationScene`] that ties
//! them together into the per-tick pipeline.

pub mod clip;
pub mod controller;
pub mod ik;
pub mod nodes;
pub mod property;
pub mod scene;

pub use scene::{Animable, AnimationScene, AnimationSceneVersion, Animator, PropertyAnimator, SharedAnimator};
