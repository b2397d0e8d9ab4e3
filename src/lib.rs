#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]

pub mod animation;
pub mod errors;
pub mod events;
pub mod physics;
pub mod resources;
pub mod skeleton;
pub mod utils;
pub mod world;

pub use animation::AnimationScene;
pub use animation::clip::AnimationClip;
pub use animation::controller::ControllerResource;
pub use animation::ik::IkChain;
pub use animation::property::PropertyAnimation;
pub use errors::{FableError, Result};
pub use events::EventStream;
pub use physics::PhysicsScene;
pub use resources::{ResourceServer, ResourceState, ResourceStorage};
pub use skeleton::{Pose, Skeleton};
pub use utils::blob::{InputBlob, OutputBlob};
pub use world::{Entity, Transform, World};
