//! f32 bounding volumes, plane reflection, and scalar blend helpers shared by the keel crates.

mod aabb;
mod interp;
mod plane;

pub use aabb::{Aabb, BoundingSphere};
pub use interp::{lerp, saturate, smoothstep};
pub use plane::{Plane, reflection_matrix};
