//! Binary scene container decoding and the CPU-side scene model.
//!
//! [`decode_model`] turns a chunked binary container (JSON description plus one
//! binary chunk) into a [`DecodedModel`] of float attribute streams, index
//! arrays, material slots and a node hierarchy. [`Scene`] owns the runtime node
//! table built from it: name lookups, variant swaps, material option changes
//! and lazily cached world-space bounds for camera framing.

pub mod accessor;
mod container;
mod document;
mod error;
mod material;
mod model;
mod scene;
mod variant;

pub use accessor::{ComponentType, DecodedAccessor, ElementType, IndexArray, decode_accessors};
pub use container::{CHUNK_BIN, CHUNK_JSON, Container, GLB_MAGIC, GLB_VERSION};
pub use error::{DecodeError, SceneError};
pub use material::{ImageSource, MaterialSlot, TextureKey, TextureRef, WrapMode};
pub use model::{DecodedModel, MeshData, NodeData, PrimitiveData, decode_model};
pub use scene::{RenderIndex, Scene, SceneChanges, SceneNode, ScenePrimitive};
pub use variant::{MaterialOption, Variant, VariantCatalog, VariantError};
