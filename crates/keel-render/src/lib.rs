//! wgpu deferred renderer: capability probing, canvas-sized targets, the
//! shadow, G-buffer, occlusion, environment, reflection, lighting and post
//! passes, and the orchestrator that sequences them per frame.

pub mod buffer;
pub mod camera;
pub mod composite;
pub mod environment;
pub mod frame;
pub mod fullscreen;
pub mod gbuffer;
pub mod gpu;
pub mod orchestrator;
pub mod scene_gpu;
pub mod shader;
pub mod shadow;
pub mod slots;
pub mod ssao;
pub mod ssr;
pub mod stats;
pub mod targets;
pub mod texture;
pub mod tonemap;

pub use buffer::{MeshBuffer, VertexPositionNormalUv};
pub use camera::OrbitCamera;
pub use environment::{EnvironmentBaker, EnvironmentMaps};
pub use frame::{DirtyFlags, Effects, FramePlan, FrameState, FrameUniforms};
pub use gpu::{
    GpuCapabilities, HDR_FORMAT, RenderContext, RenderContextError, SurfaceError,
    init_render_context_blocking,
};
pub use orchestrator::{
    CapturedFrame, FrameOrchestrator, OrchestratorState, RenderError, RenderSettings,
};
pub use scene_gpu::{SceneGpu, missing_textures};
pub use shader::ShaderError;
pub use slots::{SamplerSlot, TextureSlot};
pub use ssao::SsaoSettings;
pub use ssr::SsrSettings;
pub use stats::{DrawStats, PassId};
pub use targets::{RenderTargets, TargetKind};
pub use texture::{TextureCache, TextureError};
