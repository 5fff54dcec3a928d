//! Frame orchestration.
//!
//! [`FrameOrchestrator`] owns every pass and the canvas-sized targets. A
//! resize rebuilds all targets at once and rebinds every pass that reads
//! them; each displayed frame runs only the passes the dirty flags call for,
//! then always composites, tone maps, anti-aliases and presents.

use glam::{Mat4, Vec3};
use keel_lighting::{LightingState, SkyParams};
use keel_scene::{Scene, TextureKey, WrapMode};

use crate::composite::{CompositePass, copy_to_previous};
use crate::environment::{EnvironmentBaker, EnvironmentMaps, DEFAULT_ENVIRONMENT_SIZE, DEFAULT_IRRADIANCE_SIZE};
use crate::frame::{Effects, FramePlan, FrameState, FrameUniforms};
use crate::gbuffer::GBufferPass;
use crate::gpu::GpuCapabilities;
use crate::scene_gpu::SceneGpu;
use crate::shader::ShaderError;
use crate::shadow::{DEFAULT_SHADOW_RESOLUTION, ShadowPass};
use crate::slots::SharedSamplers;
use crate::ssao::{SsaoPass, SsaoSettings};
use crate::ssr::{SsrPass, SsrSettings};
use crate::stats::{DrawStats, PassId};
use crate::targets::RenderTargets;
use crate::texture::TextureError;
use crate::tonemap::PostProcess;

/// Errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Texture(#[from] TextureError),

    /// A frame was requested before the first resize.
    #[error("render targets have not been sized yet")]
    NotSized,

    #[error("frame readback failed: {0}")]
    Readback(String),
}

/// Lifecycle of the target set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Passes built, no targets yet.
    Initializing,
    /// Targets (re)built; the next frame repaints everything.
    Sized { width: u32, height: u32 },
    /// At least one frame rendered at the current size.
    Running,
}

/// Pipeline configuration fixed at construction, except where a setter exists.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub shadow_resolution: u32,
    pub environment_size: u32,
    pub irradiance_size: u32,
    pub exposure: f32,
    pub shadows: bool,
    pub ssao: bool,
    pub ssr: bool,
    pub ssao_settings: SsaoSettings,
    pub ssr_settings: SsrSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_resolution: DEFAULT_SHADOW_RESOLUTION,
            environment_size: DEFAULT_ENVIRONMENT_SIZE,
            irradiance_size: DEFAULT_IRRADIANCE_SIZE,
            exposure: 1.0,
            shadows: true,
            ssao: true,
            ssr: true,
            ssao_settings: SsaoSettings::default(),
            ssr_settings: SsrSettings::default(),
        }
    }
}

/// Tightly packed RGBA8 copy of the final image.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

pub struct FrameOrchestrator {
    state: OrchestratorState,
    caps: GpuCapabilities,
    output_format: wgpu::TextureFormat,
    settings: RenderSettings,
    effects: Effects,
    frame: FrameState,
    frame_buffer: wgpu::Buffer,
    samplers: SharedSamplers,
    scene: SceneGpu,
    shadow: ShadowPass,
    gbuffer: GBufferPass,
    ssao: SsaoPass,
    baker: EnvironmentBaker,
    sky: SkyParams,
    environment: EnvironmentMaps,
    ssr: SsrPass,
    composite: CompositePass,
    post: PostProcess,
    targets: Option<RenderTargets>,
    stats: DrawStats,
}

impl FrameOrchestrator {
    /// Build every pass and bake the initial environment. Shader failures
    /// are fatal.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        caps: GpuCapabilities,
        settings: RenderSettings,
        lighting: &LightingState,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        let effects = effects_for(&settings, &caps);
        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let samplers = SharedSamplers::new(device);
        let scene = SceneGpu::new(device, queue);
        let shadow = ShadowPass::new(device, scene.object_layout(), settings.shadow_resolution)?;
        let gbuffer = GBufferPass::new(device, &scene, &frame_buffer, caps.position_format())?;
        let ssao = SsaoPass::new(device, queue, &frame_buffer, &settings.ssao_settings)?;
        let ssr = SsrPass::new(device, queue, &frame_buffer, &settings.ssr_settings)?;
        let composite = CompositePass::new(device, &frame_buffer, shadow.uniform_buffer())?;
        let post = PostProcess::new(device, &frame_buffer, output_format)?;

        let baker = EnvironmentBaker::new(
            device,
            queue,
            settings.environment_size,
            settings.irradiance_size,
        )?;
        let sky = lighting.sky_params();
        let mut stats = DrawStats::default();
        let environment = baker.bake(device, queue, &sky, &mut stats);

        let mut frame = FrameState::new(*lighting.sun(), settings.exposure);
        frame.flags.environment_dirty = false;

        log::info!(
            "Frame orchestrator ready (shadows={}, ssao={}, ssr={}, output={:?})",
            effects.shadows,
            effects.ssao,
            effects.ssr,
            output_format
        );

        Ok(Self {
            state: OrchestratorState::Initializing,
            caps,
            output_format,
            settings,
            effects,
            frame,
            frame_buffer,
            samplers,
            scene,
            shadow,
            gbuffer,
            ssao,
            baker,
            sky,
            environment,
            ssr,
            composite,
            post,
            targets: None,
            stats,
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Draw calls of the last rendered frame.
    pub fn stats(&self) -> &DrawStats {
        &self.stats
    }

    pub fn targets(&self) -> Option<&RenderTargets> {
        self.targets.as_ref()
    }

    pub fn frame(&self) -> &FrameState {
        &self.frame
    }

    pub fn effects(&self) -> Effects {
        self.effects
    }

    pub fn scene_gpu(&self) -> &SceneGpu {
        &self.scene
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Tear down and rebuild every canvas-sized target, then force a full
    /// repaint.
    pub fn resize(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32) {
        let targets = RenderTargets::new(device, width, height, &self.caps, self.output_format);
        let (width, height) = targets.size();

        self.ssao.rebind(device, queue, &targets, &self.samplers);
        self.ssr
            .rebind(device, &targets, &self.environment, &self.samplers);
        self.composite.rebind(
            device,
            &targets,
            self.shadow.view(),
            &self.environment,
            &self.samplers,
        );
        self.post.rebind(device, &targets, &self.samplers);

        // Old targets drop here, after nothing refers to them.
        self.targets = Some(targets);
        self.frame.flags.scene_changed = true;
        self.frame.flags.ssao_dirty = true;
        self.state = OrchestratorState::Sized { width, height };
        log::info!("Render targets rebuilt at {width}x{height}");
    }

    /// Upload whatever the scene changed since the last sync. Returns whether
    /// anything did.
    pub fn sync_scene(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &mut Scene) -> bool {
        let changes = scene.take_changes();
        if changes.is_empty() {
            return false;
        }
        self.scene.apply_changes(device, queue, scene, &changes);
        if changes.geometry_changed() {
            self.frame.flags.geometry_changed();
        } else {
            self.frame.flags.scene_changed = true;
        }
        log::debug!(
            "Scene synced: -{} +{} primitives, {} materials",
            changes.removed.len(),
            changes.added.len(),
            changes.materials.len()
        );
        true
    }

    /// Upload a fetched material texture. Materials using it are rebound.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        key: &TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
        wrap: WrapMode,
    ) -> Result<(), RenderError> {
        if self
            .scene
            .upload_texture(device, queue, key, width, height, rgba, wrap)?
        {
            self.frame.flags.scene_changed = true;
        }
        Ok(())
    }

    pub fn set_camera(&mut self, view: Mat4, projection: Mat4, position: Vec3) {
        self.frame.set_camera(view, projection, position);
    }

    /// Follow a new weather preset or environment mode.
    pub fn set_lighting(&mut self, lighting: &LightingState) {
        self.frame.set_sun(*lighting.sun());
        let sky = lighting.sky_params();
        if sky != self.sky {
            self.sky = sky;
            self.frame.flags.environment_dirty = true;
        }
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.settings.exposure = exposure;
        self.frame.exposure = exposure;
    }

    /// Switch effects on or off. Effects the adapter cannot run stay off.
    pub fn set_effects(&mut self, shadows: bool, ssao: bool, ssr: bool) {
        self.settings.shadows = shadows;
        self.settings.ssao = ssao;
        self.settings.ssr = ssr;
        let effects = effects_for(&self.settings, &self.caps);
        if effects.shadows && !self.effects.shadows {
            self.frame.flags.shadow_dirty = true;
        }
        if effects.ssao && !self.effects.ssao {
            self.frame.flags.ssao_dirty = true;
        }
        self.effects = effects;
    }

    pub fn set_ssao_settings(&mut self, queue: &wgpu::Queue, settings: SsaoSettings) {
        self.ssao.set_settings(queue, &settings);
        self.settings.ssao_settings = settings;
        self.frame.flags.ssao_dirty = true;
    }

    pub fn set_ssr_settings(&mut self, queue: &wgpu::Queue, settings: SsrSettings) {
        self.ssr.set_settings(queue, &settings);
        self.settings.ssr_settings = settings;
    }

    /// Render one frame into `output`.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output: &wgpu::TextureView,
    ) -> Result<(), RenderError> {
        let Some(targets) = self.targets.as_ref() else {
            return Err(RenderError::NotSized);
        };
        self.stats.reset();
        let plan = FramePlan::new(&self.frame.flags, &self.effects);

        if plan.environment {
            let environment = self.baker.bake(device, queue, &self.sky, &mut self.stats);
            self.ssr
                .rebind(device, targets, &environment, &self.samplers);
            self.composite.rebind(
                device,
                targets,
                self.shadow.view(),
                &environment,
                &self.samplers,
            );
            // The previous cubes are released only now that nothing binds them.
            self.environment = environment;
        }

        let (width, height) = targets.size();
        let uniforms = self
            .frame
            .uniforms(width, height, &self.effects, self.environment.max_mip());
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame"),
        });

        if plan.shadow {
            self.shadow.update(
                queue,
                self.frame.sun.direction,
                self.scene.world_bounds(),
                self.effects.shadows,
            );
            self.shadow.render(&mut encoder, &self.scene, &mut self.stats);
        }
        if plan.gbuffer {
            self.gbuffer
                .render(&mut encoder, targets, &self.scene, &mut self.stats);
        }
        if plan.ssao {
            self.ssao.render(&mut encoder, targets, &mut self.stats);
        }
        if plan.ssr {
            self.ssr.render(&mut encoder, targets, &mut self.stats);
        }
        self.composite.render(&mut encoder, targets, &mut self.stats);
        if self.effects.ssr {
            copy_to_previous(&mut encoder, targets);
        }
        self.post.render(&mut encoder, targets, &mut self.stats);
        self.post.present(&mut encoder, output, &mut self.stats);

        queue.submit(std::iter::once(encoder.finish()));

        plan.settle(&mut self.frame.flags, &self.effects);
        if log::log_enabled!(log::Level::Trace) {
            let ran = plan.passes();
            for pass in PassId::ALL.into_iter().filter(|p| !ran.contains(p)) {
                log::trace!("Skipped pass '{}'", pass.name());
            }
        }
        self.state = OrchestratorState::Running;
        Ok(())
    }

    /// Copy the last final image back to the CPU, e.g. for a thumbnail.
    pub fn capture_frame(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<CapturedFrame, RenderError> {
        let targets = self.targets.as_ref().ok_or(RenderError::NotSized)?;
        let (width, height) = targets.size();
        let bytes_per_pixel = 4u32;
        let unpadded_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame-readback"),
        });
        encoder.copy_texture_to_buffer(
            targets.final_color.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let is_bgra = matches!(
            self.output_format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        let mapped = slice.get_mapped_range();
        let mut rgba = Vec::with_capacity((unpadded_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_row) as usize;
            let row_data = &mapped[start..start + unpadded_row as usize];
            if is_bgra {
                for px in row_data.chunks_exact(4) {
                    rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            } else {
                rgba.extend_from_slice(row_data);
            }
        }
        drop(mapped);
        readback.unmap();

        Ok(CapturedFrame { width, height, rgba })
    }
}

fn effects_for(settings: &RenderSettings, caps: &GpuCapabilities) -> Effects {
    Effects {
        shadows: settings.shadows,
        ssao: settings.ssao,
        ssr: settings.ssr && caps.float32_filterable,
    }
}

impl std::fmt::Debug for FrameOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameOrchestrator")
            .field("state", &self.state)
            .field("effects", &self.effects)
            .field("flags", &self.frame.flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;
    use crate::targets::TargetKind;
    use keel_math::Aabb;
    use keel_scene::{DecodedModel, IndexArray, MaterialSlot, MeshData, NodeData, PrimitiveData};

    const OUTPUT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    fn cube_model() -> DecodedModel {
        let positions: Vec<[f32; 3]> = (0..8)
            .map(|i| {
                [
                    if i & 1 == 0 { -1.0 } else { 1.0 },
                    if i & 2 == 0 { -1.0 } else { 1.0 },
                    if i & 4 == 0 { -1.0 } else { 1.0 },
                ]
            })
            .collect();
        let normals = positions
            .iter()
            .map(|p| glam::Vec3::from(*p).normalize().to_array())
            .collect();
        let primitive = PrimitiveData {
            bounds: Aabb::from_points(positions.iter().map(|p| glam::Vec3::from(*p))).unwrap(),
            normals,
            uvs: vec![[0.0; 2]; 8],
            indices: IndexArray::U16(vec![
                0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 4, 1, 5, 4, 2, 6, 3, 3, 6, 7, 0, 4,
                2, 2, 4, 6, 1, 3, 5, 3, 7, 5,
            ]),
            material: Some(0),
            positions,
        };
        DecodedModel {
            meshes: vec![MeshData {
                name: "hull".into(),
                primitives: vec![primitive],
            }],
            materials: vec![MaterialSlot::default()],
            nodes: vec![NodeData {
                index: 0,
                name: "Hull".into(),
                mesh: Some(0),
                world: Mat4::IDENTITY,
            }],
        }
    }

    fn small_settings() -> RenderSettings {
        RenderSettings {
            shadow_resolution: 256,
            environment_size: 32,
            irradiance_size: 8,
            ..RenderSettings::default()
        }
    }

    fn output(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("test-output"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OUTPUT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    }

    #[test]
    fn test_effects_respect_capabilities() {
        let settings = RenderSettings::default();
        let without = GpuCapabilities {
            float32_filterable: false,
        };
        assert!(!effects_for(&settings, &without).ssr);
        let with = GpuCapabilities {
            float32_filterable: true,
        };
        assert!(effects_for(&settings, &with).ssr);
    }

    #[test]
    fn test_render_before_resize_fails() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let lighting = LightingState::default();
        let mut orch =
            FrameOrchestrator::new(&device, &queue, caps, small_settings(), &lighting, OUTPUT)
                .unwrap();
        assert_eq!(orch.state(), OrchestratorState::Initializing);
        // The environment was baked up front; everything else is pending.
        assert_eq!(orch.frame().flags, crate::frame::DirtyFlags {
            environment_dirty: false,
            ..crate::frame::DirtyFlags::ALL
        });
        let view = output(&device, 4, 4);
        assert!(matches!(
            orch.render(&device, &queue, &view),
            Err(RenderError::NotSized)
        ));
    }

    #[test]
    fn test_resize_rebuilds_every_target() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let lighting = LightingState::default();
        let mut orch =
            FrameOrchestrator::new(&device, &queue, caps, small_settings(), &lighting, OUTPUT)
                .unwrap();
        orch.resize(&device, &queue, 64, 32);
        let view = output(&device, 64, 32);
        orch.render(&device, &queue, &view).unwrap();
        assert_eq!(orch.state(), OrchestratorState::Running);

        orch.resize(&device, &queue, 40, 30);
        assert_eq!(orch.state(), OrchestratorState::Sized { width: 40, height: 30 });
        assert!(orch.frame().flags.scene_changed);
        let targets = orch.targets().unwrap();
        for kind in TargetKind::ALL {
            assert_eq!(targets.target(kind).size(), kind.size_for(40, 30), "{kind:?}");
        }
    }

    #[test]
    fn test_clean_shadow_is_not_redrawn() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let lighting = LightingState::default();
        let mut orch =
            FrameOrchestrator::new(&device, &queue, caps, small_settings(), &lighting, OUTPUT)
                .unwrap();
        let mut scene = Scene::from_model(cube_model());
        assert!(orch.sync_scene(&device, &queue, &mut scene));
        orch.resize(&device, &queue, 32, 32);
        let view = output(&device, 32, 32);

        orch.render(&device, &queue, &view).unwrap();
        assert_eq!(orch.stats().draw_calls(PassId::Shadow), 1);
        assert_eq!(orch.stats().draw_calls(PassId::GBuffer), 1);

        // Only the camera moves: the shadow map is reused.
        let eye = Vec3::new(0.0, 2.0, 6.0);
        orch.set_camera(
            Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            Mat4::perspective_rh(1.0, 1.0, 100.0, 0.1),
            eye,
        );
        orch.render(&device, &queue, &view).unwrap();
        assert!(!orch.frame().flags.shadow_dirty);
        assert_eq!(orch.stats().draw_calls(PassId::Shadow), 0);
        assert_eq!(orch.stats().draw_calls(PassId::GBuffer), 1);
        assert_eq!(orch.stats().draw_calls(PassId::Composite), 1);
        assert_eq!(orch.stats().draw_calls(PassId::Present), 1);

        // Nothing changes: only the fixed passes and reflections draw.
        orch.render(&device, &queue, &view).unwrap();
        assert_eq!(orch.stats().draw_calls(PassId::GBuffer), 0);
        assert_eq!(orch.stats().draw_calls(PassId::Ssao), 0);
        assert_eq!(orch.stats().draw_calls(PassId::Tonemap), 1);
    }

    #[test]
    fn test_lighting_change_rebakes_environment() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let mut lighting = LightingState::default();
        let mut orch =
            FrameOrchestrator::new(&device, &queue, caps, small_settings(), &lighting, OUTPUT)
                .unwrap();
        orch.resize(&device, &queue, 16, 16);
        let view = output(&device, 16, 16);
        orch.render(&device, &queue, &view).unwrap();
        assert_eq!(orch.stats().draw_calls(PassId::Environment), 0);

        lighting.set_preset(keel_lighting::WeatherPreset::Sunset);
        orch.set_lighting(&lighting);
        orch.render(&device, &queue, &view).unwrap();
        assert!(orch.stats().draw_calls(PassId::Environment) > 0);
        assert!(!orch.frame().flags.environment_dirty);
    }

    #[test]
    fn test_capture_returns_canvas_sized_image() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let lighting = LightingState::default();
        let mut orch =
            FrameOrchestrator::new(&device, &queue, caps, small_settings(), &lighting, OUTPUT)
                .unwrap();
        orch.resize(&device, &queue, 70, 10);
        let view = output(&device, 70, 10);
        orch.render(&device, &queue, &view).unwrap();
        let frame = orch.capture_frame(&device, &queue).unwrap();
        assert_eq!((frame.width, frame.height), (70, 10));
        assert_eq!(frame.rgba.len(), 70 * 10 * 4);
    }
}
