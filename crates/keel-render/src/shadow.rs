//! Directional shadow map.
//!
//! Renders scene depth from the sun into a square reverse-Z depth texture.
//! The light projection is refitted to the scene bounds whenever the pass
//! runs; the map is kept across frames and only redrawn when the light or
//! the geometry changes.

use std::num::NonZeroU64;

use glam::{Mat4, Vec3};
use keel_lighting::{ShadowUniform, fit_light_to_bounds};
use keel_math::Aabb;

use crate::buffer::VertexPositionNormalUv;
use crate::scene_gpu::{OBJECT_WGSL, SceneGpu};
use crate::shader::{self, ShaderError};
use crate::stats::{CountingPass, DrawStats, PassId};
use crate::targets::{DEPTH_CLEAR, DEPTH_COMPARE, DEPTH_FORMAT};

pub const DEFAULT_SHADOW_RESOLUTION: u32 = 2048;

/// Slope-scaled bias for the caster pass.
/// Negative values push stored depth away from the light in reverse-Z.
pub fn depth_bias_state() -> wgpu::DepthBiasState {
    wgpu::DepthBiasState {
        constant: -2,
        slope_scale: -1.75,
        clamp: 0.0,
    }
}

const SHADOW_WGSL: &str = r#"
struct ShadowUniform {
    light_view_proj: mat4x4<f32>,
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> light: ShadowUniform;

@vertex
fn vs_shadow(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return light.light_view_proj * obj.model * vec4<f32>(position, 1.0);
}
"#;

/// Depth-only pass from the light.
pub struct ShadowPass {
    resolution: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    light_bind_group: wgpu::BindGroup,
    light_view_proj: Mat4,
}

impl ShadowPass {
    pub fn new(
        device: &wgpu::Device,
        object_layout: &wgpu::BindGroupLayout,
        resolution: u32,
    ) -> Result<Self, ShaderError> {
        let resolution = resolution.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow-map"),
            size: wgpu::Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow-uniform"),
            size: std::mem::size_of::<ShadowUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let light_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-light-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<ShadowUniform>() as u64),
                },
                count: None,
            }],
        });
        let light_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-light-bg"),
            layout: &light_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let module = shader::compile(device, "shadow", &format!("{OBJECT_WGSL}\n{SHADOW_WGSL}"))?;
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-pipeline-layout"),
            bind_group_layouts: &[&light_layout, object_layout],
            immediate_size: 0,
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-depth-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_shadow"),
                buffers: &[VertexPositionNormalUv::position_only_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                // Front-face culling reduces acne on lit surfaces.
                cull_mode: Some(wgpu::Face::Front),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: DEPTH_COMPARE,
                stencil: wgpu::StencilState::default(),
                bias: depth_bias_state(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: None,
            multiview_mask: None,
            cache: None,
        });

        log::info!("Shadow map created at {resolution}x{resolution}");
        Ok(Self {
            resolution,
            texture,
            view,
            pipeline,
            uniform_buffer,
            light_bind_group,
            light_view_proj: Mat4::IDENTITY,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Uniform read by the composite pass as well.
    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    pub fn light_view_proj(&self) -> Mat4 {
        self.light_view_proj
    }

    /// Fit the light to `bounds` and upload the shadow uniform. `direction`
    /// points from the sun toward the scene.
    pub fn update(&mut self, queue: &wgpu::Queue, direction: Vec3, bounds: Option<Aabb>, enabled: bool) {
        let bounds = bounds.unwrap_or(Aabb::EMPTY);
        self.light_view_proj = fit_light_to_bounds(direction, &bounds, self.resolution);
        let uniform = ShadowUniform::new(self.light_view_proj, self.resolution, enabled);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    /// Redraw the map from the uploaded scene.
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, scene: &SceneGpu, stats: &mut DrawStats) {
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shadow-pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(DEPTH_CLEAR),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        let mut pass = CountingPass::new(pass, stats, PassId::Shadow);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.light_bind_group);
        scene.draw_depth(&mut pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;

    #[test]
    fn test_bias_moves_casters_away_from_light() {
        // Nearer depths win the comparison, so the bias must lower stored depth.
        assert_eq!(DEPTH_COMPARE, wgpu::CompareFunction::GreaterEqual);
        assert_eq!(DEPTH_CLEAR, 0.0);
        let bias = depth_bias_state();
        assert!(bias.constant < 0);
        assert!(bias.slope_scale < 0.0);
    }

    #[test]
    fn test_shadow_map_is_square_depth() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let scene = SceneGpu::new(&device, &queue);
        let pass = ShadowPass::new(&device, scene.object_layout(), 512).unwrap();
        assert_eq!(pass.texture().width(), 512);
        assert_eq!(pass.texture().height(), 512);
        assert_eq!(pass.texture().format(), DEPTH_FORMAT);
    }

    #[test]
    fn test_update_fits_bounds() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let scene = SceneGpu::new(&device, &queue);
        let mut pass = ShadowPass::new(&device, scene.object_layout(), 1024).unwrap();
        let bounds = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        pass.update(&queue, Vec3::new(0.2, -1.0, 0.1), Some(bounds), true);
        for c in bounds.corners() {
            let p = pass.light_view_proj().project_point3(c);
            assert!(p.x.abs() <= 1.0 + 1e-4 && p.y.abs() <= 1.0 + 1e-4);
        }
    }
}
