//! Geometry pass: view-space position, normal, albedo and surface parameters
//! into four colour attachments.

use crate::buffer::VertexPositionNormalUv;
use crate::fullscreen::frame_params_layout;
use crate::scene_gpu::{OBJECT_WGSL, SceneGpu};
use crate::shader::{self, ShaderError};
use crate::stats::{CountingPass, DrawStats, PassId};
use crate::targets::{
    DEPTH_CLEAR, DEPTH_COMPARE, DEPTH_FORMAT, GBUFFER_ALBEDO_FORMAT, GBUFFER_MATERIAL_FORMAT,
    GBUFFER_NORMAL_FORMAT, RenderTargets,
};

const GBUFFER_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> frame: FrameUniforms;

struct MaterialUniform {
    base_color: vec4<f32>,
    // x = metallic, y = roughness, z = normal map bound
    surface: vec4<f32>,
};

@group(2) @binding(0) var<uniform> material: MaterialUniform;
@group(2) @binding(1) var base_tex: texture_2d<f32>;
@group(2) @binding(2) var base_sampler: sampler;
@group(2) @binding(3) var surface_tex: texture_2d<f32>;
@group(2) @binding(4) var surface_sampler: sampler;
@group(2) @binding(5) var normal_tex: texture_2d<f32>;
@group(2) @binding(6) var normal_sampler: sampler;

struct VertexIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) view_pos: vec3<f32>,
    @location(1) view_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct GBufferOut {
    @location(0) position: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) albedo: vec4<f32>,
    @location(3) material: vec4<f32>,
};

@vertex
fn vs_gbuffer(in: VertexIn) -> VertexOut {
    let world = obj.model * vec4<f32>(in.position, 1.0);
    let view_pos = frame.view * world;
    let world_normal = (obj.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz;
    var out: VertexOut;
    out.clip = frame.proj * view_pos;
    out.view_pos = view_pos.xyz;
    out.view_normal = (frame.view * vec4<f32>(world_normal, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}

fn srgb_to_linear(c: vec3<f32>) -> vec3<f32> {
    let lo = c / 12.92;
    let hi = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
    return select(hi, lo, c <= vec3<f32>(0.04045));
}

// Tangent frame from screen-space derivatives; needs no vertex tangents.
fn cotangent_frame(n: vec3<f32>, p: vec3<f32>, uv: vec2<f32>) -> mat3x3<f32> {
    let dp1 = dpdx(p);
    let dp2 = dpdy(p);
    let duv1 = dpdx(uv);
    let duv2 = dpdy(uv);
    let dp2perp = cross(dp2, n);
    let dp1perp = cross(n, dp1);
    let t = dp2perp * duv1.x + dp1perp * duv2.x;
    let b = dp2perp * duv1.y + dp1perp * duv2.y;
    let inv_max = inverseSqrt(max(max(dot(t, t), dot(b, b)), 1e-12));
    return mat3x3<f32>(t * inv_max, b * inv_max, n);
}

@fragment
fn fs_gbuffer(in: VertexOut, @builtin(front_facing) front: bool) -> GBufferOut {
    let geo_n = normalize(in.view_normal);
    let n = select(-geo_n, geo_n, front);

    let base = textureSample(base_tex, base_sampler, in.uv);
    let surface = textureSample(surface_tex, surface_sampler, in.uv);
    let mapped = textureSample(normal_tex, normal_sampler, in.uv).xyz * 2.0 - 1.0;
    let tbn = cotangent_frame(n, in.view_pos, in.uv);
    let shading_n = select(n, normalize(tbn * mapped), material.surface.z > 0.5);

    let metallic = clamp(material.surface.x * surface.b, 0.0, 1.0);
    let roughness = clamp(material.surface.y * surface.g, 0.04, 1.0);

    var out: GBufferOut;
    // w = 1 marks covered pixels; the clear value leaves background at 0.
    out.position = vec4<f32>(in.view_pos, 1.0);
    out.normal = vec4<f32>(shading_n, 0.0);
    out.albedo = vec4<f32>(
        srgb_to_linear(base.rgb) * material.base_color.rgb,
        base.a * material.base_color.a,
    );
    out.material = vec4<f32>(metallic, roughness, 0.0, 1.0);
    return out;
}
"#;

/// Renders the scene into the G-buffer attachments of [`RenderTargets`].
pub struct GBufferPass {
    culled: wgpu::RenderPipeline,
    double_sided: wgpu::RenderPipeline,
    frame_group: wgpu::BindGroup,
}

impl GBufferPass {
    pub fn new(
        device: &wgpu::Device,
        scene: &SceneGpu,
        frame_uniforms: &wgpu::Buffer,
        position_format: wgpu::TextureFormat,
    ) -> Result<Self, ShaderError> {
        let source = shader::compose(None, &format!("{OBJECT_WGSL}\n{GBUFFER_WGSL}"));
        let module = shader::compile(device, "gbuffer", &source)?;

        let frame_layout = frame_params_layout(device, "gbuffer", false);
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gbuffer-frame-bg"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_uniforms.as_entire_binding(),
            }],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("gbuffer-layout"),
            bind_group_layouts: &[&frame_layout, scene.object_layout(), scene.material_layout()],
            immediate_size: 0,
        });

        let formats = [
            position_format,
            GBUFFER_NORMAL_FORMAT,
            GBUFFER_ALBEDO_FORMAT,
            GBUFFER_MATERIAL_FORMAT,
        ];
        let targets: Vec<Option<wgpu::ColorTargetState>> = formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let build = |label: &str, cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_gbuffer"),
                    buffers: &[VertexPositionNormalUv::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: DEPTH_COMPARE,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_gbuffer"),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview_mask: None,
                cache: None,
            })
        };

        Ok(Self {
            culled: build("gbuffer-pipeline", Some(wgpu::Face::Back)),
            double_sided: build("gbuffer-double-sided-pipeline", None),
            frame_group,
        })
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        scene: &SceneGpu,
        stats: &mut DrawStats,
    ) {
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("gbuffer-pass"),
            color_attachments: &[
                attachment(&targets.position.view),
                attachment(&targets.normal.view),
                attachment(&targets.albedo.view),
                attachment(&targets.material.view),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth.view,
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
        let mut pass = CountingPass::new(pass, stats, PassId::GBuffer);
        pass.set_bind_group(0, &self.frame_group);
        scene.draw_gbuffer(&mut pass, &self.culled, &self.double_sided);
    }
}

fn attachment(view: &wgpu::TextureView) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            store: wgpu::StoreOp::Store,
        },
        depth_slice: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;

    #[test]
    fn test_pipelines_build() {
        let Some((device, queue, caps)) = create_test_device_queue() else {
            return;
        };
        let scene = SceneGpu::new(&device, &queue);
        let frame = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame"),
            size: std::mem::size_of::<crate::frame::FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        assert!(GBufferPass::new(&device, &scene, &frame, caps.position_format()).is_ok());
    }
}
