//! Screen-space reflections.
//!
//! Marches the view-space reflection ray across the G-buffer positions and
//! samples last frame's lit colour at the hit. Misses and rough surfaces fall
//! back to the prefiltered environment; the alpha channel carries how much of
//! the result came from the screen.

use bytemuck::{Pod, Zeroable};

use crate::environment::EnvironmentMaps;
use crate::fullscreen::{FullscreenDesc, FullscreenPass};
use crate::gpu::HDR_FORMAT;
use crate::shader::ShaderError;
use crate::slots::{PassInputs, SamplerSlot, SharedSamplers, TextureSlot};
use crate::stats::{DrawStats, PassId};
use crate::targets::RenderTargets;

const SSR_INPUTS: PassInputs = PassInputs {
    label: "ssr",
    textures: &[
        TextureSlot::GPosition,
        TextureSlot::GNormal,
        TextureSlot::GMaterial,
        TextureSlot::PrevColor,
        TextureSlot::EnvSpecular,
    ],
    samplers: &[SamplerSlot::Linear],
};

const SSR_WGSL: &str = r#"
struct SsrParams {
    // steps, stride, thickness, max distance
    march: vec4<f32>,
    // x = edge fade width, y = roughness cutoff
    fade: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var<uniform> params: SsrParams;

fn to_uv(p: vec3<f32>) -> vec3<f32> {
    let clip = frame.proj * vec4<f32>(p, 1.0);
    let ndc = clip.xy / clip.w;
    return vec3<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, clip.w);
}

@fragment
fn fs_ssr(in: FullscreenOut) -> @location(0) vec4<f32> {
    let pos = textureSampleLevel(g_position, linear_sampler, in.uv, 0.0);
    if pos.w < 0.5 {
        return vec4<f32>(0.0);
    }
    let n = normalize(textureSampleLevel(g_normal, linear_sampler, in.uv, 0.0).xyz);
    let roughness = textureSampleLevel(g_material, linear_sampler, in.uv, 0.0).g;
    let v = normalize(pos.xyz);
    let r = reflect(v, n);

    let r_world = (frame.inv_view * vec4<f32>(r, 0.0)).xyz;
    let env = textureSampleLevel(env_specular, linear_sampler, r_world, roughness * frame.effects.w).rgb;
    let cutoff = params.fade.y;
    if roughness >= cutoff {
        return vec4<f32>(env, 0.0);
    }

    let steps = max(u32(params.march.x), 1u);
    let step_len = params.march.w / f32(steps) * params.march.y;
    let thickness = params.march.z;
    var p = pos.xyz + n * 0.01;
    var hit_uv = vec2<f32>(0.0);
    var hit_step = -1.0;
    for (var i = 0u; i < steps; i = i + 1u) {
        p = p + r * step_len;
        let proj = to_uv(p);
        if proj.z <= 0.0 || any(proj.xy < vec2<f32>(0.0)) || any(proj.xy > vec2<f32>(1.0)) {
            break;
        }
        let scene = textureSampleLevel(g_position, linear_sampler, proj.xy, 0.0);
        if scene.w < 0.5 {
            continue;
        }
        // The ray passed behind the stored surface, within thickness.
        let behind = scene.z - p.z;
        if behind > 0.0 && behind < thickness {
            hit_uv = proj.xy;
            hit_step = f32(i);
            break;
        }
    }
    if hit_step < 0.0 {
        return vec4<f32>(env, 0.0);
    }

    let edge = min(min(hit_uv.x, 1.0 - hit_uv.x), min(hit_uv.y, 1.0 - hit_uv.y));
    let edge_fade = clamp(edge / max(params.fade.x, 1e-4), 0.0, 1.0);
    let distance_fade = 1.0 - hit_step / f32(steps);
    let rough_fade = 1.0 - roughness / cutoff;
    // Rays heading back toward the camera rarely find valid screen data.
    let facing = clamp(-r.z * 2.0, 0.0, 1.0);
    let confidence = clamp(edge_fade * distance_fade * rough_fade * facing, 0.0, 1.0);

    let hit = textureSampleLevel(prev_color, linear_sampler, hit_uv, 0.0).rgb;
    return vec4<f32>(mix(env, hit, confidence), confidence);
}
"#;

/// Ray-march tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsrSettings {
    pub steps: u32,
    pub stride: f32,
    pub thickness: f32,
    pub max_distance: f32,
    pub edge_fade: f32,
    /// Surfaces at least this rough use the environment only.
    pub roughness_cutoff: f32,
}

impl Default for SsrSettings {
    fn default() -> Self {
        Self {
            steps: 48,
            stride: 1.0,
            thickness: 0.15,
            max_distance: 8.0,
            edge_fade: 0.1,
            roughness_cutoff: 0.6,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SsrParams {
    pub march: [f32; 4],
    pub fade: [f32; 4],
}

impl SsrParams {
    pub fn new(s: &SsrSettings) -> Self {
        Self {
            march: [s.steps.max(1) as f32, s.stride, s.thickness, s.max_distance],
            fade: [s.edge_fade, s.roughness_cutoff.max(1e-3), 0.0, 0.0],
        }
    }
}

pub struct SsrPass {
    params: wgpu::Buffer,
    pass: FullscreenPass,
}

impl SsrPass {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame_uniforms: &wgpu::Buffer,
        settings: &SsrSettings,
    ) -> Result<Self, ShaderError> {
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ssr-params"),
            size: std::mem::size_of::<SsrParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&params, 0, bytemuck::bytes_of(&SsrParams::new(settings)));
        let module = FullscreenPass::compile(device, "ssr", Some(&SSR_INPUTS), SSR_WGSL)?;
        let pass = FullscreenPass::new(device, FullscreenDesc {
            label: "ssr",
            inputs: SSR_INPUTS,
            module: &module,
            fragment_entry: "fs_ssr",
            format: HDR_FORMAT,
            frame_uniforms,
            params: Some(&params),
        });
        Ok(Self { params, pass })
    }

    pub fn set_settings(&self, queue: &wgpu::Queue, settings: &SsrSettings) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&SsrParams::new(settings)));
    }

    pub fn rebind(
        &mut self,
        device: &wgpu::Device,
        targets: &RenderTargets,
        environment: &EnvironmentMaps,
        samplers: &SharedSamplers,
    ) {
        self.pass.rebind(
            device,
            |slot| match slot {
                TextureSlot::EnvSpecular => &environment.specular_view,
                other => targets
                    .slot_view(other)
                    .unwrap_or(&environment.specular_view),
            },
            samplers,
        );
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        stats: &mut DrawStats,
    ) {
        self.pass
            .run(encoder, &targets.ssr.view, wgpu::Color::TRANSPARENT, stats, PassId::Ssr);
    }
}
