//! Deferred lighting.
//!
//! Combines the G-buffer with the sun (Cook-Torrance: GGX distribution,
//! Smith geometry, Schlick Fresnel) under a 3×3 PCF shadow, plus image-based
//! ambient from the irradiance cube and either reflections or the prefiltered
//! environment, scaled by ambient occlusion. Pixels without geometry show the
//! environment.

use crate::environment::EnvironmentMaps;
use crate::fullscreen::{FullscreenDesc, FullscreenPass};
use crate::gpu::HDR_FORMAT;
use crate::shader::ShaderError;
use crate::slots::{PassInputs, SamplerSlot, SharedSamplers, TextureSlot};
use crate::stats::{DrawStats, PassId};
use crate::targets::RenderTargets;

const COMPOSITE_INPUTS: PassInputs = PassInputs {
    label: "composite",
    textures: &[
        TextureSlot::GPosition,
        TextureSlot::GNormal,
        TextureSlot::GAlbedo,
        TextureSlot::GMaterial,
        TextureSlot::ShadowMap,
        TextureSlot::Ao,
        TextureSlot::Ssr,
        TextureSlot::EnvSpecular,
        TextureSlot::EnvIrradiance,
    ],
    samplers: &[SamplerSlot::Linear, SamplerSlot::ShadowCompare],
};

const COMPOSITE_WGSL: &str = r#"
struct ShadowUniform {
    light_view_proj: mat4x4<f32>,
    // 1 / resolution, normal offset (texels), PCF radius (texels), enabled
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var<uniform> shadow: ShadowUniform;

const PI: f32 = 3.14159265;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * d * d);
}

fn geometry_schlick_ggx(n_dot_x: f32, k: f32) -> f32 {
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    return geometry_schlick_ggx(n_dot_v, k) * geometry_schlick_ggx(n_dot_l, k);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(1.0 - clamp(cos_theta, 0.0, 1.0), 5.0);
}

// Analytic fit of the split-sum BRDF (Karis).
fn env_brdf(f0: vec3<f32>, roughness: f32, n_dot_v: f32) -> vec3<f32> {
    let c0 = vec4<f32>(-1.0, -0.0275, -0.572, 0.022);
    let c1 = vec4<f32>(1.0, 0.0425, 1.04, -0.04);
    let r = roughness * c0 + c1;
    let a004 = min(r.x * r.x, exp2(-9.28 * n_dot_v)) * r.x + r.y;
    let ab = vec2<f32>(-1.04, 1.04) * a004 + r.zw;
    return f0 * ab.x + vec3<f32>(ab.y);
}

fn shadow_factor(world_pos: vec3<f32>, world_normal: vec3<f32>) -> f32 {
    if shadow.params.w < 0.5 || frame.effects.z < 0.5 {
        return 1.0;
    }
    let m = shadow.light_view_proj;
    let row0 = vec3<f32>(m[0].x, m[1].x, m[2].x);
    let texel_world = 2.0 * shadow.params.x / max(length(row0), 1e-6);
    let p = world_pos + world_normal * texel_world * shadow.params.y;
    let clip = m * vec4<f32>(p, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z < 0.0 || ndc.z > 1.0 {
        return 1.0;
    }
    let texel_step = shadow.params.x * shadow.params.z;
    var lit = 0.0;
    for (var y = -1; y <= 1; y = y + 1) {
        for (var x = -1; x <= 1; x = x + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel_step;
            lit = lit + textureSampleCompareLevel(shadow_map, shadow_sampler, uv + offset, ndc.z);
        }
    }
    return lit / 9.0;
}

fn background(uv: vec2<f32>) -> vec3<f32> {
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let view = frame.inv_proj * vec4<f32>(ndc, 0.5, 1.0);
    let dir_view = normalize(view.xyz / view.w);
    let dir_world = (frame.inv_view * vec4<f32>(dir_view, 0.0)).xyz;
    return textureSampleLevel(env_specular, linear_sampler, dir_world, 0.0).rgb;
}

@fragment
fn fs_composite(in: FullscreenOut) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(in.position.xy);
    let pos = textureLoad(g_position, pixel, 0);
    if pos.w < 0.5 {
        return vec4<f32>(background(in.uv), 1.0);
    }

    let albedo = textureLoad(g_albedo, pixel, 0).rgb;
    let surface = textureLoad(g_material, pixel, 0);
    let metallic = surface.r;
    let roughness = max(surface.g, 0.04);
    let n_view = normalize(textureLoad(g_normal, pixel, 0).xyz);

    let world_pos = (frame.inv_view * vec4<f32>(pos.xyz, 1.0)).xyz;
    let n = normalize((frame.inv_view * vec4<f32>(n_view, 0.0)).xyz);
    let v = normalize(frame.camera_position.xyz - world_pos);
    let l = normalize(frame.sun_direction.xyz);
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    let n_dot_v = max(dot(n, v), 1e-4);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    let d = distribution_ggx(max(dot(n, h), 0.0), roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
    let specular = d * g * f / (4.0 * n_dot_v * n_dot_l + 1e-4);
    let k_d = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    let radiance = frame.sun_color.xyz * frame.sun_direction.w;
    let direct = (k_d * albedo / PI + specular) * radiance * n_dot_l * shadow_factor(world_pos, n);

    let ao = select(1.0, textureLoad(ao_tex, pixel, 0).r, frame.effects.x > 0.5);
    let irradiance = textureSampleLevel(env_irradiance, linear_sampler, n, 0.0).rgb;
    let r = reflect(-v, n);
    let env = textureSampleLevel(env_specular, linear_sampler, r, roughness * frame.effects.w).rgb;
    let reflected = select(env, textureLoad(ssr_tex, pixel, 0).rgb, frame.effects.y > 0.5);
    let brdf = env_brdf(f0, roughness, n_dot_v);
    let k_d_ambient = (vec3<f32>(1.0) - brdf) * (1.0 - metallic);
    let ambient = (k_d_ambient * albedo * irradiance + reflected * brdf) * ao;

    return vec4<f32>(direct + ambient, 1.0);
}
"#;

/// Lights the G-buffer into the HDR target.
pub struct CompositePass {
    pass: FullscreenPass,
}

impl CompositePass {
    pub fn new(
        device: &wgpu::Device,
        frame_uniforms: &wgpu::Buffer,
        shadow_uniform: &wgpu::Buffer,
    ) -> Result<Self, ShaderError> {
        let module =
            FullscreenPass::compile(device, "composite", Some(&COMPOSITE_INPUTS), COMPOSITE_WGSL)?;
        let pass = FullscreenPass::new(device, FullscreenDesc {
            label: "composite",
            inputs: COMPOSITE_INPUTS,
            module: &module,
            fragment_entry: "fs_composite",
            format: HDR_FORMAT,
            frame_uniforms,
            params: Some(shadow_uniform),
        });
        Ok(Self { pass })
    }

    pub fn rebind(
        &mut self,
        device: &wgpu::Device,
        targets: &RenderTargets,
        shadow_map: &wgpu::TextureView,
        environment: &EnvironmentMaps,
        samplers: &SharedSamplers,
    ) {
        self.pass.rebind(
            device,
            |slot| match slot {
                TextureSlot::ShadowMap => shadow_map,
                TextureSlot::EnvIrradiance => &environment.irradiance_view,
                TextureSlot::EnvSpecular => &environment.specular_view,
                other => targets.slot_view(other).unwrap_or(shadow_map),
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
            .run(encoder, &targets.hdr.view, wgpu::Color::BLACK, stats, PassId::Composite);
    }
}

/// Keep this frame's lit colour for next frame's reflections.
pub fn copy_to_previous(encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
    let (width, height) = targets.size();
    encoder.copy_texture_to_texture(
        targets.hdr.texture.as_image_copy(),
        targets.prev_color.texture.as_image_copy(),
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_every_gbuffer_slot() {
        for slot in [
            TextureSlot::GPosition,
            TextureSlot::GNormal,
            TextureSlot::GAlbedo,
            TextureSlot::GMaterial,
            TextureSlot::ShadowMap,
        ] {
            assert!(COMPOSITE_INPUTS.reads(slot), "{slot:?}");
        }
        assert!(!COMPOSITE_INPUTS.reads(TextureSlot::PrevColor));
    }

    #[test]
    fn test_pass_builds() {
        let Some((device, _queue, _)) = crate::gpu::create_test_device_queue() else {
            return;
        };
        let buffer = |size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM,
                mapped_at_creation: false,
            })
        };
        let frame = buffer(std::mem::size_of::<crate::frame::FrameUniforms>());
        let shadow = buffer(std::mem::size_of::<keel_lighting::ShadowUniform>());
        assert!(CompositePass::new(&device, &frame, &shadow).is_ok());
    }
}
