//! Post chain: exposure and ACES tone mapping, FXAA, then the blit to the
//! presentable surface.

use crate::fullscreen::{FullscreenDesc, FullscreenPass};
use crate::shader::ShaderError;
use crate::slots::{PassInputs, SamplerSlot, SharedSamplers, TextureSlot};
use crate::stats::{DrawStats, PassId};
use crate::targets::{LDR_FORMAT, RenderTargets};

const TONEMAP_INPUTS: PassInputs = PassInputs {
    label: "tonemap",
    textures: &[TextureSlot::Hdr],
    samplers: &[SamplerSlot::Linear],
};

const FXAA_INPUTS: PassInputs = PassInputs {
    label: "fxaa",
    textures: &[TextureSlot::Ldr],
    samplers: &[SamplerSlot::Linear],
};

const PRESENT_INPUTS: PassInputs = PassInputs {
    label: "present",
    textures: &[TextureSlot::Final],
    samplers: &[SamplerSlot::Linear],
};

const TONEMAP_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> frame: FrameUniforms;

fn aces(x: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((x * (a * x + b)) / (x * (c * x + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_tonemap(in: FullscreenOut) -> @location(0) vec4<f32> {
    let hdr = textureSampleLevel(hdr_tex, linear_sampler, in.uv, 0.0).rgb;
    return vec4<f32>(aces(hdr * frame.camera_position.w), 1.0);
}
"#;

const FXAA_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> frame: FrameUniforms;

const FXAA_REDUCE_MIN: f32 = 0.0078125;
const FXAA_REDUCE_MUL: f32 = 0.125;
const FXAA_SPAN_MAX: f32 = 8.0;

fn fetch(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(ldr_tex, linear_sampler, uv, 0.0).rgb;
}

// Perceptual luma of a linear colour.
fn luma(c: vec3<f32>) -> f32 {
    return sqrt(dot(c, vec3<f32>(0.299, 0.587, 0.114)));
}

@fragment
fn fs_fxaa(in: FullscreenOut) -> @location(0) vec4<f32> {
    let rcp = frame.viewport.zw;
    let rgb_m = fetch(in.uv);
    let luma_nw = luma(fetch(in.uv + vec2<f32>(-1.0, -1.0) * rcp));
    let luma_ne = luma(fetch(in.uv + vec2<f32>(1.0, -1.0) * rcp));
    let luma_sw = luma(fetch(in.uv + vec2<f32>(-1.0, 1.0) * rcp));
    let luma_se = luma(fetch(in.uv + vec2<f32>(1.0, 1.0) * rcp));
    let luma_m = luma(rgb_m);
    let luma_min = min(luma_m, min(min(luma_nw, luma_ne), min(luma_sw, luma_se)));
    let luma_max = max(luma_m, max(max(luma_nw, luma_ne), max(luma_sw, luma_se)));

    var dir = vec2<f32>(
        -((luma_nw + luma_ne) - (luma_sw + luma_se)),
        (luma_nw + luma_sw) - (luma_ne + luma_se),
    );
    let dir_reduce = max((luma_nw + luma_ne + luma_sw + luma_se) * 0.25 * FXAA_REDUCE_MUL, FXAA_REDUCE_MIN);
    let rcp_dir_min = 1.0 / (min(abs(dir.x), abs(dir.y)) + dir_reduce);
    dir = clamp(dir * rcp_dir_min, vec2<f32>(-FXAA_SPAN_MAX), vec2<f32>(FXAA_SPAN_MAX)) * rcp;

    let rgb_a = 0.5 * (fetch(in.uv + dir * (1.0 / 3.0 - 0.5)) + fetch(in.uv + dir * (2.0 / 3.0 - 0.5)));
    let rgb_b = rgb_a * 0.5 + 0.25 * (fetch(in.uv + dir * -0.5) + fetch(in.uv + dir * 0.5));
    let luma_b = luma(rgb_b);
    let outside = luma_b < luma_min || luma_b > luma_max;
    return vec4<f32>(select(rgb_b, rgb_a, outside), 1.0);
}
"#;

const PRESENT_WGSL: &str = r#"
@fragment
fn fs_present(in: FullscreenOut) -> @location(0) vec4<f32> {
    return textureSampleLevel(final_tex, linear_sampler, in.uv, 0.0);
}
"#;

/// CPU mirror of the tone curve, per channel.
pub fn aces(x: f32) -> f32 {
    let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
    ((x * (a * x + b)) / (x * (c * x + d) + e)).clamp(0.0, 1.0)
}

/// Tone map, anti-alias and present passes.
pub struct PostProcess {
    tonemap: FullscreenPass,
    fxaa: FullscreenPass,
    present: FullscreenPass,
}

impl PostProcess {
    pub fn new(
        device: &wgpu::Device,
        frame_uniforms: &wgpu::Buffer,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, ShaderError> {
        let build = |name: &'static str,
                     inputs: PassInputs,
                     body: &str,
                     entry: &str,
                     format: wgpu::TextureFormat|
         -> Result<FullscreenPass, ShaderError> {
            let module = FullscreenPass::compile(device, name, Some(&inputs), body)?;
            Ok(FullscreenPass::new(device, FullscreenDesc {
                label: name,
                inputs,
                module: &module,
                fragment_entry: entry,
                format,
                frame_uniforms,
                params: None,
            }))
        };
        Ok(Self {
            tonemap: build("tonemap", TONEMAP_INPUTS, TONEMAP_WGSL, "fs_tonemap", LDR_FORMAT)?,
            fxaa: build("fxaa", FXAA_INPUTS, FXAA_WGSL, "fs_fxaa", output_format)?,
            present: build("present", PRESENT_INPUTS, PRESENT_WGSL, "fs_present", output_format)?,
        })
    }

    pub fn rebind(&mut self, device: &wgpu::Device, targets: &RenderTargets, samplers: &SharedSamplers) {
        self.tonemap.rebind(device, |_| &targets.hdr.view, samplers);
        self.fxaa.rebind(device, |_| &targets.ldr.view, samplers);
        self.present.rebind(device, |_| &targets.final_color.view, samplers);
    }

    /// HDR to the anti-aliased final image.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        stats: &mut DrawStats,
    ) {
        self.tonemap
            .run(encoder, &targets.ldr.view, wgpu::Color::BLACK, stats, PassId::Tonemap);
        self.fxaa
            .run(encoder, &targets.final_color.view, wgpu::Color::BLACK, stats, PassId::Fxaa);
    }

    /// Blit the final image to `output`.
    pub fn present(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        output: &wgpu::TextureView,
        stats: &mut DrawStats,
    ) {
        self.present
            .run(encoder, output, wgpu::Color::BLACK, stats, PassId::Present);
    }
}
