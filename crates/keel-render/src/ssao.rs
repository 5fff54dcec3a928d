//! Screen-space ambient occlusion and its separable blur.

use bytemuck::{Pod, Zeroable};
use keel_lighting::{SSAO_KERNEL_SIZE, SSAO_NOISE_DIM, ssao_kernel, ssao_noise};

use crate::fullscreen::{FullscreenDesc, FullscreenPass};
use crate::shader::ShaderError;
use crate::slots::{PassInputs, SamplerSlot, SharedSamplers, TextureSlot};
use crate::stats::{DrawStats, PassId};
use crate::targets::{AO_FORMAT, RenderTargets};

const KERNEL_SEED: u64 = 0x55A0;

const SSAO_INPUTS: PassInputs = PassInputs {
    label: "ssao",
    textures: &[TextureSlot::GPosition, TextureSlot::GNormal, TextureSlot::SsaoNoise],
    samplers: &[],
};

const BLUR_INPUTS: PassInputs = PassInputs {
    label: "ao-blur",
    textures: &[TextureSlot::Ao],
    samplers: &[SamplerSlot::Linear],
};

const SSAO_WGSL: &str = r#"
struct SsaoParams {
    kernel: array<vec4<f32>, 48>,
    // radius, bias, intensity, sample count
    settings: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(0) @binding(1) var<uniform> params: SsaoParams;

fn load_position(uv: vec2<f32>) -> vec4<f32> {
    let dims = vec2<i32>(textureDimensions(g_position));
    let texel = clamp(vec2<i32>(uv * vec2<f32>(dims)), vec2<i32>(0), dims - vec2<i32>(1));
    return textureLoad(g_position, texel, 0);
}

@fragment
fn fs_ssao(in: FullscreenOut) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(in.position.xy);
    let center = textureLoad(g_position, pixel, 0);
    if center.w == 0.0 {
        return vec4<f32>(1.0);
    }
    let n = normalize(textureLoad(g_normal, pixel, 0).xyz);
    let noise_dim = vec2<i32>(textureDimensions(ssao_noise));
    let rnd = textureLoad(ssao_noise, pixel % noise_dim, 0).xyz;
    let tv = rnd - n * dot(rnd, n);
    let fallback = cross(n, vec3<f32>(0.0, 1.0, 0.01));
    let t = normalize(select(tv, fallback, dot(tv, tv) < 1e-6));
    let tbn = mat3x3<f32>(t, cross(n, t), n);

    let radius = params.settings.x;
    let bias = params.settings.y;
    let count = min(u32(params.settings.w), 48u);
    var occlusion = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let sample_pos = center.xyz + (tbn * params.kernel[i].xyz) * radius;
        let clip = frame.proj * vec4<f32>(sample_pos, 1.0);
        let ndc = clip.xy / clip.w;
        let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) {
            continue;
        }
        let scene = load_position(uv);
        if scene.w == 0.0 {
            continue;
        }
        // View space looks down -z: larger z is closer to the camera.
        let range = smoothstep(0.0, 1.0, radius / max(abs(center.z - scene.z), 1e-4));
        occlusion = occlusion + select(0.0, 1.0, scene.z >= sample_pos.z + bias) * range;
    }
    let ao = 1.0 - occlusion / f32(max(count, 1u)) * params.settings.z;
    return vec4<f32>(clamp(ao, 0.0, 1.0), 0.0, 0.0, 1.0);
}
"#;

const BLUR_WGSL: &str = r#"
struct BlurParams {
    // xy = one texel along the blur axis
    direction: vec4<f32>,
};

@group(0) @binding(1) var<uniform> blur: BlurParams;

@fragment
fn fs_blur(in: FullscreenOut) -> @location(0) vec4<f32> {
    var weights = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);
    let texel = blur.direction.xy;
    var sum = textureSample(ao_tex, linear_sampler, in.uv).r * weights[0];
    for (var i = 1; i < 5; i = i + 1) {
        let offset = texel * f32(i);
        sum = sum + textureSample(ao_tex, linear_sampler, in.uv + offset).r * weights[i];
        sum = sum + textureSample(ao_tex, linear_sampler, in.uv - offset).r * weights[i];
    }
    return vec4<f32>(sum, 0.0, 0.0, 1.0);
}
"#;

/// Occlusion tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsaoSettings {
    pub radius: f32,
    pub bias: f32,
    pub intensity: f32,
    pub kernel_size: usize,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            radius: 0.5,
            bias: 0.025,
            intensity: 1.0,
            kernel_size: SSAO_KERNEL_SIZE,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SsaoParams {
    pub kernel: [[f32; 4]; SSAO_KERNEL_SIZE],
    pub settings: [f32; 4],
}

static_assertions::assert_eq_size!(SsaoParams, [u8; 784]);

impl SsaoParams {
    pub fn new(settings: &SsaoSettings) -> Self {
        let count = settings.kernel_size.clamp(1, SSAO_KERNEL_SIZE);
        let mut kernel = [[0.0; 4]; SSAO_KERNEL_SIZE];
        for (dst, sample) in kernel.iter_mut().zip(ssao_kernel(count, KERNEL_SEED)) {
            *dst = sample.to_array();
        }
        Self {
            kernel,
            settings: [settings.radius, settings.bias, settings.intensity, count as f32],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlurParams {
    direction: [f32; 4],
}

/// Occlusion into `ao_raw`, then a horizontal and a vertical blur into `ao`.
pub struct SsaoPass {
    _noise: wgpu::Texture,
    noise_view: wgpu::TextureView,
    params: wgpu::Buffer,
    blur_h_params: wgpu::Buffer,
    blur_v_params: wgpu::Buffer,
    occlusion: FullscreenPass,
    blur_h: FullscreenPass,
    blur_v: FullscreenPass,
}

impl SsaoPass {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame_uniforms: &wgpu::Buffer,
        settings: &SsaoSettings,
    ) -> Result<Self, ShaderError> {
        let noise = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ssao-noise"),
            size: wgpu::Extent3d {
                width: SSAO_NOISE_DIM,
                height: SSAO_NOISE_DIM,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let texels = ssao_noise(SSAO_NOISE_DIM, KERNEL_SEED);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &noise,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(SSAO_NOISE_DIM * 16),
                rows_per_image: Some(SSAO_NOISE_DIM),
            },
            wgpu::Extent3d {
                width: SSAO_NOISE_DIM,
                height: SSAO_NOISE_DIM,
                depth_or_array_layers: 1,
            },
        );
        let noise_view = noise.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform = |label: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let params = uniform("ssao-params", std::mem::size_of::<SsaoParams>());
        let blur_h_params = uniform("ao-blur-h-params", std::mem::size_of::<BlurParams>());
        let blur_v_params = uniform("ao-blur-v-params", std::mem::size_of::<BlurParams>());
        queue.write_buffer(&params, 0, bytemuck::bytes_of(&SsaoParams::new(settings)));

        let ssao_module = FullscreenPass::compile(device, "ssao", Some(&SSAO_INPUTS), SSAO_WGSL)?;
        let blur_module = FullscreenPass::compile(device, "ao-blur", Some(&BLUR_INPUTS), BLUR_WGSL)?;

        let occlusion = FullscreenPass::new(device, FullscreenDesc {
            label: "ssao",
            inputs: SSAO_INPUTS,
            module: &ssao_module,
            fragment_entry: "fs_ssao",
            format: AO_FORMAT,
            frame_uniforms,
            params: Some(&params),
        });
        let blur = |label, params| {
            FullscreenPass::new(device, FullscreenDesc {
                label,
                inputs: BLUR_INPUTS,
                module: &blur_module,
                fragment_entry: "fs_blur",
                format: AO_FORMAT,
                frame_uniforms,
                params: Some(params),
            })
        };
        let blur_h = blur("ao-blur-h", &blur_h_params);
        let blur_v = blur("ao-blur-v", &blur_v_params);

        Ok(Self {
            _noise: noise,
            noise_view,
            params,
            blur_h_params,
            blur_v_params,
            occlusion,
            blur_h,
            blur_v,
        })
    }

    pub fn set_settings(&self, queue: &wgpu::Queue, settings: &SsaoSettings) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&SsaoParams::new(settings)));
    }

    /// Rebuild input bind groups against freshly created targets.
    pub fn rebind(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &RenderTargets,
        samplers: &SharedSamplers,
    ) {
        let (w, h) = targets.ao.size();
        let texel = |x: f32, y: f32| BlurParams {
            direction: [x, y, 0.0, 0.0],
        };
        queue.write_buffer(
            &self.blur_h_params,
            0,
            bytemuck::bytes_of(&texel(1.0 / w as f32, 0.0)),
        );
        queue.write_buffer(
            &self.blur_v_params,
            0,
            bytemuck::bytes_of(&texel(0.0, 1.0 / h as f32)),
        );

        let noise = &self.noise_view;
        self.occlusion.rebind(
            device,
            |slot| match slot {
                TextureSlot::SsaoNoise => noise,
                TextureSlot::GNormal => &targets.normal.view,
                _ => &targets.position.view,
            },
            samplers,
        );
        self.blur_h.rebind(device, |_| &targets.ao_raw.view, samplers);
        self.blur_v.rebind(device, |_| &targets.ao_temp.view, samplers);
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &RenderTargets,
        stats: &mut DrawStats,
    ) {
        self.occlusion
            .run(encoder, &targets.ao_raw.view, wgpu::Color::WHITE, stats, PassId::Ssao);
        self.blur_h
            .run(encoder, &targets.ao_temp.view, wgpu::Color::WHITE, stats, PassId::AoBlur);
        self.blur_v
            .run(encoder, &targets.ao.view, wgpu::Color::WHITE, stats, PassId::AoBlur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_pack_kernel_and_settings() {
        let settings = SsaoSettings {
            kernel_size: 16,
            ..SsaoSettings::default()
        };
        let params = SsaoParams::new(&settings);
        assert_eq!(params.settings[3], 16.0);
        assert!(params.kernel[..16].iter().any(|s| s[2] > 0.0));
        assert!(params.kernel[16..].iter().all(|s| *s == [0.0; 4]));
    }

    #[test]
    fn test_kernel_size_clamped() {
        let params = SsaoParams::new(&SsaoSettings {
            kernel_size: 500,
            ..SsaoSettings::default()
        });
        assert_eq!(params.settings[3], SSAO_KERNEL_SIZE as f32);
    }

    #[test]
    fn test_blur_weights_normalised() {
        let w = [0.227027f32, 0.1945946, 0.1216216, 0.054054, 0.016216];
        let total = w[0] + 2.0 * w[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_pass_builds() {
        let Some((device, queue, _)) = crate::gpu::create_test_device_queue() else {
            return;
        };
        let frame = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame"),
            size: std::mem::size_of::<crate::frame::FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        assert!(SsaoPass::new(&device, &queue, &frame, &SsaoSettings::default()).is_ok());
    }
}
