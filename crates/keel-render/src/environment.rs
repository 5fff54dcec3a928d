//! Procedural environment cubemaps.
//!
//! Each bake renders the sky (or the studio backdrop) into mip 0 of a cube,
//! prefilters every further mip from the one above it with a widening cone,
//! and integrates a small cosine-weighted irradiance cube from a mid mip.
//! A bake produces new textures; the caller swaps them in and rebinds.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use keel_lighting::SkyParams;

use crate::fullscreen::fullscreen_pipeline;
use crate::gpu::HDR_FORMAT;
use crate::shader::{self, ShaderError};
use crate::stats::{DrawStats, PassId};
use crate::texture::mip_level_count;

pub const DEFAULT_ENVIRONMENT_SIZE: u32 = 256;
pub const DEFAULT_IRRADIANCE_SIZE: u32 = 32;

/// Mip of the specular cube the irradiance integral reads.
const IRRADIANCE_SOURCE_MIP: u32 = 3;
/// Dynamic-offset stride of face uniforms.
const FACE_STRIDE: u64 = 256;

/// Orientation of one cube face: direction through its centre, and the
/// world directions of increasing u and v.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceBasis {
    pub forward: Vec3,
    pub right: Vec3,
    pub down: Vec3,
}

/// Faces in layer order +X, -X, +Y, -Y, +Z, -Z.
pub const FACES: [FaceBasis; 6] = [
    FaceBasis {
        forward: Vec3::new(1.0, 0.0, 0.0),
        right: Vec3::new(0.0, 0.0, -1.0),
        down: Vec3::new(0.0, -1.0, 0.0),
    },
    FaceBasis {
        forward: Vec3::new(-1.0, 0.0, 0.0),
        right: Vec3::new(0.0, 0.0, 1.0),
        down: Vec3::new(0.0, -1.0, 0.0),
    },
    FaceBasis {
        forward: Vec3::new(0.0, 1.0, 0.0),
        right: Vec3::new(1.0, 0.0, 0.0),
        down: Vec3::new(0.0, 0.0, 1.0),
    },
    FaceBasis {
        forward: Vec3::new(0.0, -1.0, 0.0),
        right: Vec3::new(1.0, 0.0, 0.0),
        down: Vec3::new(0.0, 0.0, -1.0),
    },
    FaceBasis {
        forward: Vec3::new(0.0, 0.0, 1.0),
        right: Vec3::new(1.0, 0.0, 0.0),
        down: Vec3::new(0.0, -1.0, 0.0),
    },
    FaceBasis {
        forward: Vec3::new(0.0, 0.0, -1.0),
        right: Vec3::new(-1.0, 0.0, 0.0),
        down: Vec3::new(0.0, -1.0, 0.0),
    },
];

/// World direction through texture coordinate `(u, v)` of `face`.
pub fn face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    let b = &FACES[face];
    (b.forward + b.right * (u * 2.0 - 1.0) + b.down * (v * 2.0 - 1.0)).normalize()
}

/// Face and texture coordinate a direction lands on.
pub fn direction_to_face(dir: Vec3) -> (usize, f32, f32) {
    let (face, basis) = FACES
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| dir.dot(a.forward).total_cmp(&dir.dot(b.forward)))
        .unwrap_or((0, &FACES[0]));
    let depth = dir.dot(basis.forward).max(f32::EPSILON);
    let s = dir.dot(basis.right) / depth;
    let t = dir.dot(basis.down) / depth;
    (face, (s + 1.0) * 0.5, (t + 1.0) * 0.5)
}

const ENVIRONMENT_WGSL: &str = r#"
struct FaceUniform {
    forward: vec4<f32>,
    right: vec4<f32>,
    down: vec4<f32>,
    // x = roughness, y = source mip
    params: vec4<f32>,
};

struct SkyParams {
    sun: vec4<f32>,
    sun_color: vec4<f32>,
    zenith: vec4<f32>,
    horizon: vec4<f32>,
    ground: vec4<f32>,
};

@group(0) @binding(0) var<uniform> face: FaceUniform;
@group(0) @binding(1) var<uniform> sky: SkyParams;
@group(1) @binding(0) var src_cube: texture_cube<f32>;
@group(1) @binding(1) var src_sampler: sampler;

const PI: f32 = 3.14159265;

fn face_direction(uv: vec2<f32>) -> vec3<f32> {
    let st = uv * 2.0 - 1.0;
    return normalize(face.forward.xyz + st.x * face.right.xyz + st.y * face.down.xyz);
}

fn tangent_basis(n: vec3<f32>) -> mat3x3<f32> {
    let up = select(vec3<f32>(0.0, 1.0, 0.0), vec3<f32>(1.0, 0.0, 0.0), abs(n.y) > 0.99);
    let t = normalize(cross(up, n));
    return mat3x3<f32>(t, cross(n, t), n);
}

fn studio_radiance(d: vec3<f32>) -> vec3<f32> {
    let softbox = smoothstep(0.75, 0.9, d.y);
    let walls = mix(sky.horizon.xyz, sky.zenith.xyz * 0.35, smoothstep(0.0, 0.75, d.y));
    let above = mix(walls, sky.zenith.xyz, softbox);
    let floor_color = mix(sky.ground.xyz, sky.horizon.xyz, smoothstep(-0.2, 0.0, d.y));
    return select(floor_color, above, d.y >= 0.0);
}

fn sky_radiance(d: vec3<f32>) -> vec3<f32> {
    var color = mix(sky.horizon.xyz, sky.zenith.xyz, pow(clamp(d.y, 0.0, 1.0), 0.45));
    color = mix(sky.ground.xyz, color, smoothstep(-0.15, 0.0, d.y));

    let cos_sun = dot(d, normalize(sky.sun.xyz));
    let cover = sky.sun_color.w;
    let disc = smoothstep(0.9995, 0.9999, cos_sun) * (1.0 - cover) * 20.0;
    let halo = pow(max(cos_sun, 0.0), 64.0) * 0.25 + pow(max(cos_sun, 0.0), 8.0) * 0.05;
    let visible = smoothstep(-0.05, 0.02, d.y);
    return color + sky.sun_color.xyz * sky.sun.w * (disc + halo) * visible;
}

@fragment
fn fs_sky(in: FullscreenOut) -> @location(0) vec4<f32> {
    let d = face_direction(in.uv);
    let studio = sky.ground.w > 0.5;
    return vec4<f32>(select(sky_radiance(d), studio_radiance(d), studio), 1.0);
}

@fragment
fn fs_prefilter(in: FullscreenOut) -> @location(0) vec4<f32> {
    let n = face_direction(in.uv);
    let basis = tangent_basis(n);
    let roughness = face.params.x;
    let spread = roughness * roughness * 0.9 + 0.02;
    let mip = face.params.y;
    var sum = textureSampleLevel(src_cube, src_sampler, n, mip).rgb * 2.0;
    var weight = 2.0;
    for (var i = 0; i < 8; i = i + 1) {
        let a = f32(i) * (PI / 4.0);
        let offset = (cos(a) * basis[0] + sin(a) * basis[1]) * spread;
        sum = sum + textureSampleLevel(src_cube, src_sampler, normalize(n + offset), mip).rgb;
        weight = weight + 1.0;
    }
    return vec4<f32>(sum / weight, 1.0);
}

@fragment
fn fs_irradiance(in: FullscreenOut) -> @location(0) vec4<f32> {
    let n = face_direction(in.uv);
    let basis = tangent_basis(n);
    let mip = face.params.y;
    var sum = vec3<f32>(0.0);
    for (var p = 0; p < 24; p = p + 1) {
        let phi = (f32(p) + 0.5) / 24.0 * 2.0 * PI;
        for (var q = 0; q < 8; q = q + 1) {
            let theta = (f32(q) + 0.5) / 8.0 * 0.5 * PI;
            let local = vec3<f32>(sin(theta) * cos(phi), sin(theta) * sin(phi), cos(theta));
            let d = basis * local;
            sum = sum + textureSampleLevel(src_cube, src_sampler, d, mip).rgb * cos(theta) * sin(theta);
        }
    }
    return vec4<f32>(PI * sum / 192.0, 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FaceUniform {
    forward: [f32; 4],
    right: [f32; 4],
    down: [f32; 4],
    params: [f32; 4],
}

impl FaceUniform {
    fn new(face: usize, roughness: f32, source_mip: f32) -> Self {
        let b = &FACES[face];
        Self {
            forward: b.forward.extend(0.0).to_array(),
            right: b.right.extend(0.0).to_array(),
            down: b.down.extend(0.0).to_array(),
            params: [roughness, source_mip, 0.0, 0.0],
        }
    }
}

/// Baked specular and irradiance cubes.
pub struct EnvironmentMaps {
    pub specular: wgpu::Texture,
    pub specular_view: wgpu::TextureView,
    pub irradiance: wgpu::Texture,
    pub irradiance_view: wgpu::TextureView,
}

impl EnvironmentMaps {
    /// Highest mip of the specular cube, i.e. the roughest level.
    pub fn max_mip(&self) -> f32 {
        (self.specular.mip_level_count() - 1) as f32
    }
}

/// Pipelines and constant per-face uniforms for baking.
pub struct EnvironmentBaker {
    size: u32,
    irradiance_size: u32,
    mip_count: u32,
    _face_buffer: wgpu::Buffer,
    sky_buffer: wgpu::Buffer,
    face_group: wgpu::BindGroup,
    source_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    sky_pipeline: wgpu::RenderPipeline,
    prefilter_pipeline: wgpu::RenderPipeline,
    irradiance_pipeline: wgpu::RenderPipeline,
}

impl EnvironmentBaker {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: u32,
        irradiance_size: u32,
    ) -> Result<Self, ShaderError> {
        let size = size.max(1);
        let irradiance_size = irradiance_size.max(1);
        let mip_count = mip_level_count(size, size);

        // One slot per (stage, face): sky, then each prefiltered mip, then irradiance.
        let stages = mip_count as u64 + 1;
        let face_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("environment-faces"),
            size: stages * 6 * FACE_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        for stage in 0..stages {
            for face in 0..6 {
                let uniform = if stage == 0 {
                    FaceUniform::new(face, 0.0, 0.0)
                } else if stage < mip_count as u64 {
                    let roughness = stage as f32 / (mip_count - 1).max(1) as f32;
                    FaceUniform::new(face, roughness, 0.0)
                } else {
                    FaceUniform::new(face, 1.0, 0.0)
                };
                let offset = (stage * 6 + face as u64) * FACE_STRIDE;
                queue.write_buffer(&face_buffer, offset, bytemuck::bytes_of(&uniform));
            }
        }
        let sky_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("environment-sky"),
            size: std::mem::size_of::<SkyParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let face_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("environment-face-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(std::mem::size_of::<FaceUniform>() as u64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let face_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("environment-face-bg"),
            layout: &face_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &face_buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<FaceUniform>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sky_buffer.as_entire_binding(),
                },
            ],
        });
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("environment-source-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("environment-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        let module = shader::compile(device, "environment", &shader::compose(None, ENVIRONMENT_WGSL))?;
        let sky_pipeline = fullscreen_pipeline(
            device,
            "environment-sky",
            &module,
            "fs_sky",
            &[&face_layout],
            HDR_FORMAT,
            None,
        );
        let prefilter_pipeline = fullscreen_pipeline(
            device,
            "environment-prefilter",
            &module,
            "fs_prefilter",
            &[&face_layout, &source_layout],
            HDR_FORMAT,
            None,
        );
        let irradiance_pipeline = fullscreen_pipeline(
            device,
            "environment-irradiance",
            &module,
            "fs_irradiance",
            &[&face_layout, &source_layout],
            HDR_FORMAT,
            None,
        );

        Ok(Self {
            size,
            irradiance_size,
            mip_count,
            _face_buffer: face_buffer,
            sky_buffer,
            face_group,
            source_layout,
            sampler,
            sky_pipeline,
            prefilter_pipeline,
            irradiance_pipeline,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Render fresh cubes for `sky`.
    pub fn bake(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        sky: &SkyParams,
        stats: &mut DrawStats,
    ) -> EnvironmentMaps {
        queue.write_buffer(&self.sky_buffer, 0, bytemuck::bytes_of(sky));

        let specular = cube_texture(device, "environment-specular", self.size, self.mip_count);
        let irradiance = cube_texture(device, "environment-irradiance", self.irradiance_size, 1);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("environment-bake"),
        });

        for face in 0..6u32 {
            let target = face_view(&specular, 0, face);
            self.draw_face(&mut encoder, &self.sky_pipeline, &target, None, 0, face);
            stats.record(PassId::Environment, 1);
        }

        for mip in 1..self.mip_count {
            let source = self.source_group(device, &specular, mip - 1);
            for face in 0..6u32 {
                let target = face_view(&specular, mip, face);
                self.draw_face(
                    &mut encoder,
                    &self.prefilter_pipeline,
                    &target,
                    Some(&source),
                    mip,
                    face,
                );
                stats.record(PassId::Environment, 1);
            }
        }

        let source_mip = IRRADIANCE_SOURCE_MIP.min(self.mip_count - 1);
        let source = self.source_group(device, &specular, source_mip);
        for face in 0..6u32 {
            let target = face_view(&irradiance, 0, face);
            self.draw_face(
                &mut encoder,
                &self.irradiance_pipeline,
                &target,
                Some(&source),
                self.mip_count,
                face,
            );
            stats.record(PassId::Environment, 1);
        }

        queue.submit(std::iter::once(encoder.finish()));
        log::info!(
            "Environment baked ({} mode, {}px, {} mips)",
            if sky.is_studio() { "studio" } else { "sky" },
            self.size,
            self.mip_count
        );

        let specular_view = cube_view(&specular, 0, self.mip_count);
        let irradiance_view = cube_view(&irradiance, 0, 1);
        EnvironmentMaps {
            specular,
            specular_view,
            irradiance,
            irradiance_view,
        }
    }

    fn source_group(&self, device: &wgpu::Device, cube: &wgpu::Texture, mip: u32) -> wgpu::BindGroup {
        let view = cube_view(cube, mip, 1);
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("environment-source-bg"),
            layout: &self.source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn draw_face(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        target: &wgpu::TextureView,
        source: Option<&wgpu::BindGroup>,
        stage: u32,
        face: u32,
    ) {
        let offset = (u64::from(stage) * 6 + u64::from(face)) * FACE_STRIDE;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("environment-face"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.face_group, &[offset as u32]);
        if let Some(source) = source {
            pass.set_bind_group(1, source, &[]);
        }
        pass.draw(0..3, 0..1);
    }
}

fn cube_texture(device: &wgpu::Device, label: &str, size: u32, mips: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 6,
        },
        mip_level_count: mips,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HDR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn cube_view(texture: &wgpu::Texture, base_mip: u32, mips: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("environment-cube-view"),
        dimension: Some(wgpu::TextureViewDimension::Cube),
        base_mip_level: base_mip,
        mip_level_count: Some(mips),
        base_array_layer: 0,
        array_layer_count: Some(6),
        ..Default::default()
    })
}

fn face_view(texture: &wgpu::Texture, mip: u32, face: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("environment-face-view"),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: mip,
        mip_level_count: Some(1),
        base_array_layer: face,
        array_layer_count: Some(1),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_centres_are_axes() {
        for (i, face) in FACES.iter().enumerate() {
            let d = face_direction(i, 0.5, 0.5);
            assert!(d.abs_diff_eq(face.forward, 1e-6), "face {i}: {d:?}");
        }
    }

    #[test]
    fn test_positive_x_face_orientation() {
        // Left edge of +X looks toward +Z, top edge toward +Y.
        let left = face_direction(0, 0.0, 0.5);
        assert!(left.z > 0.0 && left.x > 0.0);
        let top = face_direction(0, 0.5, 0.0);
        assert!(top.y > 0.0);
    }

    #[test]
    fn test_bases_are_orthonormal() {
        for face in FACES {
            assert!(face.forward.dot(face.right).abs() < 1e-6);
            assert!(face.forward.dot(face.down).abs() < 1e-6);
            assert!(face.right.dot(face.down).abs() < 1e-6);
        }
    }

    #[test]
    fn test_direction_face_round_trip() {
        for face in 0..6 {
            for (u, v) in [(0.5, 0.5), (0.2, 0.7), (0.9, 0.1)] {
                let (f, u2, v2) = direction_to_face(face_direction(face, u, v));
                assert_eq!(f, face);
                assert!((u - u2).abs() < 1e-5 && (v - v2).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_bake_produces_full_mip_chain() {
        let Some((device, queue, _)) = crate::gpu::create_test_device_queue() else {
            return;
        };
        let baker = EnvironmentBaker::new(&device, &queue, 64, 8).unwrap();
        let mut stats = DrawStats::default();
        let maps = baker.bake(&device, &queue, &SkyParams::studio(), &mut stats);
        assert_eq!(maps.specular.mip_level_count(), 7);
        // Six faces for the sky, each prefiltered mip and the irradiance cube.
        assert_eq!(stats.draw_calls(PassId::Environment), 6 * (1 + 6 + 1));
        assert_eq!(maps.specular.depth_or_array_layers(), 6);
        assert_eq!(maps.irradiance.width(), 8);
        assert_eq!(maps.max_mip(), 6.0);
    }
}
