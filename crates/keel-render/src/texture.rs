//! GPU texture cache for material textures: mip generation, wrap-mode
//! samplers and the 1×1 placeholder drawn while a fetch is pending.
//!
//! The cache is keyed by [`TextureKey`] and append-only: a key is uploaded at
//! most once and its texture is shared by every material that references it.

use std::sync::Arc;

use keel_scene::{TextureKey, WrapMode};
use rustc_hash::FxHashMap;

/// Material textures are stored linear; base colour is decoded from sRGB in
/// the shader so one upload serves every role a key is used in.
pub const MATERIAL_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Errors that can occur during texture creation.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error(
        "texture data size ({actual}) does not match expected ({expected}) for {width}x{height}"
    )]
    DataSizeMismatch {
        actual: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    #[error("texture dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },
}

/// Calculates the number of mip levels for the given dimensions.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    (width.max(height).max(1) as f32).log2().floor() as u32 + 1
}

/// An uploaded material texture.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub wrap: WrapMode,
    pub dimensions: (u32, u32),
    pub mip_level_count: u32,
}

/// WGSL for mipmap generation via fullscreen blit.
const BLIT_SHADER_SOURCE: &str = r#"
@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(src_texture, src_sampler, in.uv);
}
"#;

/// Shared, append-only store of material textures.
pub struct TextureCache {
    textures: FxHashMap<TextureKey, Arc<GpuTexture>>,
    placeholder: Arc<GpuTexture>,
    repeat: wgpu::Sampler,
    clamp: wgpu::Sampler,
    mirror: wgpu::Sampler,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline: wgpu::RenderPipeline,
    blit_sampler: wgpu::Sampler,
}

impl TextureCache {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let sampler = |label: &str, mode: wgpu::AddressMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: mode,
                address_mode_v: mode,
                address_mode_w: mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                anisotropy_clamp: 8,
                ..Default::default()
            })
        };
        let repeat = sampler("material-sampler-repeat", wgpu::AddressMode::Repeat);
        let clamp = sampler("material-sampler-clamp", wgpu::AddressMode::ClampToEdge);
        let mirror = sampler("material-sampler-mirror", wgpu::AddressMode::MirrorRepeat);

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
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
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit-shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER_SOURCE.into()),
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit-pipeline-layout"),
            bind_group_layouts: &[&blit_layout],
            immediate_size: 0,
        });
        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mipmap-pipeline"),
            layout: Some(&blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &blit_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &blit_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: MATERIAL_TEXTURE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview_mask: None,
            cache: None,
        });
        let blit_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let placeholder = Arc::new(upload(
            device,
            queue,
            "texture-placeholder",
            &[255, 255, 255, 255],
            1,
            1,
            WrapMode::Repeat,
            1,
        ));

        Self {
            textures: FxHashMap::default(),
            placeholder,
            repeat,
            clamp,
            mirror,
            blit_layout,
            blit_pipeline,
            blit_sampler,
        }
    }

    /// Upload decoded RGBA8 pixels under `key` and generate the mip chain.
    ///
    /// A key that is already cached is returned unchanged; nothing is uploaded
    /// twice.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_rgba8(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        key: &TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
        wrap: WrapMode,
    ) -> Result<Arc<GpuTexture>, TextureError> {
        if let Some(existing) = self.textures.get(key) {
            return Ok(Arc::clone(existing));
        }
        validate(width, height, rgba)?;

        let mips = mip_level_count(width, height);
        let texture = upload(device, queue, key.as_str(), rgba, width, height, wrap, mips);
        if mips > 1 {
            self.generate_mipmaps(device, queue, &texture.texture, mips);
        }
        let texture = Arc::new(texture);
        self.textures.insert(key.clone(), Arc::clone(&texture));
        log::info!("Created texture '{key}' ({width}x{height}, {mips} mips)");
        Ok(texture)
    }

    /// The uploaded texture for `key`, if it has resolved.
    pub fn get(&self, key: &TextureKey) -> Option<&Arc<GpuTexture>> {
        self.textures.get(key)
    }

    /// The resolved texture for `key` or the 1×1 white placeholder.
    pub fn get_or_placeholder(&self, key: Option<&TextureKey>) -> (&GpuTexture, bool) {
        match key.and_then(|k| self.textures.get(k)) {
            Some(tex) => (tex, true),
            None => (&self.placeholder, false),
        }
    }

    pub fn placeholder(&self) -> &GpuTexture {
        &self.placeholder
    }

    pub fn sampler(&self, wrap: WrapMode) -> &wgpu::Sampler {
        match wrap {
            WrapMode::Repeat => &self.repeat,
            WrapMode::Clamp => &self.clamp,
            WrapMode::Mirror => &self.mirror,
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    fn generate_mipmaps(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        mip_count: u32,
    ) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mipmap-encoder"),
        });

        for level in 1..mip_count {
            let src_view = texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level - 1,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let dst_view = texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mipmap-bind-group"),
                layout: &self.blit_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.blit_sampler),
                    },
                ],
            });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mipmap-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        queue.submit(std::iter::once(encoder.finish()));
    }
}

#[allow(clippy::too_many_arguments)]
fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    rgba: &[u8],
    width: u32,
    height: u32,
    wrap: WrapMode,
    mip_level_count: u32,
) -> GpuTexture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: MATERIAL_TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: None,
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        wrap,
        dimensions: (width, height),
        mip_level_count,
    }
}

fn validate(width: u32, height: u32, rgba: &[u8]) -> Result<(), TextureError> {
    if width == 0 || height == 0 {
        return Err(TextureError::ZeroDimensions { width, height });
    }
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(TextureError::DataSizeMismatch {
            actual: rgba.len(),
            expected,
            width,
            height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(512, 128), 10);
        assert_eq!(mip_level_count(300, 200), 9);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        assert!(matches!(
            validate(0, 4, &[]),
            Err(TextureError::ZeroDimensions { .. })
        ));
        assert!(matches!(
            validate(2, 2, &[0; 15]),
            Err(TextureError::DataSizeMismatch {
                expected: 16,
                ..
            })
        ));
        assert!(validate(2, 2, &[0; 16]).is_ok());
    }

    #[test]
    fn test_same_key_uploaded_once() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let mut cache = TextureCache::new(&device, &queue);
        let key = TextureKey::new("textures/hull.png");
        let a = cache
            .insert_rgba8(&device, &queue, &key, 4, 4, &[128; 64], WrapMode::Repeat)
            .unwrap();
        let b = cache
            .insert_rgba8(&device, &queue, &key, 4, 4, &[0; 64], WrapMode::Clamp)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.mip_level_count, 3);
        assert_eq!(b.wrap, WrapMode::Repeat);
    }

    #[test]
    fn test_placeholder_until_resolved() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let mut cache = TextureCache::new(&device, &queue);
        let key = TextureKey::new("deck.png");
        let (tex, resolved) = cache.get_or_placeholder(Some(&key));
        assert!(!resolved);
        assert_eq!(tex.dimensions, (1, 1));

        cache
            .insert_rgba8(&device, &queue, &key, 2, 2, &[255; 16], WrapMode::Mirror)
            .unwrap();
        let (tex, resolved) = cache.get_or_placeholder(Some(&key));
        assert!(resolved);
        assert_eq!(tex.dimensions, (2, 2));
        assert_eq!(tex.wrap, WrapMode::Mirror);
    }
}
