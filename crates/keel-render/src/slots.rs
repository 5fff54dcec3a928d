//! Fixed binding table for screen-space inputs.
//!
//! Every fullscreen pass reads its inputs from bind group 1, and a given input
//! always sits at the same binding number with the same WGSL name no matter
//! which pass reads it. The WGSL declarations are generated from this table,
//! so shader and layout cannot disagree.

use std::fmt::Write;

/// Bind group index shared by all fullscreen pass inputs.
pub const INPUT_GROUP: u32 = 1;

/// A texture read by one or more fullscreen passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    GPosition,
    GNormal,
    GAlbedo,
    GMaterial,
    ShadowMap,
    Ao,
    Ssr,
    PrevColor,
    EnvSpecular,
    EnvIrradiance,
    SsaoNoise,
    Hdr,
    Ldr,
    Final,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 14] = [
        Self::GPosition,
        Self::GNormal,
        Self::GAlbedo,
        Self::GMaterial,
        Self::ShadowMap,
        Self::Ao,
        Self::Ssr,
        Self::PrevColor,
        Self::EnvSpecular,
        Self::EnvIrradiance,
        Self::SsaoNoise,
        Self::Hdr,
        Self::Ldr,
        Self::Final,
    ];

    pub const fn binding(self) -> u32 {
        match self {
            Self::GPosition => 0,
            Self::GNormal => 1,
            Self::GAlbedo => 2,
            Self::GMaterial => 3,
            Self::ShadowMap => 4,
            Self::Ao => 5,
            Self::Ssr => 6,
            Self::PrevColor => 7,
            Self::EnvSpecular => 8,
            Self::EnvIrradiance => 9,
            Self::SsaoNoise => 10,
            Self::Hdr => 11,
            Self::Ldr => 12,
            Self::Final => 13,
        }
    }

    pub const fn wgsl_name(self) -> &'static str {
        match self {
            Self::GPosition => "g_position",
            Self::GNormal => "g_normal",
            Self::GAlbedo => "g_albedo",
            Self::GMaterial => "g_material",
            Self::ShadowMap => "shadow_map",
            Self::Ao => "ao_tex",
            Self::Ssr => "ssr_tex",
            Self::PrevColor => "prev_color",
            Self::EnvSpecular => "env_specular",
            Self::EnvIrradiance => "env_irradiance",
            Self::SsaoNoise => "ssao_noise",
            Self::Hdr => "hdr_tex",
            Self::Ldr => "ldr_tex",
            Self::Final => "final_tex",
        }
    }

    const fn wgsl_type(self) -> &'static str {
        match self {
            Self::ShadowMap => "texture_depth_2d",
            Self::EnvSpecular | Self::EnvIrradiance => "texture_cube<f32>",
            _ => "texture_2d<f32>",
        }
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        let (sample_type, view_dimension) = match self {
            Self::ShadowMap => (
                wgpu::TextureSampleType::Depth,
                wgpu::TextureViewDimension::D2,
            ),
            Self::EnvSpecular | Self::EnvIrradiance => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::Cube,
            ),
            // Rgba32Float, read with textureLoad only.
            Self::SsaoNoise => (
                wgpu::TextureSampleType::Float { filterable: false },
                wgpu::TextureViewDimension::D2,
            ),
            _ => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::D2,
            ),
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding(),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        }
    }
}

/// A sampler shared by fullscreen passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerSlot {
    Linear,
    ShadowCompare,
}

impl SamplerSlot {
    pub const fn binding(self) -> u32 {
        match self {
            Self::Linear => 16,
            Self::ShadowCompare => 17,
        }
    }

    pub const fn wgsl_name(self) -> &'static str {
        match self {
            Self::Linear => "linear_sampler",
            Self::ShadowCompare => "shadow_sampler",
        }
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Self::Linear => wgpu::SamplerBindingType::Filtering,
            Self::ShadowCompare => wgpu::SamplerBindingType::Comparison,
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding(),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(ty),
            count: None,
        }
    }
}

/// Samplers bound through [`SamplerSlot`]s.
pub struct SharedSamplers {
    pub linear: wgpu::Sampler,
    pub shadow_compare: wgpu::Sampler,
}

impl SharedSamplers {
    pub fn new(device: &wgpu::Device) -> Self {
        let linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear-clamp-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        // Reverse-Z: the fragment is lit when it is at least as close to the
        // light as the stored occluder.
        let shadow_compare = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow-compare-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::GreaterEqual),
            ..Default::default()
        });
        Self {
            linear,
            shadow_compare,
        }
    }

    pub fn get(&self, slot: SamplerSlot) -> &wgpu::Sampler {
        match slot {
            SamplerSlot::Linear => &self.linear,
            SamplerSlot::ShadowCompare => &self.shadow_compare,
        }
    }
}

/// The inputs one pass reads from [`INPUT_GROUP`].
#[derive(Clone, Copy, Debug)]
pub struct PassInputs {
    pub label: &'static str,
    pub textures: &'static [TextureSlot],
    pub samplers: &'static [SamplerSlot],
}

impl PassInputs {
    pub fn layout(&self, device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries: Vec<_> = self
            .textures
            .iter()
            .map(|t| t.layout_entry())
            .chain(self.samplers.iter().map(|s| s.layout_entry()))
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{}-inputs-bgl", self.label)),
            entries: &entries,
        })
    }

    /// Bind `view_for(slot)` at each slot's fixed binding.
    pub fn bind_group<'a>(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        view_for: impl Fn(TextureSlot) -> &'a wgpu::TextureView,
        samplers: &'a SharedSamplers,
    ) -> wgpu::BindGroup {
        let entries: Vec<_> = self
            .textures
            .iter()
            .map(|&t| wgpu::BindGroupEntry {
                binding: t.binding(),
                resource: wgpu::BindingResource::TextureView(view_for(t)),
            })
            .chain(self.samplers.iter().map(|&s| wgpu::BindGroupEntry {
                binding: s.binding(),
                resource: wgpu::BindingResource::Sampler(samplers.get(s)),
            }))
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-inputs-bg", self.label)),
            layout,
            entries: &entries,
        })
    }

    /// WGSL `var` declarations for these inputs.
    pub fn wgsl_declarations(&self) -> String {
        let mut out = String::new();
        for t in self.textures {
            let _ = writeln!(
                out,
                "@group({INPUT_GROUP}) @binding({}) var {}: {};",
                t.binding(),
                t.wgsl_name(),
                t.wgsl_type()
            );
        }
        for s in self.samplers {
            let ty = match s {
                SamplerSlot::Linear => "sampler",
                SamplerSlot::ShadowCompare => "sampler_comparison",
            };
            let _ = writeln!(
                out,
                "@group({INPUT_GROUP}) @binding({}) var {}: {ty};",
                s.binding(),
                s.wgsl_name()
            );
        }
        out
    }

    pub fn reads(&self, slot: TextureSlot) -> bool {
        self.textures.contains(&slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_bindings_unique() {
        let mut seen = FxHashSet::default();
        for t in TextureSlot::ALL {
            assert!(seen.insert(t.binding()), "{t:?} collides");
        }
        for s in [SamplerSlot::Linear, SamplerSlot::ShadowCompare] {
            assert!(seen.insert(s.binding()), "{s:?} collides");
        }
    }

    #[test]
    fn test_names_unique() {
        let names: FxHashSet<_> = TextureSlot::ALL.iter().map(|t| t.wgsl_name()).collect();
        assert_eq!(names.len(), TextureSlot::ALL.len());
    }

    #[test]
    fn test_declarations_use_fixed_binding() {
        let a = PassInputs {
            label: "a",
            textures: &[TextureSlot::GPosition, TextureSlot::GNormal],
            samplers: &[],
        };
        let b = PassInputs {
            label: "b",
            textures: &[TextureSlot::Ao, TextureSlot::GPosition],
            samplers: &[SamplerSlot::ShadowCompare],
        };
        let line = "@group(1) @binding(0) var g_position: texture_2d<f32>;";
        assert!(a.wgsl_declarations().contains(line));
        assert!(b.wgsl_declarations().contains(line));
        assert!(
            b.wgsl_declarations()
                .contains("@binding(17) var shadow_sampler: sampler_comparison;")
        );
    }

    #[test]
    fn test_special_types() {
        let decls = PassInputs {
            label: "c",
            textures: &[TextureSlot::ShadowMap, TextureSlot::EnvSpecular],
            samplers: &[],
        }
        .wgsl_declarations();
        assert!(decls.contains("var shadow_map: texture_depth_2d;"));
        assert!(decls.contains("var env_specular: texture_cube<f32>;"));
    }
}
