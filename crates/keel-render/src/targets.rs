//! Canvas-sized render targets.
//!
//! The whole set is built in one call and replaced as a unit on resize, so no
//! target ever refers to a previous canvas size.

use crate::gpu::{GpuCapabilities, HDR_FORMAT};
use crate::slots::TextureSlot;

/// Depth format for the main and reflection depth buffers.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Reverse-Z: 0 is the far plane.
pub const DEPTH_CLEAR: f32 = 0.0;
/// Reverse-Z: closer fragments have larger depth.
pub const DEPTH_COMPARE: wgpu::CompareFunction = wgpu::CompareFunction::GreaterEqual;

/// Occlusion is computed at full canvas resolution.
pub const AO_DIVISOR: u32 = 1;
/// The planar reflection target is half the canvas in each dimension.
pub const REFLECTION_DIVISOR: u32 = 2;

/// G-buffer attachment formats other than position, in attachment order.
pub const GBUFFER_NORMAL_FORMAT: wgpu::TextureFormat = HDR_FORMAT;
pub const GBUFFER_ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const GBUFFER_MATERIAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const AO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;
pub const LDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Each canvas-sized target, for size queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Depth,
    GPosition,
    GNormal,
    GAlbedo,
    GMaterial,
    AoRaw,
    AoTemp,
    Ao,
    Ssr,
    Hdr,
    PrevColor,
    Ldr,
    Final,
    Reflection,
    ReflectionDepth,
}

impl TargetKind {
    pub const ALL: [TargetKind; 15] = [
        Self::Depth,
        Self::GPosition,
        Self::GNormal,
        Self::GAlbedo,
        Self::GMaterial,
        Self::AoRaw,
        Self::AoTemp,
        Self::Ao,
        Self::Ssr,
        Self::Hdr,
        Self::PrevColor,
        Self::Ldr,
        Self::Final,
        Self::Reflection,
        Self::ReflectionDepth,
    ];

    /// Size of this target for a canvas of `width`×`height`.
    pub fn size_for(self, width: u32, height: u32) -> (u32, u32) {
        let divisor = match self {
            Self::AoRaw | Self::AoTemp | Self::Ao => AO_DIVISOR,
            Self::Reflection | Self::ReflectionDepth => REFLECTION_DIVISOR,
            _ => 1,
        };
        ((width / divisor).max(1), (height / divisor).max(1))
    }
}

/// One texture plus its default view.
pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Target {
    fn new(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

/// Every canvas-sized attachment.
pub struct RenderTargets {
    width: u32,
    height: u32,
    pub depth: Target,
    pub position: Target,
    pub normal: Target,
    pub albedo: Target,
    pub material: Target,
    /// Raw occlusion, then the two halves of the separable blur.
    pub ao_raw: Target,
    pub ao_temp: Target,
    pub ao: Target,
    pub ssr: Target,
    pub hdr: Target,
    /// Last frame's lit colour, read by reflections.
    pub prev_color: Target,
    pub ldr: Target,
    /// Anti-aliased image; copied to the output and to readbacks.
    pub final_color: Target,
    pub reflection: Target,
    pub reflection_depth: Target,
}

impl RenderTargets {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        caps: &GpuCapabilities,
        output_format: wgpu::TextureFormat,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let attach = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        let readable = attach | wgpu::TextureUsages::COPY_SRC;
        let make = |kind: TargetKind, label: &str, format, usage| {
            Target::new(device, label, kind.size_for(width, height), format, usage)
        };

        Self {
            width,
            height,
            depth: make(TargetKind::Depth, "depth-buffer", DEPTH_FORMAT, attach),
            position: make(
                TargetKind::GPosition,
                "gbuffer-position",
                caps.position_format(),
                readable,
            ),
            normal: make(TargetKind::GNormal, "gbuffer-normal", GBUFFER_NORMAL_FORMAT, readable),
            albedo: make(TargetKind::GAlbedo, "gbuffer-albedo", GBUFFER_ALBEDO_FORMAT, readable),
            material: make(
                TargetKind::GMaterial,
                "gbuffer-material",
                GBUFFER_MATERIAL_FORMAT,
                readable,
            ),
            ao_raw: make(TargetKind::AoRaw, "ao-raw", AO_FORMAT, attach),
            ao_temp: make(TargetKind::AoTemp, "ao-temp", AO_FORMAT, attach),
            ao: make(TargetKind::Ao, "ao", AO_FORMAT, readable),
            ssr: make(TargetKind::Ssr, "ssr", HDR_FORMAT, attach),
            hdr: make(TargetKind::Hdr, "hdr-color", HDR_FORMAT, readable),
            prev_color: make(
                TargetKind::PrevColor,
                "prev-color",
                HDR_FORMAT,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ),
            ldr: make(TargetKind::Ldr, "ldr-color", LDR_FORMAT, attach),
            final_color: make(TargetKind::Final, "final-color", output_format, readable),
            reflection: make(TargetKind::Reflection, "reflection-color", HDR_FORMAT, attach),
            reflection_depth: make(
                TargetKind::ReflectionDepth,
                "reflection-depth",
                DEPTH_FORMAT,
                attach,
            ),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn target(&self, kind: TargetKind) -> &Target {
        match kind {
            TargetKind::Depth => &self.depth,
            TargetKind::GPosition => &self.position,
            TargetKind::GNormal => &self.normal,
            TargetKind::GAlbedo => &self.albedo,
            TargetKind::GMaterial => &self.material,
            TargetKind::AoRaw => &self.ao_raw,
            TargetKind::AoTemp => &self.ao_temp,
            TargetKind::Ao => &self.ao,
            TargetKind::Ssr => &self.ssr,
            TargetKind::Hdr => &self.hdr,
            TargetKind::PrevColor => &self.prev_color,
            TargetKind::Ldr => &self.ldr,
            TargetKind::Final => &self.final_color,
            TargetKind::Reflection => &self.reflection,
            TargetKind::ReflectionDepth => &self.reflection_depth,
        }
    }

    /// The canvas-sized view bound at `slot`, or `None` for slots owned
    /// elsewhere (shadow map, environment maps, noise).
    pub fn slot_view(&self, slot: TextureSlot) -> Option<&wgpu::TextureView> {
        let kind = match slot {
            TextureSlot::GPosition => TargetKind::GPosition,
            TextureSlot::GNormal => TargetKind::GNormal,
            TextureSlot::GAlbedo => TargetKind::GAlbedo,
            TextureSlot::GMaterial => TargetKind::GMaterial,
            TextureSlot::Ao => TargetKind::Ao,
            TextureSlot::Ssr => TargetKind::Ssr,
            TextureSlot::PrevColor => TargetKind::PrevColor,
            TextureSlot::Hdr => TargetKind::Hdr,
            TextureSlot::Ldr => TargetKind::Ldr,
            TextureSlot::Final => TargetKind::Final,
            TextureSlot::ShadowMap
            | TextureSlot::EnvSpecular
            | TextureSlot::EnvIrradiance
            | TextureSlot::SsaoNoise => return None,
        };
        Some(&self.target(kind).view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;

    #[test]
    fn test_size_multiples() {
        assert_eq!(TargetKind::GPosition.size_for(1280, 720), (1280, 720));
        assert_eq!(TargetKind::Ao.size_for(1280, 720), (1280, 720));
        assert_eq!(TargetKind::Reflection.size_for(1280, 720), (640, 360));
        assert_eq!(TargetKind::Reflection.size_for(1, 1), (1, 1));
    }

    #[test]
    fn test_every_target_matches_canvas() {
        let Some((device, _queue, caps)) = create_test_device_queue() else {
            return;
        };
        let format = wgpu::TextureFormat::Rgba8UnormSrgb;
        let mut targets = RenderTargets::new(&device, 640, 480, &caps, format);
        for (w, h) in [(1024, 600), (333, 777), (1, 1)] {
            targets = RenderTargets::new(&device, w, h, &caps, format);
            assert_eq!(targets.size(), (w, h));
            for kind in TargetKind::ALL {
                assert_eq!(targets.target(kind).size(), kind.size_for(w, h), "{kind:?}");
            }
        }
        assert_eq!(targets.position.texture.format(), caps.position_format());
    }

    #[test]
    fn test_zero_size_clamped() {
        let Some((device, _queue, caps)) = create_test_device_queue() else {
            return;
        };
        let targets = RenderTargets::new(&device, 0, 0, &caps, wgpu::TextureFormat::Rgba8UnormSrgb);
        assert_eq!(targets.size(), (1, 1));
    }
}
