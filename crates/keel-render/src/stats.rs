//! Per-pass draw-call accounting.

use std::fmt;

/// Named passes of a frame, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassId {
    Environment,
    Shadow,
    GBuffer,
    Ssao,
    AoBlur,
    Ssr,
    Composite,
    Tonemap,
    Fxaa,
    Present,
}

impl PassId {
    pub const COUNT: usize = 10;

    pub const ALL: [PassId; Self::COUNT] = [
        Self::Environment,
        Self::Shadow,
        Self::GBuffer,
        Self::Ssao,
        Self::AoBlur,
        Self::Ssr,
        Self::Composite,
        Self::Tonemap,
        Self::Fxaa,
        Self::Present,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Shadow => "shadow",
            Self::GBuffer => "gbuffer",
            Self::Ssao => "ssao",
            Self::AoBlur => "ao-blur",
            Self::Ssr => "ssr",
            Self::Composite => "composite",
            Self::Tonemap => "tonemap",
            Self::Fxaa => "fxaa",
            Self::Present => "present",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Draw calls and triangles issued per pass during one displayed frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    draws: [u32; PassId::COUNT],
    triangles: [u64; PassId::COUNT],
}

impl DrawStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, pass: PassId, triangles: u64) {
        self.draws[pass.index()] += 1;
        self.triangles[pass.index()] += triangles;
    }

    pub fn draw_calls(&self, pass: PassId) -> u32 {
        self.draws[pass.index()]
    }

    pub fn triangles(&self, pass: PassId) -> u64 {
        self.triangles[pass.index()]
    }

    pub fn total_draw_calls(&self) -> u32 {
        self.draws.iter().sum()
    }

    /// Passes that issued at least one draw.
    pub fn active_passes(&self) -> impl Iterator<Item = PassId> + '_ {
        PassId::ALL
            .into_iter()
            .filter(|p| self.draw_calls(*p) > 0)
    }
}

impl fmt::Display for DrawStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} draws", self.total_draw_calls())?;
        for pass in self.active_passes() {
            write!(f, " {}={}", pass.name(), self.draw_calls(pass))?;
        }
        Ok(())
    }
}

/// Render pass wrapper that tallies every draw against one [`PassId`].
pub struct CountingPass<'e, 's> {
    inner: wgpu::RenderPass<'e>,
    stats: &'s mut DrawStats,
    id: PassId,
}

impl<'e, 's> CountingPass<'e, 's> {
    pub fn new(inner: wgpu::RenderPass<'e>, stats: &'s mut DrawStats, id: PassId) -> Self {
        Self { inner, stats, id }
    }

    pub fn set_pipeline(&mut self, pipeline: &wgpu::RenderPipeline) {
        self.inner.set_pipeline(pipeline);
    }

    pub fn set_bind_group(&mut self, index: u32, bind_group: &wgpu::BindGroup) {
        self.inner.set_bind_group(index, bind_group, &[]);
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: wgpu::BufferSlice<'_>) {
        self.inner.set_vertex_buffer(slot, buffer);
    }

    pub fn set_index_buffer(&mut self, buffer: wgpu::BufferSlice<'_>, format: wgpu::IndexFormat) {
        self.inner.set_index_buffer(buffer, format);
    }

    pub fn draw(&mut self, vertices: std::ops::Range<u32>) {
        self.stats
            .record(self.id, u64::from(vertices.end - vertices.start) / 3);
        self.inner.draw(vertices, 0..1);
    }

    pub fn draw_indexed(&mut self, indices: std::ops::Range<u32>) {
        self.stats
            .record(self.id, u64::from(indices.end - indices.start) / 3);
        self.inner.draw_indexed(indices, 0, 0..1);
    }

    /// Fullscreen triangle.
    pub fn draw_fullscreen(&mut self) {
        self.draw(0..3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut stats = DrawStats::default();
        stats.record(PassId::GBuffer, 12);
        stats.record(PassId::GBuffer, 4);
        stats.record(PassId::Composite, 1);
        assert_eq!(stats.draw_calls(PassId::GBuffer), 2);
        assert_eq!(stats.triangles(PassId::GBuffer), 16);
        assert_eq!(stats.total_draw_calls(), 3);
        assert_eq!(
            stats.active_passes().collect::<Vec<_>>(),
            vec![PassId::GBuffer, PassId::Composite]
        );
        stats.reset();
        assert_eq!(stats.total_draw_calls(), 0);
    }

    #[test]
    fn test_pass_ids_index_in_order() {
        for (i, pass) in PassId::ALL.iter().enumerate() {
            assert_eq!(pass.index(), i);
        }
    }

    #[test]
    fn test_display() {
        let mut stats = DrawStats::default();
        stats.record(PassId::Shadow, 2);
        assert_eq!(stats.to_string(), "1 draws shadow=1");
    }
}
