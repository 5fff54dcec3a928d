//! Per-frame state: camera matrices, sun, dirty flags and the pass plan
//! derived from them.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use keel_lighting::SunDescriptor;

use crate::stats::PassId;

/// Which cached results are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyFlags {
    /// Geometry, materials or camera changed; the G-buffer must be redrawn.
    pub scene_changed: bool,
    /// Light direction or geometry changed; the shadow map must be redrawn.
    pub shadow_dirty: bool,
    pub ssao_dirty: bool,
    /// Sun, weather or environment mode changed; the cubemaps must be re-baked.
    pub environment_dirty: bool,
}

impl DirtyFlags {
    pub const ALL: Self = Self {
        scene_changed: true,
        shadow_dirty: true,
        ssao_dirty: true,
        environment_dirty: true,
    };

    pub const CLEAN: Self = Self {
        scene_changed: false,
        shadow_dirty: false,
        ssao_dirty: false,
        environment_dirty: false,
    };

    pub fn geometry_changed(&mut self) {
        self.scene_changed = true;
        self.shadow_dirty = true;
        self.ssao_dirty = true;
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::CLEAN
    }
}

impl Default for DirtyFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Effects that can be switched off by settings or missing capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Effects {
    pub shadows: bool,
    pub ssao: bool,
    pub ssr: bool,
}

impl Default for Effects {
    fn default() -> Self {
        Self {
            shadows: true,
            ssao: true,
            ssr: true,
        }
    }
}

/// Passes to run this frame. Composite, tone map, anti-aliasing and present
/// always run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePlan {
    pub environment: bool,
    pub shadow: bool,
    pub gbuffer: bool,
    pub ssao: bool,
    /// Reflections read last frame's colour, so they run every frame.
    pub ssr: bool,
}

impl FramePlan {
    pub fn new(flags: &DirtyFlags, effects: &Effects) -> Self {
        let gbuffer = flags.scene_changed;
        Self {
            environment: flags.environment_dirty,
            shadow: effects.shadows && flags.shadow_dirty,
            gbuffer,
            ssao: effects.ssao && (flags.ssao_dirty || gbuffer),
            ssr: effects.ssr,
        }
    }

    /// The passes of this plan in execution order.
    pub fn passes(&self) -> Vec<PassId> {
        let mut out = Vec::with_capacity(PassId::COUNT);
        if self.environment {
            out.push(PassId::Environment);
        }
        if self.shadow {
            out.push(PassId::Shadow);
        }
        if self.gbuffer {
            out.push(PassId::GBuffer);
        }
        if self.ssao {
            out.push(PassId::Ssao);
            out.push(PassId::AoBlur);
        }
        if self.ssr {
            out.push(PassId::Ssr);
        }
        out.extend([
            PassId::Composite,
            PassId::Tonemap,
            PassId::Fxaa,
            PassId::Present,
        ]);
        out
    }

    /// Clear the flags this plan satisfied. Flags for disabled effects are
    /// cleared too; nothing would ever satisfy them.
    pub fn settle(&self, flags: &mut DirtyFlags, effects: &Effects) {
        if self.environment {
            flags.environment_dirty = false;
        }
        if self.shadow || !effects.shadows {
            flags.shadow_dirty = false;
        }
        if self.gbuffer {
            flags.scene_changed = false;
        }
        if self.ssao || !effects.ssao {
            flags.ssao_dirty = false;
        }
    }
}

/// Uniforms every pass reads at group 0, binding 0. 336 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub sun_direction: [f32; 4],
    pub sun_color: [f32; 4],
    pub viewport: [f32; 4],
    pub effects: [f32; 4],
}

static_assertions::assert_eq_size!(FrameUniforms, [u8; 336]);

/// Camera and lighting inputs of the current frame plus what is stale.
#[derive(Clone, Debug)]
pub struct FrameState {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub sun: SunDescriptor,
    pub exposure: f32,
    pub flags: DirtyFlags,
}

impl FrameState {
    pub fn new(sun: SunDescriptor, exposure: f32) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            sun,
            exposure,
            flags: DirtyFlags::ALL,
        }
    }

    /// Update the camera. View-dependent buffers go stale only when the
    /// matrices actually change.
    pub fn set_camera(&mut self, view: Mat4, projection: Mat4, position: Vec3) {
        if view == self.view && projection == self.projection {
            return;
        }
        self.view = view;
        self.projection = projection;
        self.camera_position = position;
        self.flags.scene_changed = true;
        self.flags.ssao_dirty = true;
    }

    /// Update the sun. Shadows and the environment follow the light.
    pub fn set_sun(&mut self, sun: SunDescriptor) {
        if sun == self.sun {
            return;
        }
        self.sun = sun;
        self.flags.shadow_dirty = true;
        self.flags.environment_dirty = true;
    }

    pub fn uniforms(&self, width: u32, height: u32, effects: &Effects, max_env_mip: f32) -> FrameUniforms {
        let on = |b: bool| if b { 1.0 } else { 0.0 };
        let to_sun = self.sun.toward_sun();
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        FrameUniforms {
            view: self.view.to_cols_array_2d(),
            proj: self.projection.to_cols_array_2d(),
            inv_view: self.view.inverse().to_cols_array_2d(),
            inv_proj: self.projection.inverse().to_cols_array_2d(),
            camera_position: self.camera_position.extend(self.exposure).to_array(),
            sun_direction: to_sun.extend(self.sun.intensity).to_array(),
            sun_color: self.sun.color.extend(self.sun.altitude).to_array(),
            viewport: [w, h, 1.0 / w, 1.0 / h],
            effects: [on(effects.ssao), on(effects.ssr), on(effects.shadows), max_env_mip],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_lighting::SunTuning;

    fn sun(alt: f32) -> SunDescriptor {
        SunDescriptor::from_altitude(alt, 0.0, &SunTuning::default())
    }

    #[test]
    fn test_clean_frame_runs_only_fixed_passes() {
        let plan = FramePlan::new(&DirtyFlags::CLEAN, &Effects {
            ssr: false,
            ..Effects::default()
        });
        assert_eq!(
            plan.passes(),
            vec![
                PassId::Composite,
                PassId::Tonemap,
                PassId::Fxaa,
                PassId::Present
            ]
        );
    }

    #[test]
    fn test_full_frame_order() {
        let plan = FramePlan::new(&DirtyFlags::ALL, &Effects::default());
        assert_eq!(plan.passes(), PassId::ALL.to_vec());
    }

    #[test]
    fn test_shadow_skipped_when_clean() {
        let flags = DirtyFlags {
            shadow_dirty: false,
            ..DirtyFlags::ALL
        };
        let plan = FramePlan::new(&flags, &Effects::default());
        assert!(!plan.shadow);
        assert!(!plan.passes().contains(&PassId::Shadow));
    }

    #[test]
    fn test_gbuffer_redraw_forces_ssao() {
        let flags = DirtyFlags {
            scene_changed: true,
            ..DirtyFlags::CLEAN
        };
        let plan = FramePlan::new(&flags, &Effects::default());
        assert!(plan.gbuffer && plan.ssao);
        assert!(!plan.shadow);
    }

    #[test]
    fn test_settle_clears_satisfied_and_disabled() {
        let effects = Effects {
            shadows: false,
            ..Effects::default()
        };
        let mut flags = DirtyFlags::ALL;
        let plan = FramePlan::new(&flags, &effects);
        assert!(!plan.shadow);
        plan.settle(&mut flags, &effects);
        assert!(flags.is_clean());
    }

    #[test]
    fn test_camera_change_marks_view_dependent_buffers() {
        let mut state = FrameState::new(sun(1.0), 1.0);
        state.flags = DirtyFlags::CLEAN;
        state.set_camera(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        assert!(state.flags.is_clean());

        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        state.set_camera(view, Mat4::IDENTITY, Vec3::new(0.0, 2.0, 5.0));
        assert!(state.flags.scene_changed && state.flags.ssao_dirty);
        assert!(!state.flags.shadow_dirty);
    }

    #[test]
    fn test_sun_change_marks_shadow_and_environment() {
        let mut state = FrameState::new(sun(1.0), 1.0);
        state.flags = DirtyFlags::CLEAN;
        state.set_sun(sun(1.0));
        assert!(state.flags.is_clean());
        state.set_sun(sun(0.12));
        assert!(state.flags.shadow_dirty && state.flags.environment_dirty);
        assert!(!state.flags.scene_changed);
    }

    #[test]
    fn test_uniforms_pack_sun_and_viewport() {
        let state = FrameState::new(sun(1.0), 1.5);
        let u = state.uniforms(800, 400, &Effects::default(), 8.0);
        assert_eq!(u.viewport, [800.0, 400.0, 1.0 / 800.0, 1.0 / 400.0]);
        assert_eq!(u.camera_position[3], 1.5);
        assert_eq!(u.effects, [1.0, 1.0, 1.0, 8.0]);
        // Straight up for a sun at altitude 1.
        assert!(u.sun_direction[1] > 0.99);
    }
}
