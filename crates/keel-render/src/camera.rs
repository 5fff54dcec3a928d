//! Orbit camera producing the view and reverse-Z projection matrices the
//! frame state consumes.

use glam::{Mat4, Vec3};
use keel_math::{Plane, reflection_matrix};

/// Camera circling a target point.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Radians around +Y.
    pub yaw: f32,
    /// Radians above the horizontal plane.
    pub pitch: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

const MAX_PITCH: f32 = 1.5;
const MIN_DISTANCE: f32 = 0.05;

impl OrbitCamera {
    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw) * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    /// Reverse-Z: near maps to depth 1, far to 0.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.far, self.near)
    }

    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Scale the distance; `factor < 1` moves closer.
    pub fn zoom(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.distance = (self.distance * factor).clamp(MIN_DISTANCE, self.far * 0.5);
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    /// Aim at a sphere and back off until it fills the vertical field of view.
    pub fn frame_bounds(&mut self, center: Vec3, radius: f32) {
        let radius = radius.max(MIN_DISTANCE);
        self.target = center;
        self.distance = radius / (self.fov_y * 0.5).sin();
        self.near = (self.distance - radius).max(0.01) * 0.5;
        self.far = self.far.max((self.distance + radius) * 4.0);
    }

    /// View matrix of the mirrored camera for a planar reflection about `plane`.
    pub fn reflect_about_plane(&self, plane: &Plane) -> Mat4 {
        self.view() * reflection_matrix(plane)
    }
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 6.0,
            yaw: 0.6,
            pitch: 0.35,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_distance_from_target() {
        let camera = OrbitCamera {
            target: Vec3::new(1.0, 2.0, 3.0),
            distance: 4.0,
            ..OrbitCamera::default()
        };
        assert!(((camera.position() - camera.target).length() - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_view_looks_at_target() {
        let camera = OrbitCamera::default();
        let target_view = camera.view().transform_point3(camera.target);
        assert!(target_view.x.abs() < 1e-4 && target_view.y.abs() < 1e-4);
        assert!(target_view.z < 0.0);
    }

    #[test]
    fn test_projection_is_reverse_z() {
        let camera = OrbitCamera::default();
        let proj = camera.projection();
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -camera.near));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -camera.far));
        assert!((near.z - 1.0).abs() < 1e-4, "{}", near.z);
        assert!(far.z.abs() < 1e-4, "{}", far.z);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = OrbitCamera::default();
        camera.orbit(0.0, 10.0);
        assert_eq!(camera.pitch, MAX_PITCH);
        camera.orbit(0.0, -20.0);
        assert_eq!(camera.pitch, -MAX_PITCH);
    }

    #[test]
    fn test_zoom_ignores_invalid_factor() {
        let mut camera = OrbitCamera::default();
        camera.zoom(0.0);
        camera.zoom(f32::NAN);
        assert_eq!(camera.distance, 6.0);
        camera.zoom(0.5);
        assert_eq!(camera.distance, 3.0);
    }

    #[test]
    fn test_frame_bounds_fits_sphere() {
        let mut camera = OrbitCamera::default();
        camera.frame_bounds(Vec3::new(0.0, 1.0, 0.0), 2.0);
        assert_eq!(camera.target, Vec3::new(0.0, 1.0, 0.0));
        // The sphere is tangent to the view cone.
        let half = (2.0 / camera.distance).asin();
        assert!((half - camera.fov_y * 0.5).abs() < 1e-4);
        assert!(camera.near < camera.distance - 2.0);
    }

    #[test]
    fn test_reflected_camera_sits_below_water() {
        let camera = OrbitCamera::default();
        let mirrored = camera.reflect_about_plane(&Plane::WATER);
        let eye = mirrored.inverse().transform_point3(Vec3::ZERO);
        let expected = Plane::WATER.reflect_point(camera.position());
        assert!((eye - expected).length() < 1e-3, "{eye:?} != {expected:?}");
        assert!(eye.y < 0.0);
    }
}
