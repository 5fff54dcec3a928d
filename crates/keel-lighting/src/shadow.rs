//! Directional shadow projection fitted to the scene bounds.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use keel_math::Aabb;

/// Orthographic reverse-Z light view-projection enclosing `bounds`.
///
/// `direction` points from the sun toward the scene. The xy extents are
/// snapped to whole shadow-map texels so the map does not shimmer when the
/// bounds change slightly.
pub fn fit_light_to_bounds(direction: Vec3, bounds: &Aabb, resolution: u32) -> Mat4 {
    let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let bounds = if bounds.is_empty() {
        Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))
    } else {
        *bounds
    };
    let sphere = bounds.bounding_sphere();
    let radius = sphere.radius.max(1e-3);

    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = sphere.center - direction * radius * 2.0;
    let light_view = Mat4::look_to_rh(eye, direction, up);

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in bounds.corners() {
        let ls = (light_view * Vec4::from((corner, 1.0))).truncate();
        min = min.min(ls);
        max = max.max(ls);
    }

    let texel_x = (max.x - min.x) / resolution as f32;
    let texel_y = (max.y - min.y) / resolution as f32;
    if texel_x > 0.0 {
        min.x = (min.x / texel_x).floor() * texel_x;
        max.x = (max.x / texel_x).ceil() * texel_x;
    }
    if texel_y > 0.0 {
        min.y = (min.y / texel_y).floor() * texel_y;
        max.y = (max.y / texel_y).ceil() * texel_y;
    }

    // View space looks down -Z; distances are -z. Pad so casters on the
    // boundary are not clipped.
    let pad = radius * 0.05;
    let near = (-max.z - pad).max(0.0);
    let far = -min.z + pad;
    // Reverse-Z: near maps to 1, far to 0.
    let ortho = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, far, near);
    ortho * light_view
}

/// GPU-side shadow parameters, 80 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadowUniform {
    pub light_view_proj: [[f32; 4]; 4],
    /// x = 1 / resolution, y = normal offset in texels, z = PCF radius in texels, w = enabled.
    pub params: [f32; 4],
}

impl ShadowUniform {
    pub fn new(light_view_proj: Mat4, resolution: u32, enabled: bool) -> Self {
        Self {
            light_view_proj: light_view_proj.to_cols_array_2d(),
            params: [
                1.0 / resolution.max(1) as f32,
                0.5,
                1.5,
                if enabled { 1.0 } else { 0.0 },
            ],
        }
    }
}
