//! Planes and the mirror transform used by the planar reflection path.

use glam::{Mat4, Vec3, Vec4};

/// Plane `dot(normal, p) + d = 0` with a unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// The water surface `y = 0`.
    pub const WATER: Plane = Plane {
        normal: Vec3::Y,
        d: 0.0,
    };

    /// Plane through `point` with the given (normalized on construction) normal.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    /// Mirror a point across the plane.
    pub fn reflect_point(&self, p: Vec3) -> Vec3 {
        p - 2.0 * self.signed_distance(p) * self.normal
    }

    /// Mirror a direction across the plane (translation-free).
    pub fn reflect_direction(&self, v: Vec3) -> Vec3 {
        v - 2.0 * v.dot(self.normal) * self.normal
    }

    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(self.d)
    }
}

/// Householder reflection matrix for `plane`, applied in world space.
///
/// `view * reflection_matrix(plane)` yields the mirrored camera's view matrix.
pub fn reflection_matrix(plane: &Plane) -> Mat4 {
    let n = plane.normal;
    let d = plane.d;
    Mat4::from_cols(
        Vec4::new(1.0 - 2.0 * n.x * n.x, -2.0 * n.y * n.x, -2.0 * n.z * n.x, 0.0),
        Vec4::new(-2.0 * n.x * n.y, 1.0 - 2.0 * n.y * n.y, -2.0 * n.z * n.y, 0.0),
        Vec4::new(-2.0 * n.x * n.z, -2.0 * n.y * n.z, 1.0 - 2.0 * n.z * n.z, 0.0),
        Vec4::new(-2.0 * d * n.x, -2.0 * d * n.y, -2.0 * d * n.z, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_point_across_water() {
        let p = Vec3::new(1.0, 3.0, -2.0);
        assert_eq!(Plane::WATER.reflect_point(p), Vec3::new(1.0, -3.0, -2.0));
    }

    #[test]
    fn test_reflection_matrix_matches_point_reflection() {
        let plane = Plane::from_point_normal(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 1.0, 0.2));
        let m = reflection_matrix(&plane);
        let p = Vec3::new(0.5, 5.0, 1.5);
        let a = m.transform_point3(p);
        let b = plane.reflect_point(p);
        assert!((a - b).length() < 1e-5, "{a:?} != {b:?}");
    }

    #[test]
    fn test_reflection_is_involution() {
        let m = reflection_matrix(&Plane::WATER);
        let p = Vec3::new(-4.0, 7.0, 0.25);
        let twice = m.transform_point3(m.transform_point3(p));
        assert!((twice - p).length() < 1e-5);
    }

    #[test]
    fn test_reflect_direction_flips_normal_component() {
        let v = Plane::WATER.reflect_direction(Vec3::new(0.3, -0.8, 0.1));
        assert!((v.y - 0.8).abs() < 1e-6);
        assert!((v.x - 0.3).abs() < 1e-6);
    }
}
