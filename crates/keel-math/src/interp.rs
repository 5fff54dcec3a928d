//! Scalar blend helpers.
//!
//! All three functions are NaN-tolerant in the sense that a non-finite input
//! never propagates into a non-finite output for `saturate` and `smoothstep`.

/// Linear interpolation between `a` and `b`.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Clamp to `[0, 1]`. NaN maps to 0.
pub fn saturate(x: f32) -> f32 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

/// Hermite smoothstep between `edge0` and `edge1`, matching the WGSL builtin.
///
/// A degenerate range (`edge0 == edge1`) behaves as a hard step at `edge0`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let range = edge1 - edge0;
    if range.abs() <= f32::EPSILON {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = saturate((x - edge0) / range);
    t * t * (3.0 - 2.0 * t)
}
