//! Hemisphere sample kernel and rotation noise for screen-space ambient occlusion.

use glam::{Vec3, Vec4};
use keel_math::lerp;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Number of kernel samples.
pub const SSAO_KERNEL_SIZE: usize = 48;
/// Edge length of the tiled rotation noise texture.
pub const SSAO_NOISE_DIM: u32 = 3;

/// Tangent-space hemisphere samples (z up), packed as `vec4` for a uniform array.
///
/// Each sample is a random direction with `z >= 0`, a random length, then
/// scaled by `lerp(0.1, 1.0, t^2)` with `t = i / size` so samples cluster near
/// the origin. The same seed always yields the same kernel.
pub fn ssao_kernel(size: usize, seed: u64) -> Vec<Vec4> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..size)
        .map(|i| {
            let dir = loop {
                let v = Vec3::new(
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(0.0..=1.0),
                );
                if let Some(n) = v.try_normalize() {
                    break n;
                }
            };
            let t = i as f32 / size as f32;
            let scale = lerp(0.1, 1.0, t * t);
            (dir * rng.random_range(0.0..=1.0f32) * scale).extend(0.0)
        })
        .collect()
}

/// Random rotation vectors around the z axis, one RGBA32F texel each.
pub fn ssao_noise(dim: u32, seed: u64) -> Vec<[f32; 4]> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5A5A_5A5A);
    (0..dim * dim)
        .map(|_| {
            let angle = rng.random_range(0.0..std::f32::consts::TAU);
            [angle.cos(), angle.sin(), 0.0, 0.0]
        })
        .collect()
}
