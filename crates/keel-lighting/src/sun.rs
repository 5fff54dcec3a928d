//! Sun descriptor: direction, colour and intensity derived from altitude.
//!
//! Colour blends from a sunset tint to daylight as the sun rises, intensity
//! fades out towards the horizon, and a dim warm glow remains for a short
//! band below it. The blend edges are tuning values, not physics.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use keel_math::{lerp, saturate, smoothstep};
use serde::{Deserialize, Serialize};

/// Tuning constants for the altitude model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SunTuning {
    /// Linear RGB of the high sun.
    pub day_color: [f32; 3],
    /// Linear RGB of the sun just above the horizon.
    pub sunset_color: [f32; 3],
    /// Linear RGB of the afterglow below the horizon.
    pub glow_color: [f32; 3],
    pub day_intensity: f32,
    pub glow_intensity: f32,
    /// Altitudes between which colour goes from sunset to day.
    pub color_blend: (f32, f32),
    /// Altitudes between which intensity rises from zero to full.
    pub intensity_fade: (f32, f32),
    /// Altitude at which the glow has fully faded.
    pub glow_floor: f32,
    /// Altitude above which the glow no longer contributes.
    pub glow_ceiling: f32,
}

impl Default for SunTuning {
    fn default() -> Self {
        Self {
            day_color: [1.0, 0.96, 0.90],
            sunset_color: [1.0, 0.45, 0.18],
            glow_color: [0.85, 0.32, 0.22],
            day_intensity: 3.0,
            glow_intensity: 0.25,
            color_blend: (0.0, 0.4),
            intensity_fade: (0.0, 0.3),
            glow_floor: -0.2,
            glow_ceiling: 0.1,
        }
    }
}

/// Derived sun state. Recomputed on every light or environment change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunDescriptor {
    /// Unit vector pointing from the sun toward the scene.
    pub direction: Vec3,
    /// Sine of the elevation angle, in `[-1, 1]`.
    pub altitude: f32,
    /// Linear RGB, not premultiplied by intensity.
    pub color: Vec3,
    pub intensity: f32,
}

impl SunDescriptor {
    /// Build from a light direction (sun toward scene).
    pub fn from_direction(direction: Vec3, tuning: &SunTuning) -> Self {
        let direction = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let altitude = -direction.y;
        let altitude = if altitude.is_finite() { altitude } else { 0.0 };
        let (color, intensity) = shade(altitude, tuning);
        Self {
            direction,
            altitude,
            color,
            intensity,
        }
    }

    /// Build from altitude (sine of elevation) and azimuth in radians around +Y.
    pub fn from_altitude(altitude: f32, azimuth: f32, tuning: &SunTuning) -> Self {
        let altitude = if altitude.is_finite() {
            altitude.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let horizontal = (1.0 - altitude * altitude).max(0.0).sqrt();
        let toward_sun = Vec3::new(
            horizontal * azimuth.sin(),
            altitude,
            horizontal * azimuth.cos(),
        );
        Self::from_direction(-toward_sun, tuning)
    }

    /// Unit vector from the scene toward the sun.
    pub fn toward_sun(&self) -> Vec3 {
        -self.direction
    }

    /// Colour premultiplied by intensity.
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }

    pub fn to_uniform(&self) -> SunUniform {
        SunUniform {
            direction_intensity: [
                self.direction.x,
                self.direction.y,
                self.direction.z,
                self.intensity,
            ],
            color_altitude: [self.color.x, self.color.y, self.color.z, self.altitude],
        }
    }
}

fn shade(altitude: f32, t: &SunTuning) -> (Vec3, f32) {
    let blend = smoothstep(t.color_blend.0, t.color_blend.1, altitude);
    let sky_color = Vec3::from(t.sunset_color).lerp(Vec3::from(t.day_color), blend);
    let direct = t.day_intensity * smoothstep(t.intensity_fade.0, t.intensity_fade.1, altitude);

    // Glow peaks at the horizon and fades on both sides.
    let glow = t.glow_intensity
        * smoothstep(t.glow_floor, 0.0, altitude)
        * (1.0 - smoothstep(0.0, t.glow_ceiling, altitude));

    let total = direct + glow;
    if total <= f32::EPSILON {
        return (Vec3::from(t.glow_color), 0.0);
    }
    let color = (sky_color * direct + Vec3::from(t.glow_color) * glow) / total;
    (color, total)
}

/// GPU-side sun, 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SunUniform {
    /// xyz = direction (sun toward scene), w = intensity.
    pub direction_intensity: [f32; 4],
    /// xyz = linear colour, w = altitude.
    pub color_altitude: [f32; 4],
}

/// Parameters of the procedural environment bake, 80 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SkyParams {
    /// xyz = toward sun, w = intensity.
    pub sun: [f32; 4],
    /// xyz = sun colour, w = cloud cover.
    pub sun_color: [f32; 4],
    /// xyz = zenith colour, w = unused.
    pub zenith: [f32; 4],
    /// xyz = horizon colour, w = unused.
    pub horizon: [f32; 4],
    /// xyz = ground colour, w = mode (0 sky, 1 studio).
    pub ground: [f32; 4],
}

impl SkyParams {
    /// Gradient sky lit by `sun`, greyed by `cloud_cover` in `[0, 1]`.
    pub fn sky(sun: &SunDescriptor, cloud_cover: f32) -> Self {
        let cover = saturate(cloud_cover);
        let day = smoothstep(-0.1, 0.3, sun.altitude);
        let dusk = 1.0 - smoothstep(0.0, 0.35, sun.altitude.abs());

        let zenith = Vec3::new(0.02, 0.03, 0.08).lerp(Vec3::new(0.18, 0.36, 0.75), day);
        let horizon = Vec3::new(0.05, 0.05, 0.09)
            .lerp(Vec3::new(0.62, 0.74, 0.88), day)
            .lerp(sun.color * 0.8, dusk * 0.6);
        let grey = Vec3::splat(lerp(0.04, 0.55, day));
        let zenith = zenith.lerp(grey, cover);
        let horizon = horizon.lerp(grey * 1.1, cover);
        let ground = Vec3::new(0.09, 0.08, 0.07) * lerp(0.1, 1.0, day);
        let to_sun = sun.toward_sun();

        Self {
            sun: [to_sun.x, to_sun.y, to_sun.z, sun.intensity * (1.0 - 0.8 * cover)],
            sun_color: [sun.color.x, sun.color.y, sun.color.z, cover],
            zenith: [zenith.x, zenith.y, zenith.z, 0.0],
            horizon: [horizon.x, horizon.y, horizon.z, 0.0],
            ground: [ground.x, ground.y, ground.z, 0.0],
        }
    }

    /// Neutral photo studio: bright overhead softbox over a dark floor.
    pub fn studio() -> Self {
        Self {
            sun: [0.0, 1.0, 0.0, 0.0],
            sun_color: [1.0, 1.0, 1.0, 0.0],
            zenith: [2.2, 2.2, 2.2, 0.0],
            horizon: [0.55, 0.55, 0.58, 0.0],
            ground: [0.06, 0.06, 0.06, 1.0],
        }
    }

    pub fn is_studio(&self) -> bool {
        self.ground[3] >= 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmth(c: Vec3) -> f32 {
        c.x / c.z.max(1e-6)
    }

    #[test]
    fn test_sunset_dimmer_and_warmer_than_day() {
        let tuning = SunTuning::default();
        let day = SunDescriptor::from_altitude(1.0, 0.0, &tuning);
        let sunset = SunDescriptor::from_altitude(0.12, 0.0, &tuning);
        assert!(sunset.intensity < day.intensity);
        assert!(warmth(sunset.color) > warmth(day.color));
        assert!(sunset.color.y < day.color.y, "sunset should be more orange");
    }

    #[test]
    fn test_high_sun_uses_day_color() {
        let tuning = SunTuning::default();
        let sun = SunDescriptor::from_altitude(1.0, 0.0, &tuning);
        assert!((sun.color - Vec3::from(tuning.day_color)).length() < 1e-5);
        assert!((sun.intensity - tuning.day_intensity).abs() < 1e-5);
    }

    #[test]
    fn test_glow_below_horizon_fades_out() {
        let tuning = SunTuning::default();
        let just_below = SunDescriptor::from_altitude(-0.05, 0.0, &tuning);
        let deep = SunDescriptor::from_altitude(-0.5, 0.0, &tuning);
        assert!(just_below.intensity > 0.0);
        assert!(just_below.intensity <= tuning.glow_intensity);
        assert_eq!(deep.intensity, 0.0);
        assert!((just_below.color - Vec3::from(tuning.glow_color)).length() < 1e-5);
    }

    #[test]
    fn test_intensity_continuous_across_horizon() {
        let tuning = SunTuning::default();
        let mut prev = SunDescriptor::from_altitude(-0.3, 0.0, &tuning).intensity;
        for i in 1..=120 {
            let alt = -0.3 + i as f32 * 0.005;
            let cur = SunDescriptor::from_altitude(alt, 0.0, &tuning).intensity;
            assert!((cur - prev).abs() < 0.1, "jump at altitude {alt}: {prev} -> {cur}");
            prev = cur;
        }
    }

    #[test]
    fn test_non_finite_altitude_treated_as_horizon() {
        let tuning = SunTuning::default();
        let nan = SunDescriptor::from_altitude(f32::NAN, 0.0, &tuning);
        let zero = SunDescriptor::from_altitude(0.0, 0.0, &tuning);
        assert_eq!(nan.altitude, 0.0);
        assert_eq!(nan.intensity, zero.intensity);
        assert!(nan.color.is_finite());
    }

    #[test]
    fn test_direction_points_down_for_high_sun() {
        let sun = SunDescriptor::from_altitude(1.0, 0.0, &SunTuning::default());
        assert!((sun.direction - Vec3::NEG_Y).length() < 1e-5);
        assert!((sun.toward_sun() - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_zero_direction_falls_back() {
        let sun = SunDescriptor::from_direction(Vec3::ZERO, &SunTuning::default());
        assert_eq!(sun.direction, Vec3::NEG_Y);
    }

    #[test]
    fn test_uniform_layouts() {
        assert_eq!(std::mem::size_of::<SunUniform>(), 32);
        assert_eq!(std::mem::size_of::<SkyParams>(), 80);
        let sun = SunDescriptor::from_altitude(0.5, 1.0, &SunTuning::default());
        let u = sun.to_uniform();
        assert_eq!(u.direction_intensity[3], sun.intensity);
        assert_eq!(u.color_altitude[3], sun.altitude);
    }

    #[test]
    fn test_overcast_greys_the_sky() {
        let sun = SunDescriptor::from_altitude(0.6, 0.0, &SunTuning::default());
        let clear = SkyParams::sky(&sun, 0.0);
        let overcast = SkyParams::sky(&sun, 1.0);
        let spread = |c: [f32; 4]| c[2] - c[0];
        assert!(spread(overcast.zenith) < spread(clear.zenith));
        assert!(overcast.sun[3] < clear.sun[3]);
        assert!(!clear.is_studio());
        assert!(SkyParams::studio().is_studio());
    }
}
