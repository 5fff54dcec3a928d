//! Weather presets and environment modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sun::{SkyParams, SunDescriptor, SunTuning};

/// Named lighting setups offered to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherPreset {
    #[default]
    Day,
    Sunset,
    Overcast,
    Night,
}

impl WeatherPreset {
    pub const ALL: [WeatherPreset; 4] = [Self::Day, Self::Sunset, Self::Overcast, Self::Night];

    /// Sine of the sun's elevation.
    pub fn altitude(self) -> f32 {
        match self {
            Self::Day => 1.0,
            Self::Sunset => 0.12,
            Self::Overcast => 0.6,
            Self::Night => -0.15,
        }
    }

    /// Sun azimuth in radians around +Y.
    pub fn azimuth(self) -> f32 {
        match self {
            Self::Day | Self::Overcast => 0.6,
            Self::Sunset | Self::Night => 2.4,
        }
    }

    pub fn cloud_cover(self) -> f32 {
        match self {
            Self::Overcast => 0.85,
            _ => 0.0,
        }
    }

    /// Multiplier on direct sunlight.
    pub fn dimming(self) -> f32 {
        match self {
            Self::Overcast => 0.35,
            _ => 1.0,
        }
    }

    /// The preset after this one, wrapping around.
    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|&p| p == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Sunset => "sunset",
            Self::Overcast => "overcast",
            Self::Night => "night",
        }
    }
}

/// Source of the baked environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    #[default]
    Sky,
    Studio,
}

impl EnvironmentMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Sky => Self::Studio,
            Self::Studio => Self::Sky,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sky => "sky",
            Self::Studio => "studio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLightingError(String);

impl fmt::Display for ParseLightingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lighting name '{}'", self.0)
    }
}

impl std::error::Error for ParseLightingError {}

impl FromStr for WeatherPreset {
    type Err = ParseLightingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseLightingError(s.to_string()))
    }
}

impl FromStr for EnvironmentMode {
    type Err = ParseLightingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Sky, Self::Studio]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseLightingError(s.to_string()))
    }
}

/// Current lighting selection plus the values derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct LightingState {
    pub preset: WeatherPreset,
    pub mode: EnvironmentMode,
    pub tuning: SunTuning,
    sun: SunDescriptor,
}

impl LightingState {
    pub fn new(preset: WeatherPreset, mode: EnvironmentMode, tuning: SunTuning) -> Self {
        let sun = derive_sun(preset, &tuning);
        Self {
            preset,
            mode,
            tuning,
            sun,
        }
    }

    pub fn sun(&self) -> &SunDescriptor {
        &self.sun
    }

    /// Switch preset. Returns whether anything changed.
    pub fn set_preset(&mut self, preset: WeatherPreset) -> bool {
        if preset == self.preset {
            return false;
        }
        self.preset = preset;
        self.sun = derive_sun(preset, &self.tuning);
        true
    }

    /// Switch environment mode. Returns whether anything changed.
    pub fn set_mode(&mut self, mode: EnvironmentMode) -> bool {
        if mode == self.mode {
            return false;
        }
        self.mode = mode;
        true
    }

    /// Parameters for the environment bake in the current mode.
    pub fn sky_params(&self) -> SkyParams {
        match self.mode {
            EnvironmentMode::Sky => SkyParams::sky(&self.sun, self.preset.cloud_cover()),
            EnvironmentMode::Studio => SkyParams::studio(),
        }
    }
}

impl Default for LightingState {
    fn default() -> Self {
        Self::new(WeatherPreset::default(), EnvironmentMode::default(), SunTuning::default())
    }
}

fn derive_sun(preset: WeatherPreset, tuning: &SunTuning) -> SunDescriptor {
    let mut sun = SunDescriptor::from_altitude(preset.altitude(), preset.azimuth(), tuning);
    sun.intensity *= preset.dimming();
    sun
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_sunset_vs_day() {
        let day = LightingState::new(WeatherPreset::Day, EnvironmentMode::Sky, SunTuning::default());
        let sunset =
            LightingState::new(WeatherPreset::Sunset, EnvironmentMode::Sky, SunTuning::default());
        assert!(sunset.sun().intensity < day.sun().intensity);
        let warmth = |s: &SunDescriptor| s.color.x / s.color.z;
        assert!(warmth(sunset.sun()) > warmth(day.sun()));
    }

    #[test]
    fn test_overcast_is_dimmed() {
        let tuning = SunTuning::default();
        let overcast = LightingState::new(WeatherPreset::Overcast, EnvironmentMode::Sky, tuning.clone());
        let undimmed = SunDescriptor::from_altitude(0.6, WeatherPreset::Overcast.azimuth(), &tuning);
        assert!(overcast.sun().intensity < undimmed.intensity);
    }

    #[test]
    fn test_night_keeps_faint_glow() {
        let night = LightingState::new(WeatherPreset::Night, EnvironmentMode::Sky, SunTuning::default());
        assert!(night.sun().intensity > 0.0);
        assert!(night.sun().intensity < 0.25);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Sunset".parse::<WeatherPreset>().unwrap(), WeatherPreset::Sunset);
        assert_eq!("studio".parse::<EnvironmentMode>().unwrap(), EnvironmentMode::Studio);
        assert!("fog".parse::<WeatherPreset>().is_err());
    }

    #[test]
    fn test_next_cycles_all() {
        let mut p = WeatherPreset::Day;
        for _ in 0..WeatherPreset::ALL.len() {
            p = p.next();
        }
        assert_eq!(p, WeatherPreset::Day);
    }

    #[test]
    fn test_setters_report_change() {
        let mut state = LightingState::default();
        assert!(!state.set_preset(WeatherPreset::Day));
        assert!(state.set_preset(WeatherPreset::Night));
        assert!(state.set_mode(EnvironmentMode::Studio));
        assert!(state.sky_params().is_studio());
        assert!(!state.set_mode(EnvironmentMode::Studio));
    }
}
