//! Sun, weather and environment parameters, shadow light fitting and the
//! ambient occlusion sample kernel.

mod shadow;
mod ssao;
mod sun;
mod weather;

pub use shadow::{ShadowUniform, fit_light_to_bounds};
pub use ssao::{SSAO_KERNEL_SIZE, SSAO_NOISE_DIM, ssao_kernel, ssao_noise};
pub use sun::{SkyParams, SunDescriptor, SunTuning, SunUniform};
pub use weather::{EnvironmentMode, LightingState, ParseLightingError, WeatherPreset};
