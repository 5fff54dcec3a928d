//! Translation from the config file sections to renderer and lighting state.

use keel_config::{Config, LightingConfig, RenderConfig};
use keel_lighting::LightingState;
use keel_render::{RenderSettings, SsaoSettings, SsrSettings};
use winit::window::WindowAttributes;

pub fn render_settings(render: &RenderConfig) -> RenderSettings {
    RenderSettings {
        shadow_resolution: render.shadow_map_resolution,
        environment_size: render.environment_size,
        irradiance_size: render.irradiance_size,
        exposure: render.exposure,
        shadows: render.shadows,
        ssao: render.ambient_occlusion,
        ssr: render.reflections,
        ssao_settings: SsaoSettings {
            radius: render.ssao_radius,
            bias: render.ssao_bias,
            intensity: render.ssao_intensity,
            kernel_size: render.ssao_kernel_size,
        },
        ssr_settings: SsrSettings {
            steps: render.ssr_max_steps,
            thickness: render.ssr_thickness,
            max_distance: render.ssr_max_distance,
            ..SsrSettings::default()
        },
    }
}

pub fn lighting_state(lighting: &LightingConfig) -> LightingState {
    LightingState::new(lighting.weather, lighting.environment, lighting.sun.clone())
}

/// Returns [`WindowAttributes`] based on the given configuration.
pub fn window_attributes_from_config(config: &Config) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(config.window.title.clone())
        .with_inner_size(winit::dpi::LogicalSize::new(
            config.window.width as f64,
            config.window.height as f64,
        ))
}
