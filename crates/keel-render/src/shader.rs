//! Shader assembly and compilation.
//!
//! Every pass shader is the shared prelude, then the generated input
//! declarations for the pass, then the pass body.

use thiserror::Error;

use crate::slots::PassInputs;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader '{name}' failed to compile: {message}")]
    CompilationFailed { name: String, message: String },
}

/// Frame uniforms and the fullscreen-triangle vertex stage.
pub const COMMON_WGSL: &str = r#"
struct FrameUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    // w = exposure
    camera_position: vec4<f32>,
    // xyz = toward sun (world), w = intensity
    sun_direction: vec4<f32>,
    // xyz = linear colour, w = altitude
    sun_color: vec4<f32>,
    // width, height, 1/width, 1/height
    viewport: vec4<f32>,
    // x = ssao, y = ssr, z = shadows, w = max environment mip
    effects: vec4<f32>,
};

struct FullscreenOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> FullscreenOut {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: FullscreenOut;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}
"#;

/// Full source for a pass.
pub fn compose(inputs: Option<&PassInputs>, body: &str) -> String {
    let declarations = inputs.map(|i| i.wgsl_declarations()).unwrap_or_default();
    format!("{COMMON_WGSL}\n{declarations}\n{body}")
}

/// Compile `source`, failing on any error the compiler reports.
pub fn compile(
    device: &wgpu::Device,
    name: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, ShaderError> {
    log::debug!("Compiling shader '{name}'");
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let info = pollster::block_on(module.get_compilation_info());
    let errors: Vec<String> = info
        .messages
        .iter()
        .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
        .map(|m| m.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(ShaderError::CompilationFailed {
            name: name.to_string(),
            message: errors.join("; "),
        });
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::{SamplerSlot, TextureSlot};

    #[test]
    fn test_compose_orders_sections() {
        let inputs = PassInputs {
            label: "t",
            textures: &[TextureSlot::Hdr],
            samplers: &[SamplerSlot::Linear],
        };
        let src = compose(Some(&inputs), "fn body_marker() {}");
        let prelude = src.find("struct FrameUniforms").unwrap();
        let decl = src.find("var hdr_tex").unwrap();
        let body = src.find("body_marker").unwrap();
        assert!(prelude < decl && decl < body);
    }

    #[test]
    fn test_prelude_compiles() {
        let Some((device, _queue, _)) = crate::gpu::create_test_device_queue() else {
            return;
        };
        assert!(compile(&device, "prelude", COMMON_WGSL).is_ok());
    }
}
