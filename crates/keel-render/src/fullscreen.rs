//! Fullscreen-triangle passes.
//!
//! Group 0 carries the frame uniforms (binding 0) and optional per-pass
//! parameters (binding 1). Group 1 carries the screen-space inputs declared by
//! the pass's [`PassInputs`].

use crate::shader::{self, ShaderError};
use crate::slots::{PassInputs, SharedSamplers, TextureSlot};
use crate::stats::{CountingPass, DrawStats, PassId};

/// Layout for group 0 of a fullscreen pass.
pub fn frame_params_layout(
    device: &wgpu::Device,
    label: &str,
    with_params: bool,
) -> wgpu::BindGroupLayout {
    let uniform = |binding, visibility| wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let mut entries = vec![uniform(
        0,
        wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
    )];
    if with_params {
        entries.push(uniform(1, wgpu::ShaderStages::FRAGMENT));
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label}-frame-bgl")),
        entries: &entries,
    })
}

/// Pipeline drawing the fullscreen triangle into a single colour target.
pub fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    fragment_entry: &str,
    layouts: &[&wgpu::BindGroupLayout],
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}-layout")),
        bind_group_layouts: layouts,
        immediate_size: 0,
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

/// Begin a single-attachment pass that clears `target` to `clear`.
pub fn begin_color_pass<'e, 's>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    clear: wgpu::Color,
    stats: &'s mut DrawStats,
    id: PassId,
) -> CountingPass<'e, 's> {
    let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(clear),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
    CountingPass::new(pass, stats, id)
}

/// What a fullscreen pass is built from.
pub struct FullscreenDesc<'a> {
    pub label: &'static str,
    pub inputs: PassInputs,
    pub module: &'a wgpu::ShaderModule,
    pub fragment_entry: &'a str,
    pub format: wgpu::TextureFormat,
    pub frame_uniforms: &'a wgpu::Buffer,
    pub params: Option<&'a wgpu::Buffer>,
}

/// A pipeline plus the bind groups it draws with. The input group refers to
/// canvas-sized targets and must be rebuilt whenever they are.
pub struct FullscreenPass {
    label: &'static str,
    inputs: PassInputs,
    pipeline: wgpu::RenderPipeline,
    frame_group: wgpu::BindGroup,
    input_layout: wgpu::BindGroupLayout,
    input_group: Option<wgpu::BindGroup>,
}

impl FullscreenPass {
    pub fn new(device: &wgpu::Device, desc: FullscreenDesc<'_>) -> Self {
        let frame_layout = frame_params_layout(device, desc.label, desc.params.is_some());
        let input_layout = desc.inputs.layout(device);
        let pipeline = fullscreen_pipeline(
            device,
            desc.label,
            desc.module,
            desc.fragment_entry,
            &[&frame_layout, &input_layout],
            desc.format,
            None,
        );

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: desc.frame_uniforms.as_entire_binding(),
        }];
        if let Some(params) = desc.params {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: params.as_entire_binding(),
            });
        }
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-frame-bg", desc.label)),
            layout: &frame_layout,
            entries: &entries,
        });

        Self {
            label: desc.label,
            inputs: desc.inputs,
            pipeline,
            frame_group,
            input_layout,
            input_group: None,
        }
    }

    /// Compile `body` with the prelude and declarations for `inputs`.
    pub fn compile(
        device: &wgpu::Device,
        name: &str,
        inputs: Option<&PassInputs>,
        body: &str,
    ) -> Result<wgpu::ShaderModule, ShaderError> {
        shader::compile(device, name, &shader::compose(inputs, body))
    }

    pub fn inputs(&self) -> &PassInputs {
        &self.inputs
    }

    pub fn rebind<'a>(
        &mut self,
        device: &wgpu::Device,
        view_for: impl Fn(TextureSlot) -> &'a wgpu::TextureView,
        samplers: &'a SharedSamplers,
    ) {
        self.input_group = Some(self.inputs.bind_group(
            device,
            &self.input_layout,
            view_for,
            samplers,
        ));
    }

    pub fn is_bound(&self) -> bool {
        self.input_group.is_some()
    }

    /// Draw into `target`. Does nothing until the inputs are bound.
    pub fn run(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        clear: wgpu::Color,
        stats: &mut DrawStats,
        id: PassId,
    ) {
        let Some(input_group) = &self.input_group else {
            log::warn!("Pass '{}' drawn before its inputs were bound", self.label);
            return;
        };
        let mut pass = begin_color_pass(encoder, self.label, target, clear, stats, id);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.frame_group);
        pass.set_bind_group(1, input_group);
        pass.draw_fullscreen();
    }
}
