//! Vertex and index buffers for decoded primitives.

use bytemuck::{Pod, Zeroable};
use keel_scene::{IndexArray, PrimitiveData};
use wgpu::util::DeviceExt;

/// Interleaved vertex used by every geometry pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct VertexPositionNormalUv {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

static_assertions::assert_eq_size!(VertexPositionNormalUv, [u8; 32]);

impl VertexPositionNormalUv {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    /// Full layout for the G-buffer pass.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    /// Same buffer read as positions only, for depth-only passes.
    pub fn position_only_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES[..1],
        }
    }
}

/// Interleave a primitive's attribute streams.
pub fn interleave(primitive: &PrimitiveData) -> Vec<VertexPositionNormalUv> {
    primitive
        .positions
        .iter()
        .enumerate()
        .map(|(i, &position)| VertexPositionNormalUv {
            position,
            normal: primitive.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            uv: primitive.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
        })
        .collect()
}

/// Index bytes ready for upload. wgpu has no 8-bit index format, so U8 arrays
/// are widened to U16 first.
pub fn index_bytes(indices: &IndexArray) -> (Vec<u8>, wgpu::IndexFormat) {
    match indices {
        IndexArray::U16(v) => (bytemuck::cast_slice(v).to_vec(), wgpu::IndexFormat::Uint16),
        IndexArray::U32(v) => (bytemuck::cast_slice(v).to_vec(), wgpu::IndexFormat::Uint32),
        IndexArray::U8(_) => index_bytes(&indices.widened()),
    }
}

/// A complete mesh buffer containing vertex and index data ready for GPU rendering.
pub struct MeshBuffer {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    pub index_format: wgpu::IndexFormat,
}

impl MeshBuffer {
    /// Upload one primitive.
    pub fn from_primitive(device: &wgpu::Device, label: &str, primitive: &PrimitiveData) -> Self {
        let vertices = interleave(primitive);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-vertices")),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let (bytes, index_format) = index_bytes(&primitive.indices);
        // Index buffers must be a multiple of 4 bytes.
        let mut padded = bytes;
        padded.resize(padded.len().div_ceil(4) * 4, 0);
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-indices")),
            contents: &padded,
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: primitive.indices.len() as u32,
            index_format,
        }
    }

    /// Bytes held on the GPU.
    pub fn byte_size(&self) -> u64 {
        self.vertex_buffer.size() + self.index_buffer.size()
    }

    /// Free the GPU memory now instead of when the last reference drops.
    pub fn release(&self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }
}
