//! GPU mirror of the CPU scene.
//!
//! Primitives are stored by [`keel_scene::RenderIndex`] so the CPU change
//! list applies directly. Material bind groups are rebuilt when a slot's
//! textures change or when one of them finishes uploading.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use keel_math::Aabb;
use keel_scene::{MaterialSlot, Scene, SceneChanges, TextureKey, TextureRef, WrapMode};
use wgpu::util::DeviceExt;

use crate::buffer::MeshBuffer;
use crate::stats::CountingPass;
use crate::texture::{GpuTexture, TextureCache, TextureError};

/// WGSL mirror of [`ObjectUniform`], bound at group 1 by geometry passes.
pub const OBJECT_WGSL: &str = r#"
struct ObjectUniform {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
};

@group(1) @binding(0) var<uniform> obj: ObjectUniform;
"#;

/// Per-primitive transforms at group 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`.
    pub normal_matrix: [[f32; 4]; 4],
}

static_assertions::assert_eq_size!(ObjectUniform, [u8; 128]);

impl ObjectUniform {
    pub fn new(world: Mat4) -> Self {
        let normal = if world.determinant().abs() > f32::EPSILON {
            world.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        Self {
            model: world.to_cols_array_2d(),
            normal_matrix: normal.to_cols_array_2d(),
        }
    }
}

/// Material factors at group 2, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    /// x = metallic, y = roughness, z = 1 when a normal map is bound.
    pub surface: [f32; 4],
}

static_assertions::assert_eq_size!(MaterialUniform, [u8; 32]);

impl MaterialUniform {
    pub fn new(slot: &MaterialSlot, has_normal_map: bool) -> Self {
        Self {
            base_color: slot.base_color,
            surface: [
                slot.metallic,
                slot.roughness,
                if has_normal_map { 1.0 } else { 0.0 },
                0.0,
            ],
        }
    }
}

struct GpuPrimitive {
    mesh: MeshBuffer,
    object_buffer: wgpu::Buffer,
    object_bind_group: wgpu::BindGroup,
    material: usize,
    world_bounds: Aabb,
}

impl GpuPrimitive {
    fn release(&self) {
        self.mesh.release();
        self.object_buffer.destroy();
    }
}

struct GpuMaterial {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    slot: MaterialSlot,
}

/// Uploaded geometry, materials and textures.
pub struct SceneGpu {
    object_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    primitives: Vec<Option<GpuPrimitive>>,
    materials: Vec<GpuMaterial>,
    textures: TextureCache,
    world_bounds: Option<Aabb>,
}

impl SceneGpu {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("object-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<ObjectUniform>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("material-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
                texture_entry(5),
                sampler_entry(6),
            ],
        });

        Self {
            object_layout,
            material_layout,
            primitives: Vec::new(),
            materials: Vec::new(),
            textures: TextureCache::new(device, queue),
            world_bounds: None,
        }
    }

    pub fn object_layout(&self) -> &wgpu::BindGroupLayout {
        &self.object_layout
    }

    pub fn material_layout(&self) -> &wgpu::BindGroupLayout {
        &self.material_layout
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    /// Union of the world bounds of every uploaded primitive.
    pub fn world_bounds(&self) -> Option<Aabb> {
        self.world_bounds
    }

    pub fn live_primitives(&self) -> usize {
        self.primitives.iter().flatten().count()
    }

    /// Bytes held by geometry and per-object uniforms.
    pub fn gpu_bytes(&self) -> u64 {
        self.primitives
            .iter()
            .flatten()
            .map(|p| p.mesh.byte_size() + p.object_buffer.size())
            .sum()
    }

    /// Bring the GPU copy in line with `scene`. Removed primitives are
    /// released before anything new is uploaded.
    pub fn apply_changes(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        changes: &SceneChanges,
    ) {
        for ri in &changes.removed {
            if let Some(old) = self.primitives.get_mut(ri.as_usize()).and_then(Option::take) {
                old.release();
            }
        }

        for &ri in &changes.added {
            let Some(prim) = scene.primitive(ri) else {
                continue;
            };
            let idx = ri.as_usize();
            if self.primitives.len() <= idx {
                self.primitives.resize_with(idx + 1, || None);
            }
            if let Some(old) = self.primitives[idx].take() {
                old.release();
            }
            let label = format!("primitive-{}", ri.0);
            let mesh = MeshBuffer::from_primitive(device, &label, &prim.data);
            let object_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}-object")),
                contents: bytemuck::bytes_of(&ObjectUniform::new(prim.world)),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let object_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{label}-object-bg")),
                layout: &self.object_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: object_buffer.as_entire_binding(),
                }],
            });
            self.primitives[idx] = Some(GpuPrimitive {
                mesh,
                object_buffer,
                object_bind_group,
                material: prim.material,
                world_bounds: prim.data.bounds.transformed(&prim.world),
            });
        }
        while matches!(self.primitives.last(), Some(None)) {
            self.primitives.pop();
        }

        self.sync_materials(device, queue, scene);
        self.world_bounds = self
            .primitives
            .iter()
            .flatten()
            .map(|p| p.world_bounds)
            .filter(|b| !b.is_empty())
            .reduce(|a, b| a.union(&b));

        if changes.geometry_changed() {
            log::debug!(
                "Scene upload: -{} +{} primitives, {} live, {} bytes",
                changes.removed.len(),
                changes.added.len(),
                self.live_primitives(),
                self.gpu_bytes()
            );
        }
    }

    /// Upload decoded pixels for `key` and rebind every material that uses
    /// it. Returns whether any material changed.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        key: &TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
        wrap: WrapMode,
    ) -> Result<bool, TextureError> {
        if self.textures.get(key).is_some() {
            return Ok(false);
        }
        self.textures
            .insert_rgba8(device, queue, key, width, height, rgba, wrap)?;

        let users: Vec<usize> = self
            .materials
            .iter()
            .enumerate()
            .filter(|(_, m)| m.slot.textures().any(|t| &t.key == key))
            .map(|(i, _)| i)
            .collect();
        for &i in &users {
            let slot = self.materials[i].slot.clone();
            self.materials[i] = self.build_material(device, i, slot);
        }
        Ok(!users.is_empty())
    }

    /// Depth-only draw for the shadow pass; group 1 is the object uniform.
    pub fn draw_depth(&self, pass: &mut CountingPass<'_, '_>) {
        for prim in self.primitives.iter().flatten() {
            pass.set_bind_group(1, &prim.object_bind_group);
            prim.draw(pass);
        }
    }

    /// G-buffer draw. Double-sided materials go through `double_sided`.
    pub fn draw_gbuffer(
        &self,
        pass: &mut CountingPass<'_, '_>,
        culled: &wgpu::RenderPipeline,
        double_sided: &wgpu::RenderPipeline,
    ) {
        for (pipeline, want_double) in [(culled, false), (double_sided, true)] {
            let mut bound = false;
            for prim in self.primitives.iter().flatten() {
                let Some(material) = self.materials.get(prim.material) else {
                    continue;
                };
                if material.slot.double_sided != want_double {
                    continue;
                }
                if !bound {
                    pass.set_pipeline(pipeline);
                    bound = true;
                }
                pass.set_bind_group(1, &prim.object_bind_group);
                pass.set_bind_group(2, &material.bind_group);
                prim.draw(pass);
            }
        }
    }

    fn sync_materials(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &Scene) {
        let slots = scene.materials();
        self.materials.truncate(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            match self.materials.get(i) {
                Some(existing) if existing.slot == *slot => {}
                Some(existing) if same_textures(&existing.slot, slot) => {
                    // Factors only; rewrite the uniform in place.
                    let uniform = MaterialUniform::new(slot, self.has_normal_map(slot));
                    queue.write_buffer(&existing.buffer, 0, bytemuck::bytes_of(&uniform));
                    self.materials[i].slot = slot.clone();
                }
                Some(_) => self.materials[i] = self.build_material(device, i, slot.clone()),
                None => {
                    let built = self.build_material(device, i, slot.clone());
                    self.materials.push(built);
                }
            }
        }
    }

    fn has_normal_map(&self, slot: &MaterialSlot) -> bool {
        slot.normal_texture
            .as_ref()
            .is_some_and(|t| self.textures.get(&t.key).is_some())
    }

    fn build_material(&self, device: &wgpu::Device, index: usize, slot: MaterialSlot) -> GpuMaterial {
        let uniform = MaterialUniform::new(&slot, self.has_normal_map(&slot));
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("material-{index}-uniform")),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let resolve = |tex: &Option<TextureRef>| -> (&GpuTexture, &wgpu::Sampler) {
            let (gpu, _) = self.textures.get_or_placeholder(tex.as_ref().map(|t| &t.key));
            (gpu, self.textures.sampler(binding_wrap(tex.as_ref())))
        };
        let (base, base_sampler) = resolve(&slot.base_color_texture);
        let (mr, mr_sampler) = resolve(&slot.metallic_roughness_texture);
        let (normal, normal_sampler) = resolve(&slot.normal_texture);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("material-{index}-bg")),
            layout: &self.material_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&base.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(base_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&mr.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(mr_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&normal.view),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Sampler(normal_sampler),
                },
            ],
        });

        GpuMaterial {
            buffer,
            bind_group,
            slot,
        }
    }
}

impl GpuPrimitive {
    fn draw(&self, pass: &mut CountingPass<'_, '_>) {
        pass.set_vertex_buffer(0, self.mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(self.mesh.index_buffer.slice(..), self.mesh.index_format);
        pass.draw_indexed(0..self.mesh.index_count);
    }
}

/// Addressing for one material binding. Uploads are shared by key, so the
/// wrap comes from the referencing material rather than the cached texture.
fn binding_wrap(texture: Option<&TextureRef>) -> WrapMode {
    texture.map(|t| t.wrap).unwrap_or_default()
}

fn same_textures(a: &MaterialSlot, b: &MaterialSlot) -> bool {
    a.base_color_texture == b.base_color_texture
        && a.metallic_roughness_texture == b.metallic_roughness_texture
        && a.normal_texture == b.normal_texture
}

/// Textures referenced by `scene` that the cache has not uploaded yet, one
/// per key.
pub fn missing_textures(scene: &Scene, cache: &TextureCache) -> Vec<TextureRef> {
    let mut out: Vec<TextureRef> = scene
        .materials()
        .iter()
        .flat_map(|m| m.textures())
        .filter(|t| cache.get(&t.key).is_none())
        .cloned()
        .collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out.dedup_by(|a, b| a.key == b.key);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;
    use glam::Vec3;
    use keel_scene::{DecodedModel, IndexArray, MeshData, NodeData, PrimitiveData};

    fn quad(offset: f32) -> PrimitiveData {
        let positions = vec![
            [offset, 0.0, 0.0],
            [offset + 1.0, 0.0, 0.0],
            [offset + 1.0, 1.0, 0.0],
            [offset, 1.0, 0.0],
        ];
        PrimitiveData {
            bounds: Aabb::from_points(positions.iter().map(|p| Vec3::from(*p))).unwrap(),
            positions,
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: IndexArray::U16(vec![0, 1, 2, 0, 2, 3]),
            material: Some(0),
        }
    }

    fn model(prims: Vec<PrimitiveData>, slot: MaterialSlot) -> DecodedModel {
        DecodedModel {
            meshes: vec![MeshData {
                name: "mesh".into(),
                primitives: prims,
            }],
            materials: vec![slot],
            nodes: vec![NodeData {
                index: 0,
                name: "body".into(),
                mesh: Some(0),
                world: Mat4::IDENTITY,
            }],
        }
    }

    #[test]
    fn test_normal_matrix_of_uniform_scale() {
        let u = ObjectUniform::new(Mat4::from_scale(Vec3::splat(2.0)));
        assert!((u.normal_matrix[0][0] - 0.5).abs() < 1e-6);
        let degenerate = ObjectUniform::new(Mat4::ZERO);
        assert_eq!(degenerate.normal_matrix, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn test_material_uniform_flags_normal_map() {
        let slot = MaterialSlot {
            metallic: 0.3,
            roughness: 0.7,
            ..MaterialSlot::default()
        };
        assert_eq!(MaterialUniform::new(&slot, true).surface, [0.3, 0.7, 1.0, 0.0]);
        assert_eq!(MaterialUniform::new(&slot, false).surface[2], 0.0);
    }

    #[test]
    fn test_shared_texture_keeps_each_binding_wrap() {
        let clamped = TextureRef::from_path("hull.png", WrapMode::Clamp);
        let mirrored = TextureRef::from_path("hull.png", WrapMode::Mirror);
        assert_eq!(clamped.key, mirrored.key);
        assert_eq!(binding_wrap(Some(&clamped)), WrapMode::Clamp);
        assert_eq!(binding_wrap(Some(&mirrored)), WrapMode::Mirror);
        assert_eq!(binding_wrap(None), WrapMode::Repeat);
    }

    #[test]
    fn test_wrap_change_on_shared_key_rebinds() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let repeat = TextureRef::from_path("deck.png", WrapMode::Repeat);
        let slot = MaterialSlot {
            base_color_texture: Some(repeat.clone()),
            ..MaterialSlot::default()
        };
        let mut gpu = SceneGpu::new(&device, &queue);
        let mut scene = Scene::from_model(model(vec![quad(0.0)], slot));
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);
        let pixels = vec![255u8; 4 * 4 * 4];
        gpu.upload_texture(&device, &queue, &repeat.key, 4, 4, &pixels, WrapMode::Repeat)
            .unwrap();

        let clamped = TextureRef::from_path("deck.png", WrapMode::Clamp);
        scene.set_slot_texture(0, Some(clamped)).unwrap();
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);
        // Same pixels, no new upload, but the binding now clamps.
        assert_eq!(gpu.textures().len(), 1);
        assert!(missing_textures(&scene, gpu.textures()).is_empty());
        let bound = gpu.materials[0].slot.base_color_texture.as_ref();
        assert_eq!(binding_wrap(bound), WrapMode::Clamp);
    }

    #[test]
    fn test_removed_primitives_released_before_upload() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let mut gpu = SceneGpu::new(&device, &queue);
        let mut scene = Scene::from_model(model(vec![quad(0.0), quad(2.0)], MaterialSlot::default()));
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);
        assert_eq!(gpu.live_primitives(), 2);
        let bounds = gpu.world_bounds().unwrap();
        assert_eq!(bounds.max.x, 3.0);

        scene.load_model(model(vec![quad(5.0)], MaterialSlot::default()));
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);
        assert_eq!(gpu.live_primitives(), 1);
        assert_eq!(gpu.world_bounds().unwrap().min.x, 5.0);
    }

    #[test]
    fn test_texture_arrival_rebinds_material() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let texture = TextureRef::from_path("paint.png", WrapMode::Repeat);
        let slot = MaterialSlot {
            base_color_texture: Some(texture.clone()),
            ..MaterialSlot::default()
        };
        let mut gpu = SceneGpu::new(&device, &queue);
        let mut scene = Scene::from_model(model(vec![quad(0.0)], slot));
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);
        assert_eq!(missing_textures(&scene, gpu.textures()), vec![texture.clone()]);

        let pixels = vec![255u8; 4 * 4 * 4];
        let changed = gpu
            .upload_texture(&device, &queue, &texture.key, 4, 4, &pixels, WrapMode::Repeat)
            .unwrap();
        assert!(changed);
        assert!(missing_textures(&scene, gpu.textures()).is_empty());

        let again = gpu
            .upload_texture(&device, &queue, &texture.key, 4, 4, &pixels, WrapMode::Repeat)
            .unwrap();
        assert!(!again);
    }

    #[test]
    fn test_colour_change_keeps_bind_group() {
        let Some((device, queue, _)) = create_test_device_queue() else {
            return;
        };
        let mut gpu = SceneGpu::new(&device, &queue);
        let mut scene = Scene::from_model(model(vec![quad(0.0)], MaterialSlot::default()));
        let changes = scene.take_changes();
        gpu.apply_changes(&device, &queue, &scene, &changes);

        scene.set_slot_color(0, [1.0, 0.0, 0.0]).unwrap();
        let changes = scene.take_changes();
        assert!(!changes.geometry_changed());
        gpu.apply_changes(&device, &queue, &scene, &changes);
        assert_eq!(gpu.materials[0].slot.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(gpu.live_primitives(), 1);
    }
}
