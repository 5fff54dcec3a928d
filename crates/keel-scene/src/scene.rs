//! Runtime scene: named nodes, a primitive slab addressed by [`RenderIndex`],
//! shared material slots and per-node cached world bounds.

use std::cell::OnceCell;

use glam::Mat4;
use keel_math::{Aabb, BoundingSphere};
use rustc_hash::FxHashMap;

use crate::error::SceneError;
use crate::material::{MaterialSlot, TextureRef};
use crate::model::{DecodedModel, PrimitiveData};

/// Stable handle to one primitive in the scene's slab.
///
/// Handles of removed primitives may be reused by later additions; consumers
/// apply [`SceneChanges::removed`] before [`SceneChanges::added`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderIndex(pub u32);

impl RenderIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub struct ScenePrimitive {
    pub data: PrimitiveData,
    /// Index into [`Scene::materials`].
    pub material: usize,
    pub world: Mat4,
    /// Index of the owning node in [`Scene::nodes`].
    pub node: usize,
}

#[derive(Debug)]
pub struct SceneNode {
    pub name: String,
    pub world: Mat4,
    pub render_indices: Vec<RenderIndex>,
    bounds: OnceCell<Option<Aabb>>,
}

impl SceneNode {
    fn new(name: String, world: Mat4) -> Self {
        Self {
            name,
            world,
            render_indices: Vec::new(),
            bounds: OnceCell::new(),
        }
    }

    /// Bounds if already computed since the last invalidation.
    pub fn cached_bounds(&self) -> Option<Option<Aabb>> {
        self.bounds.get().copied()
    }

    fn invalidate(&mut self) {
        self.bounds = OnceCell::new();
    }
}

/// What changed since the last [`Scene::take_changes`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneChanges {
    pub removed: Vec<RenderIndex>,
    pub added: Vec<RenderIndex>,
    /// Material slots whose parameters or textures changed.
    pub materials: Vec<usize>,
}

impl SceneChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.materials.is_empty()
    }

    /// Geometry or transforms changed, so shadow and occlusion are stale.
    pub fn geometry_changed(&self) -> bool {
        !self.removed.is_empty() || !self.added.is_empty()
    }
}

/// The loaded model plus any applied variants.
///
/// Only nodes that carry geometry become scene nodes. Material slots are shared
/// by name: a variant whose material is named like an existing slot reuses it,
/// so a colour picked for that slot survives the swap.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    by_name: FxHashMap<String, usize>,
    primitives: Vec<Option<ScenePrimitive>>,
    free: Vec<RenderIndex>,
    materials: Vec<MaterialSlot>,
    material_by_name: FxHashMap<String, usize>,
    changes: SceneChanges,
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_model(model: DecodedModel) -> Self {
        let mut scene = Self::new();
        scene.load_model(model);
        scene
    }

    /// Replace the whole scene with a freshly decoded model.
    pub fn load_model(&mut self, model: DecodedModel) {
        let removed: Vec<RenderIndex> = self.live_indices().collect();
        // Pending additions refer to primitives that are about to disappear.
        self.changes.added.clear();
        self.changes.materials.clear();
        self.changes.removed.extend(removed);
        self.nodes.clear();
        self.by_name.clear();
        self.primitives.clear();
        self.free.clear();
        self.materials.clear();
        self.material_by_name.clear();

        let slots = self.merge_materials(&model.materials);
        for node in &model.nodes {
            let Some(mesh) = node.mesh.and_then(|m| model.meshes.get(m)) else {
                continue;
            };
            let index = self.nodes.len();
            if self.by_name.contains_key(&node.name) {
                log::warn!("duplicate node name '{}', lookups resolve to the first", node.name);
            } else {
                self.by_name.insert(node.name.clone(), index);
            }
            self.nodes.push(SceneNode::new(node.name.clone(), node.world));
            for prim in &mesh.primitives {
                self.insert_primitive(index, prim.clone(), node.world, &slots);
            }
        }
        self.revision += 1;
        log::info!(
            "scene loaded: {} nodes, {} primitives, {} material slots",
            self.nodes.len(),
            self.primitive_count(),
            self.materials.len()
        );
    }

    /// Replace the geometry of `node` with a variant model.
    ///
    /// Variant geometry is authored in the target node's local frame. The old
    /// primitives are removed wholesale and the node's cached bounds dropped.
    pub fn apply_variant(&mut self, node: &str, model: DecodedModel) -> Result<(), SceneError> {
        let target = *self
            .by_name
            .get(node)
            .ok_or_else(|| SceneError::UnknownNode(node.to_string()))?;
        if model.primitive_count() == 0 {
            return Err(SceneError::EmptyVariant(node.to_string()));
        }

        let old = std::mem::take(&mut self.nodes[target].render_indices);
        for ri in old {
            self.primitives[ri.as_usize()] = None;
            self.free.push(ri);
            self.changes.removed.push(ri);
        }
        self.nodes[target].invalidate();

        let slots = self.merge_materials(&model.materials);
        let base = self.nodes[target].world;
        for vnode in &model.nodes {
            let Some(mesh) = vnode.mesh.and_then(|m| model.meshes.get(m)) else {
                continue;
            };
            for prim in &mesh.primitives {
                self.insert_primitive(target, prim.clone(), base * vnode.world, &slots);
            }
        }
        self.revision += 1;
        log::info!(
            "variant applied to '{node}': {} primitives",
            self.nodes[target].render_indices.len()
        );
        Ok(())
    }

    /// Set the base colour of a material slot, keeping its alpha.
    pub fn set_slot_color(&mut self, slot: usize, rgb: [f32; 3]) -> Result<(), SceneError> {
        let s = self.slot_mut(slot)?;
        s.base_color = [rgb[0], rgb[1], rgb[2], s.base_color[3]];
        self.touch_material(slot);
        Ok(())
    }

    /// Set or clear the base colour texture of a material slot.
    pub fn set_slot_texture(
        &mut self,
        slot: usize,
        texture: Option<TextureRef>,
    ) -> Result<(), SceneError> {
        self.slot_mut(slot)?.base_color_texture = texture;
        self.touch_material(slot);
        Ok(())
    }

    /// Set metallic and roughness factors of a material slot.
    pub fn set_slot_surface(
        &mut self,
        slot: usize,
        metallic: f32,
        roughness: f32,
    ) -> Result<(), SceneError> {
        let s = self.slot_mut(slot)?;
        s.metallic = metallic.clamp(0.0, 1.0);
        s.roughness = roughness.clamp(0.0, 1.0);
        self.touch_material(slot);
        Ok(())
    }

    /// Drain accumulated changes for the GPU side.
    pub fn take_changes(&mut self) -> SceneChanges {
        std::mem::take(&mut self.changes)
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&SceneNode> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn materials(&self) -> &[MaterialSlot] {
        &self.materials
    }

    pub fn material(&self, slot: usize) -> Option<&MaterialSlot> {
        self.materials.get(slot)
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.material_by_name.get(name).copied()
    }

    pub fn primitive(&self, index: RenderIndex) -> Option<&ScenePrimitive> {
        self.primitives.get(index.as_usize())?.as_ref()
    }

    /// Live primitives in slab order.
    pub fn primitives(&self) -> impl Iterator<Item = (RenderIndex, &ScenePrimitive)> {
        self.primitives
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (RenderIndex(i as u32), p)))
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.iter().flatten().count()
    }

    /// World bounds of a node, computed on first use and cached until its
    /// geometry changes.
    pub fn node_bounds(&self, name: &str) -> Option<Aabb> {
        let node = self.node(name)?;
        *node.bounds.get_or_init(|| {
            let mut out = Aabb::EMPTY;
            for p in node.render_indices.iter().filter_map(|&ri| self.primitive(ri)) {
                if !p.data.bounds.is_empty() {
                    out = out.union(&p.data.bounds.transformed(&p.world));
                }
            }
            (!out.is_empty()).then_some(out)
        })
    }

    /// Union of every node's world bounds.
    pub fn world_bounds(&self) -> Option<Aabb> {
        self.nodes
            .iter()
            .filter_map(|n| self.node_bounds(&n.name))
            .reduce(|a, b| a.union(&b))
    }

    /// Center and radius for framing a node with the camera.
    pub fn focus(&self, name: &str) -> Option<BoundingSphere> {
        self.node_bounds(name).map(|b| b.bounding_sphere())
    }

    fn live_indices(&self) -> impl Iterator<Item = RenderIndex> + '_ {
        self.primitives().map(|(ri, _)| ri)
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut MaterialSlot, SceneError> {
        let len = self.materials.len();
        self.materials
            .get_mut(slot)
            .ok_or(SceneError::UnknownMaterial { index: slot, len })
    }

    fn touch_material(&mut self, slot: usize) {
        if !self.changes.materials.contains(&slot) {
            self.changes.materials.push(slot);
        }
        self.revision += 1;
    }

    /// Map a model's material table onto scene slots, reusing slots by name.
    /// Returns the slot for each model material, plus the default slot last.
    fn merge_materials(&mut self, materials: &[MaterialSlot]) -> Vec<usize> {
        let mut out: Vec<usize> = materials
            .iter()
            .map(|m| self.slot_for(m.clone()))
            .collect();
        out.push(self.slot_for(MaterialSlot::default()));
        out
    }

    fn slot_for(&mut self, material: MaterialSlot) -> usize {
        if let Some(&i) = self.material_by_name.get(&material.name) {
            return i;
        }
        let i = self.materials.len();
        self.material_by_name.insert(material.name.clone(), i);
        self.materials.push(material);
        i
    }

    fn insert_primitive(&mut self, node: usize, data: PrimitiveData, world: Mat4, slots: &[usize]) {
        // The default slot sits at the end of `slots`.
        let default = slots[slots.len() - 1];
        let material = data
            .material
            .and_then(|m| slots.get(m).copied())
            .unwrap_or(default);
        let prim = ScenePrimitive {
            data,
            material,
            world,
            node,
        };
        let ri = match self.free.pop() {
            Some(ri) => {
                self.primitives[ri.as_usize()] = Some(prim);
                ri
            }
            None => {
                self.primitives.push(Some(prim));
                RenderIndex((self.primitives.len() - 1) as u32)
            }
        };
        self.nodes[node].render_indices.push(ri);
        self.changes.added.push(ri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::IndexArray;
    use crate::model::{MeshData, NodeData};
    use glam::Vec3;

    fn prim(points: &[[f32; 3]], material: Option<usize>) -> PrimitiveData {
        PrimitiveData {
            positions: points.to_vec(),
            normals: vec![[0.0, 1.0, 0.0]; points.len()],
            uvs: vec![[0.0; 2]; points.len()],
            indices: IndexArray::sequential(points.len()),
            material,
            bounds: Aabb::from_points(points.iter().map(|&p| Vec3::from(p))).unwrap(),
        }
    }

    fn model(nodes: &[(&str, Vec<PrimitiveData>)], materials: &[&str]) -> DecodedModel {
        DecodedModel {
            meshes: nodes
                .iter()
                .map(|(name, prims)| MeshData {
                    name: name.to_string(),
                    primitives: prims.clone(),
                })
                .collect(),
            materials: materials
                .iter()
                .map(|n| MaterialSlot {
                    name: n.to_string(),
                    ..MaterialSlot::default()
                })
                .collect(),
            nodes: nodes
                .iter()
                .enumerate()
                .map(|(i, (name, _))| NodeData {
                    index: i,
                    name: name.to_string(),
                    mesh: Some(i),
                    world: Mat4::IDENTITY,
                })
                .collect(),
        }
    }

    #[test]
    fn test_load_builds_node_table() {
        let scene = Scene::from_model(model(
            &[
                ("Hull", vec![prim(&[[0.0; 3], [1.0; 3]], Some(0))]),
                ("Seat", vec![prim(&[[2.0; 3]], None), prim(&[[3.0; 3]], Some(1))]),
            ],
            &["gelcoat", "vinyl"],
        ));
        assert_eq!(scene.nodes().len(), 2);
        assert_eq!(scene.node("Seat").unwrap().render_indices.len(), 2);
        assert_eq!(scene.primitive_count(), 3);
        // Two named slots plus the default.
        assert_eq!(scene.materials().len(), 3);
        let seat = scene.node("Seat").unwrap();
        let first = scene.primitive(seat.render_indices[0]).unwrap();
        assert_eq!(scene.materials()[first.material].name, "default");
    }

    #[test]
    fn test_bounds_cached_then_invalidated_by_variant() {
        let mut scene = Scene::from_model(model(
            &[("Hull", vec![prim(&[[0.0; 3], [1.0; 3]], None)])],
            &[],
        ));
        assert!(scene.node("Hull").unwrap().cached_bounds().is_none());
        let before = scene.node_bounds("Hull").unwrap();
        assert_eq!(scene.node("Hull").unwrap().cached_bounds(), Some(Some(before)));

        scene
            .apply_variant("Hull", model(&[("v", vec![prim(&[[-4.0; 3], [4.0; 3]], None)])], &[]))
            .unwrap();
        assert!(scene.node("Hull").unwrap().cached_bounds().is_none());
        let after = scene.node_bounds("Hull").unwrap();
        assert_eq!(after.min, Vec3::splat(-4.0));
        assert_ne!(before, after);
    }

    #[test]
    fn test_variant_changes_list_removed_and_added() {
        let mut scene = Scene::from_model(model(
            &[("Hull", vec![prim(&[[0.0; 3]], None), prim(&[[1.0; 3]], None)])],
            &[],
        ));
        let initial = scene.take_changes();
        assert_eq!(initial.added.len(), 2);
        assert!(scene.take_changes().is_empty());

        scene
            .apply_variant("Hull", model(&[("v", vec![prim(&[[5.0; 3]], None)])], &[]))
            .unwrap();
        let changes = scene.take_changes();
        assert_eq!(changes.removed.len(), 2);
        assert_eq!(changes.added.len(), 1);
        assert!(changes.geometry_changed());
        assert_eq!(scene.primitive_count(), 1);
    }

    #[test]
    fn test_variant_errors() {
        let mut scene = Scene::from_model(model(&[("Hull", vec![prim(&[[0.0; 3]], None)])], &[]));
        assert!(matches!(
            scene.apply_variant("Mast", model(&[("v", vec![prim(&[[0.0; 3]], None)])], &[])),
            Err(SceneError::UnknownNode(_))
        ));
        assert!(matches!(
            scene.apply_variant("Hull", DecodedModel::default()),
            Err(SceneError::EmptyVariant(_))
        ));
        // Failed swaps leave the node intact.
        assert_eq!(scene.node("Hull").unwrap().render_indices.len(), 1);
    }

    #[test]
    fn test_variant_reuses_material_slot_by_name() {
        let mut scene = Scene::from_model(model(
            &[("Hull", vec![prim(&[[0.0; 3]], Some(0))])],
            &["gelcoat"],
        ));
        let slot = scene.slot_index("gelcoat").unwrap();
        scene.set_slot_color(slot, [0.1, 0.2, 0.3]).unwrap();
        scene
            .apply_variant("Hull", model(&[("v", vec![prim(&[[1.0; 3]], Some(0))])], &["gelcoat"]))
            .unwrap();
        let hull = scene.node("Hull").unwrap();
        let p = scene.primitive(hull.render_indices[0]).unwrap();
        assert_eq!(p.material, slot);
        assert_eq!(scene.materials()[slot].base_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_material_mutations_recorded() {
        let mut scene = Scene::from_model(model(&[("Hull", vec![prim(&[[0.0; 3]], Some(0))])], &["a"]));
        scene.take_changes();
        let rev = scene.revision();
        scene
            .set_slot_texture(0, Some(TextureRef::from_path("wood.jpg", Default::default())))
            .unwrap();
        scene.set_slot_surface(0, 2.0, -1.0).unwrap();
        let changes = scene.take_changes();
        assert_eq!(changes.materials, vec![0]);
        assert!(!changes.geometry_changed());
        assert_eq!(scene.revision(), rev + 2);
        assert_eq!(scene.materials()[0].metallic, 1.0);
        assert_eq!(scene.materials()[0].roughness, 0.0);
        assert!(matches!(
            scene.set_slot_color(42, [1.0; 3]),
            Err(SceneError::UnknownMaterial { index: 42, .. })
        ));
    }

    #[test]
    fn test_focus_returns_sphere() {
        let scene = Scene::from_model(model(
            &[("Hull", vec![prim(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]], None)])],
            &[],
        ));
        let s = scene.focus("Hull").unwrap();
        assert_eq!(s.center, Vec3::new(1.0, 0.0, 0.0));
        assert!((s.radius - 1.0).abs() < 1e-6);
        assert!(scene.focus("Nope").is_none());
    }
}
