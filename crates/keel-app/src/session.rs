//! Everything the viewer tracks apart from the window and the GPU: the scene,
//! pending loads, the variant catalog, lighting and the camera.

use std::path::Path;
use std::sync::Arc;

use keel_assets::{AssetLoader, DecodedImage, Fetcher, LoadEvent};
use keel_config::Config;
use keel_lighting::LightingState;
use keel_render::{OrbitCamera, TextureCache, missing_textures};
use keel_scene::{
    DecodedModel, Scene, TextureKey, TextureRef, Variant, VariantCatalog, WrapMode,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::settings::lighting_state;

pub struct Session {
    pub scene: Scene,
    pub camera: OrbitCamera,
    pub lighting: LightingState,
    loader: AssetLoader,
    catalog: VariantCatalog,
    model_source: Option<String>,
    /// Variant chosen while its geometry was still loading.
    pending_variant: Option<Variant>,
    texture_wraps: FxHashMap<TextureKey, WrapMode>,
    /// Scene revision at the last texture scan.
    textures_scanned: Option<u64>,
    variant_cursor: usize,
    option_cursor: usize,
    focus_cursor: usize,
}

/// Read the catalog named in the config. A broken catalog is logged and
/// replaced by an empty one.
pub fn load_catalog(path: Option<&str>) -> VariantCatalog {
    let Some(path) = path else {
        return VariantCatalog::default();
    };
    match VariantCatalog::from_ron(Path::new(path)) {
        Ok(catalog) => {
            info!(
                "Catalog {path}: {} variants, {} material options",
                catalog.variants().len(),
                catalog.options().len()
            );
            catalog
        }
        Err(e) => {
            warn!("Ignoring catalog {path}: {e}");
            VariantCatalog::default()
        }
    }
}

impl Session {
    /// Start loading the configured model and preloading every variant's geometry.
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>, catalog: VariantCatalog) -> Self {
        let mut loader = AssetLoader::new(fetcher, config.assets.preload_concurrency);
        let model_source = config.assets.model.clone();
        if let Some(source) = &model_source {
            loader.request_model(source);
        }
        loader.preload_models(catalog.variants().iter().map(|v| v.source.as_str()));

        Self {
            scene: Scene::new(),
            camera: OrbitCamera::default(),
            lighting: lighting_state(&config.lighting),
            loader,
            catalog,
            model_source,
            pending_variant: None,
            texture_wraps: FxHashMap::default(),
            textures_scanned: None,
            variant_cursor: 0,
            option_cursor: 0,
            focus_cursor: 0,
        }
    }

    /// Apply finished loads. Returns textures that are decoded and ready to upload.
    pub fn poll_loads(&mut self) -> Vec<TextureKey> {
        let mut ready = Vec::new();
        for event in self.loader.poll() {
            match event {
                LoadEvent::ModelReady(source) => self.on_model_ready(&source),
                LoadEvent::ModelFailed { source, error } => {
                    if self.model_source.as_deref() == Some(source.as_str()) {
                        warn!("Model {source} failed, keeping the current scene: {error}");
                    }
                    if self
                        .pending_variant
                        .as_ref()
                        .is_some_and(|v| v.source == source)
                    {
                        warn!("Variant geometry {source} failed: {error}");
                        self.pending_variant = None;
                    }
                }
                LoadEvent::TextureReady(key) => ready.push(key),
                LoadEvent::TextureFailed { key, error } => {
                    debug!("Texture {key} stays on the placeholder: {error}");
                }
            }
        }
        ready
    }

    /// Request textures the scene references but `cache` lacks. Returns the
    /// ones already decoded by an earlier load.
    pub fn request_missing_textures(&mut self, cache: &TextureCache) -> Vec<TextureKey> {
        if !self.textures_stale() {
            return Vec::new();
        }
        let missing = missing_textures(&self.scene, cache);
        self.request_textures(missing)
    }

    /// True once per scene revision.
    fn textures_stale(&mut self) -> bool {
        let revision = self.scene.revision();
        if self.textures_scanned == Some(revision) {
            return false;
        }
        self.textures_scanned = Some(revision);
        true
    }

    fn request_textures(&mut self, textures: Vec<TextureRef>) -> Vec<TextureKey> {
        let mut ready = Vec::new();
        for texture in textures {
            self.texture_wraps.insert(texture.key.clone(), texture.wrap);
            let handle = self.loader.request_texture(&texture);
            if handle.get().is_some() {
                ready.push(texture.key);
            }
        }
        ready
    }

    /// Decoded pixels and wrap mode for an uploadable texture.
    pub fn texture_upload(&self, key: &TextureKey) -> Option<(Arc<DecodedImage>, WrapMode)> {
        let image = self.loader.texture(key)?.get()?;
        let wrap = self.texture_wraps.get(key).copied().unwrap_or_default();
        Some((Arc::clone(image), wrap))
    }

    /// Loads still running on the workers.
    pub fn loads_in_flight(&self) -> usize {
        self.loader.in_flight()
    }

    fn on_model_ready(&mut self, source: &str) {
        let Some(model) = self.loader.model(source).and_then(|h| h.get()).cloned() else {
            return;
        };
        if self.model_source.as_deref() == Some(source) {
            self.show_model(&model);
        }
        if let Some(variant) = self
            .pending_variant
            .take_if(|v| v.source == source)
        {
            self.apply_variant(&variant, &model);
        }
    }

    /// Replace the scene with `model` and frame it.
    pub fn show_model(&mut self, model: &DecodedModel) {
        self.scene.load_model(model.clone());
        self.focus_cursor = 0;
        info!(
            "Showing {} nodes, {} primitives",
            self.scene.nodes().len(),
            self.scene.primitive_count()
        );
        self.reset_view();
    }

    fn apply_variant(&mut self, variant: &Variant, model: &DecodedModel) {
        match self.scene.apply_variant(&variant.target_node, model.clone()) {
            Ok(()) => info!("Variant '{}' applied to {}", variant.name, variant.target_node),
            Err(e) => warn!("Variant '{}' not applied: {e}", variant.name),
        }
    }

    /// Advance to the next weather preset.
    pub fn cycle_weather(&mut self) -> bool {
        let next = self.lighting.preset.next();
        let changed = self.lighting.set_preset(next);
        if changed {
            info!("Weather: {}", next.name());
        }
        changed
    }

    pub fn toggle_environment(&mut self) -> bool {
        let next = self.lighting.mode.toggled();
        let changed = self.lighting.set_mode(next);
        if changed {
            info!("Environment: {}", next.name());
        }
        changed
    }

    /// Select the next catalog variant. Applied now when its geometry is
    /// cached, otherwise once the load finishes.
    pub fn next_variant(&mut self) {
        let variants = self.catalog.variants();
        if variants.is_empty() {
            return;
        }
        let variant = variants[self.variant_cursor % variants.len()].clone();
        self.variant_cursor += 1;

        let handle = self.loader.request_model(&variant.source);
        match handle.get() {
            Some(model) => {
                self.pending_variant = None;
                self.apply_variant(&variant, model);
            }
            None => {
                debug!("Variant '{}' waiting for {}", variant.name, variant.source);
                self.pending_variant = Some(variant);
            }
        }
    }

    pub fn next_material_option(&mut self) {
        let options = self.catalog.options();
        if options.is_empty() {
            return;
        }
        let option = &options[self.option_cursor % options.len()];
        self.option_cursor += 1;
        match self.catalog.apply_option(&mut self.scene, option) {
            Ok(()) => info!("Material option '{}' on slot {}", option.name, option.slot),
            Err(e) => warn!("Material option '{}' not applied: {e}", option.name),
        }
    }

    /// Frame the next part in node order. Returns its name.
    pub fn focus_next_part(&mut self) -> Option<String> {
        let nodes = self.scene.nodes();
        if nodes.is_empty() {
            return None;
        }
        let name = nodes[self.focus_cursor % nodes.len()].name.clone();
        self.focus_cursor += 1;
        let sphere = self.scene.focus(&name)?;
        self.camera.frame_bounds(sphere.center, sphere.radius);
        Some(name)
    }

    /// Frame the whole scene.
    pub fn reset_view(&mut self) {
        if let Some(bounds) = self.scene.world_bounds() {
            let sphere = bounds.bounding_sphere();
            self.camera.frame_bounds(sphere.center, sphere.radius);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use glam::{Mat4, Vec3};
    use keel_assets::FetchError;
    use keel_lighting::{EnvironmentMode, WeatherPreset};
    use keel_math::Aabb;
    use keel_scene::{IndexArray, MaterialSlot, MeshData, NodeData, PrimitiveData};

    struct MissingFetcher;

    impl Fetcher for MissingFetcher {
        fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Status {
                url: path.to_string(),
                status: 404,
            })
        }
    }

    fn session(config: &Config, catalog: VariantCatalog) -> Session {
        Session::new(config, Arc::new(MissingFetcher), catalog)
    }

    fn box_node(name: &str, mesh: usize, offset: Vec3) -> NodeData {
        NodeData {
            index: mesh,
            name: name.into(),
            mesh: Some(mesh),
            world: Mat4::from_translation(offset),
        }
    }

    fn unit_box() -> MeshData {
        let positions = vec![[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, 1.0, 1.0]];
        MeshData {
            name: "box".into(),
            primitives: vec![PrimitiveData {
                bounds: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
                normals: vec![[0.0, 1.0, 0.0]; 3],
                uvs: vec![[0.0; 2]; 3],
                indices: IndexArray::sequential(3),
                material: Some(0),
                positions,
            }],
        }
    }

    fn two_part_model() -> DecodedModel {
        DecodedModel {
            meshes: vec![unit_box(), unit_box()],
            materials: vec![MaterialSlot::default()],
            nodes: vec![
                box_node("Hull", 0, Vec3::ZERO),
                box_node("Mast", 1, Vec3::new(0.0, 5.0, 0.0)),
            ],
        }
    }

    #[test]
    fn test_weather_cycles_through_presets() {
        let mut session = session(&Config::default(), VariantCatalog::default());
        assert_eq!(session.lighting.preset, WeatherPreset::Day);
        assert!(session.cycle_weather());
        assert_eq!(session.lighting.preset, WeatherPreset::Sunset);
        for _ in 0..3 {
            session.cycle_weather();
        }
        assert_eq!(session.lighting.preset, WeatherPreset::Day);
    }

    #[test]
    fn test_environment_toggle() {
        let mut session = session(&Config::default(), VariantCatalog::default());
        assert!(session.toggle_environment());
        assert_eq!(session.lighting.mode, EnvironmentMode::Studio);
        assert!(session.toggle_environment());
        assert_eq!(session.lighting.mode, EnvironmentMode::Sky);
    }

    #[test]
    fn test_failed_model_keeps_scene() {
        let mut config = Config::default();
        config.assets.model = Some("missing.glb".into());
        let mut session = session(&config, VariantCatalog::default());
        session.show_model(&two_part_model());

        // A failed model is forgotten by the loader once its event is polled.
        let start = Instant::now();
        while session.loader.model("missing.glb").is_some() {
            session.poll_loads();
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(session.scene.nodes().len(), 2);
    }

    #[test]
    fn test_show_model_frames_whole_scene() {
        let mut session = session(&Config::default(), VariantCatalog::default());
        session.show_model(&two_part_model());
        // Hull spans y -1..1 and the mast y 4..6.
        assert!((session.camera.target - Vec3::new(0.0, 2.5, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_focus_cycles_parts() {
        let mut session = session(&Config::default(), VariantCatalog::default());
        assert_eq!(session.focus_next_part(), None);

        session.show_model(&two_part_model());
        assert_eq!(session.focus_next_part().as_deref(), Some("Hull"));
        assert_eq!(session.camera.target, Vec3::ZERO);
        assert_eq!(session.focus_next_part().as_deref(), Some("Mast"));
        assert_eq!(session.camera.target, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(session.focus_next_part().as_deref(), Some("Hull"));
    }

    #[test]
    fn test_variant_waits_for_geometry() {
        let catalog = VariantCatalog::from_ron_str(
            r#"(variants: [(name: "Tall", source: "tall.glb", target_node: "Mast")])"#,
        )
        .unwrap();
        let mut session = session(&Config::default(), catalog);
        session.show_model(&two_part_model());

        session.next_variant();
        assert!(session.pending_variant.is_some());

        // The fetch fails, so the pending choice is dropped and the mast stays.
        let start = Instant::now();
        while session.pending_variant.is_some() {
            session.poll_loads();
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(session.scene.focus("Mast").is_some());
    }

    #[test]
    fn test_texture_scan_runs_once_per_revision() {
        let catalog = VariantCatalog::from_ron_str(
            r#"(options: [(name: "Teak", slot: "deck", texture: Some("teak.jpg"), clamp: true)])"#,
        )
        .unwrap();
        let mut session = session(&Config::default(), catalog);
        let mut model = two_part_model();
        model.materials[0].name = "deck".into();
        session.show_model(&model);
        assert!(session.textures_stale());
        assert!(!session.textures_stale());

        session.next_material_option();
        assert!(session.textures_stale());
        let slot = session.scene.slot_index("deck").unwrap();
        let texture = session.scene.materials()[slot]
            .base_color_texture
            .clone()
            .unwrap();
        assert_eq!(texture.wrap, WrapMode::Clamp);

        // Still loading, so nothing is ready to upload yet.
        assert!(session.request_textures(vec![texture.clone()]).is_empty());
        assert_eq!(session.texture_wraps.get(&texture.key), Some(&WrapMode::Clamp));
        assert!(session.loader.texture(&texture.key).is_some());
    }

    #[test]
    fn test_empty_catalog_is_harmless() {
        let mut session = session(&Config::default(), VariantCatalog::default());
        session.next_variant();
        session.next_material_option();
        assert!(session.pending_variant.is_none());
    }

    #[test]
    fn test_missing_catalog_file_gives_empty_catalog() {
        let catalog = load_catalog(Some("/nonexistent/keel/catalog.ron"));
        assert!(catalog.variants().is_empty());
        assert!(load_catalog(None).options().is_empty());
    }
}
