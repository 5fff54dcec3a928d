//! Variant catalog: which alternative models can replace which node, and the
//! colour/texture options offered per material slot.
//!
//! Catalogs are RON manifests, for example:
//!
//! ```ron
//! (
//!     variants: [
//!         (name: "Sport hull", source: "models/hull_sport.glb", target_node: "Hull"),
//!     ],
//!     options: [
//!         (name: "Signal red", slot: "gelcoat", color: Some((0.8, 0.08, 0.05))),
//!         (name: "Teak", slot: "deck", texture: Some("textures/teak.jpg")),
//!     ],
//! )
//! ```

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::error::SceneError;
use crate::material::{TextureRef, WrapMode};
use crate::scene::Scene;

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ron parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("duplicate variant name: {0}")]
    DuplicateName(String),

    #[error("unknown material slot '{0}'")]
    UnknownSlot(String),

    #[error("option '{0}' sets neither a colour nor a texture")]
    EmptyOption(String),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Alternative geometry for one node.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Model path or URL, resolved by the asset layer.
    pub source: String,
    /// Scene node whose primitives the variant replaces.
    pub target_node: String,
}

/// A colour or texture choice for a named material slot.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MaterialOption {
    pub name: String,
    pub slot: String,
    #[serde(default)]
    pub color: Option<(f32, f32, f32)>,
    #[serde(default)]
    pub texture: Option<String>,
    #[serde(default)]
    pub clamp: bool,
}

#[derive(Deserialize)]
struct CatalogManifest {
    #[serde(default)]
    variants: Vec<Variant>,
    #[serde(default)]
    options: Vec<MaterialOption>,
}

/// Validated catalog with name lookups.
#[derive(Clone, Debug, Default)]
pub struct VariantCatalog {
    variants: Vec<Variant>,
    options: Vec<MaterialOption>,
    by_name: FxHashMap<String, usize>,
}

impl VariantCatalog {
    pub fn from_ron(path: &Path) -> Result<Self, VariantError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    pub fn from_ron_str(contents: &str) -> Result<Self, VariantError> {
        let manifest: CatalogManifest = ron::from_str(contents)?;
        let mut by_name = FxHashMap::default();
        for (i, v) in manifest.variants.iter().enumerate() {
            if by_name.insert(v.name.clone(), i).is_some() {
                return Err(VariantError::DuplicateName(v.name.clone()));
            }
        }
        if let Some(o) = manifest
            .options
            .iter()
            .find(|o| o.color.is_none() && o.texture.is_none())
        {
            return Err(VariantError::EmptyOption(o.name.clone()));
        }
        Ok(Self {
            variants: manifest.variants,
            options: manifest.options,
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.by_name.get(name).map(|&i| &self.variants[i])
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn options(&self) -> &[MaterialOption] {
        &self.options
    }

    /// Variants that target `node`, in catalog order.
    pub fn for_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Variant> + 'a {
        self.variants.iter().filter(move |v| v.target_node == node)
    }

    /// Apply a material option to its slot in `scene`.
    pub fn apply_option(&self, scene: &mut Scene, option: &MaterialOption) -> Result<(), VariantError> {
        let slot = scene
            .slot_index(&option.slot)
            .ok_or_else(|| VariantError::UnknownSlot(option.slot.clone()))?;
        if let Some((r, g, b)) = option.color {
            scene.set_slot_color(slot, [r, g, b])?;
        }
        if let Some(path) = &option.texture {
            let wrap = if option.clamp { WrapMode::Clamp } else { WrapMode::Repeat };
            scene.set_slot_texture(slot, Some(TextureRef::from_path(path.as_str(), wrap)))?;
        } else if option.color.is_some() {
            // A plain colour replaces any texture chosen earlier.
            scene.set_slot_texture(slot, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"(
        variants: [
            (name: "Sport", source: "hull_sport.glb", target_node: "Hull"),
            (name: "Cruiser", source: "hull_cruiser.glb", target_node: "Hull"),
            (name: "Bimini", source: "bimini.glb", target_node: "Top"),
        ],
        options: [
            (name: "Red", slot: "gelcoat", color: Some((0.8, 0.1, 0.1))),
            (name: "Teak", slot: "gelcoat", texture: Some("teak.jpg"), clamp: true),
        ],
    )"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = VariantCatalog::from_ron_str(CATALOG).unwrap();
        assert_eq!(catalog.variants().len(), 3);
        assert_eq!(catalog.get("Bimini").unwrap().target_node, "Top");
        assert_eq!(catalog.for_node("Hull").count(), 2);
        assert_eq!(catalog.options().len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let ron = r#"(variants: [
            (name: "A", source: "a.glb", target_node: "Hull"),
            (name: "A", source: "b.glb", target_node: "Hull"),
        ])"#;
        assert!(matches!(
            VariantCatalog::from_ron_str(ron),
            Err(VariantError::DuplicateName(n)) if n == "A"
        ));
    }

    #[test]
    fn test_empty_option_rejected() {
        let ron = r#"(options: [(name: "Nothing", slot: "x")])"#;
        assert!(matches!(
            VariantCatalog::from_ron_str(ron),
            Err(VariantError::EmptyOption(_))
        ));
    }

    #[test]
    fn test_from_ron_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = VariantCatalog::from_ron(&path).unwrap();
        assert!(catalog.get("Sport").is_some());
    }

    #[test]
    fn test_apply_option_unknown_slot() {
        let catalog = VariantCatalog::from_ron_str(CATALOG).unwrap();
        let mut scene = Scene::new();
        let option = catalog.options()[0].clone();
        assert!(matches!(
            catalog.apply_option(&mut scene, &option),
            Err(VariantError::UnknownSlot(_))
        ));
    }
}
