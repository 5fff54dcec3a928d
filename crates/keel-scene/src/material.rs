//! Material slots and texture references.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::accessor::AccessorReader;
use crate::document::{Document, TextureInfoDef};
use crate::error::DecodeError;

/// Cache key for a texture: its source path, or a content hash for images
/// embedded in the binary chunk. Equal keys always mean the same image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureKey(Arc<str>);

impl TextureKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Key for embedded image bytes, derived from their content.
    pub fn embedded(bytes: &[u8]) -> Self {
        let mut hasher = FxHasher::default();
        bytes.hash(&mut hasher);
        Self::new(format!("embedded:{:016x}:{}", hasher.finish(), bytes.len()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_embedded(&self) -> bool {
        self.0.starts_with("embedded:")
    }
}

impl fmt::Display for TextureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sampler addressing mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
    Mirror,
}

impl WrapMode {
    /// Map a sampler wrap code; absent or unknown codes repeat.
    pub fn from_code(code: Option<u32>) -> Self {
        match code {
            Some(33071) => Self::Clamp,
            Some(33648) => Self::Mirror,
            _ => Self::Repeat,
        }
    }
}

/// Where a texture's encoded image comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageSource {
    /// Fetched by the asset layer, relative to the model's base path.
    Uri(String),
    /// Encoded image bytes carried in the binary chunk.
    Embedded {
        bytes: Arc<[u8]>,
        mime: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureRef {
    pub key: TextureKey,
    pub source: ImageSource,
    pub wrap: WrapMode,
}

impl TextureRef {
    /// Reference to a texture fetched by path, as chosen from a material option.
    pub fn from_path(path: impl Into<String>, wrap: WrapMode) -> Self {
        let path = path.into();
        Self {
            key: TextureKey::new(path.as_str()),
            source: ImageSource::Uri(path),
            wrap,
        }
    }
}

/// PBR metallic-roughness material parameters for one slot.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialSlot {
    pub name: String,
    /// Linear RGBA factor, multiplied with the base colour texture when present.
    pub base_color: [f32; 4],
    pub base_color_texture: Option<TextureRef>,
    pub metallic: f32,
    pub roughness: f32,
    /// Roughness in G, metallic in B.
    pub metallic_roughness_texture: Option<TextureRef>,
    pub normal_texture: Option<TextureRef>,
    pub double_sided: bool,
}

impl Default for MaterialSlot {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            base_color_texture: None,
            metallic: 0.0,
            roughness: 0.5,
            metallic_roughness_texture: None,
            normal_texture: None,
            double_sided: false,
        }
    }
}

impl MaterialSlot {
    /// Every texture this slot references.
    pub fn textures(&self) -> impl Iterator<Item = &TextureRef> {
        [
            &self.base_color_texture,
            &self.metallic_roughness_texture,
            &self.normal_texture,
        ]
        .into_iter()
        .flatten()
    }
}

/// Build a slot for every material in the document.
pub(crate) fn resolve_materials(
    doc: &Document,
    reader: &AccessorReader<'_>,
) -> Result<Vec<MaterialSlot>, DecodeError> {
    doc.materials
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let pbr = def.pbr_metallic_roughness.as_ref();
            let texture = |info: Option<&TextureInfoDef>| match info {
                Some(info) => resolve_texture(doc, reader, info.index),
                None => Ok(None),
            };
            Ok(MaterialSlot {
                name: def.name.clone().unwrap_or_else(|| format!("material_{i}")),
                base_color: pbr.map_or([1.0; 4], |p| p.base_color_factor),
                base_color_texture: texture(pbr.and_then(|p| p.base_color_texture.as_ref()))?,
                metallic: pbr.map_or(1.0, |p| p.metallic_factor),
                roughness: pbr.map_or(1.0, |p| p.roughness_factor),
                metallic_roughness_texture: texture(
                    pbr.and_then(|p| p.metallic_roughness_texture.as_ref()),
                )?,
                normal_texture: texture(def.normal_texture.as_ref())?,
                double_sided: def.double_sided,
            })
        })
        .collect()
}

fn resolve_texture(
    doc: &Document,
    reader: &AccessorReader<'_>,
    index: usize,
) -> Result<Option<TextureRef>, DecodeError> {
    let tex = doc.textures.get(index).ok_or(DecodeError::BadIndex {
        table: "textures",
        index,
        len: doc.textures.len(),
    })?;
    let Some(source) = tex.source else {
        log::warn!("texture {index} has no image source, ignoring");
        return Ok(None);
    };
    let image = doc.images.get(source).ok_or(DecodeError::BadIndex {
        table: "images",
        index: source,
        len: doc.images.len(),
    })?;
    let wrap = tex
        .sampler
        .and_then(|s| doc.samplers.get(s))
        .map_or(WrapMode::Repeat, |s| WrapMode::from_code(s.wrap_s));

    let (key, source) = match (&image.uri, image.buffer_view) {
        (_, Some(view)) => {
            let bytes = reader.view_bytes(view)?;
            (
                TextureKey::embedded(bytes),
                ImageSource::Embedded {
                    bytes: Arc::from(bytes),
                    mime: image.mime_type.clone(),
                },
            )
        }
        (Some(uri), None) => (TextureKey::new(uri.as_str()), ImageSource::Uri(uri.clone())),
        (None, None) => {
            log::warn!("image {source} has neither uri nor bufferView, ignoring");
            return Ok(None);
        }
    };
    Ok(Some(TextureRef { key, source, wrap }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, tests::build_container};

    fn slots(json: &str, bin: Option<&[u8]>) -> Result<Vec<MaterialSlot>, DecodeError> {
        let bytes = build_container(json, bin);
        let c = Container::parse(&bytes)?;
        let doc = Document::parse(c.json)?;
        let reader = AccessorReader::new(&doc, c.bin);
        resolve_materials(&doc, &reader)
    }

    #[test]
    fn test_wrap_codes() {
        assert_eq!(WrapMode::from_code(Some(33071)), WrapMode::Clamp);
        assert_eq!(WrapMode::from_code(Some(33648)), WrapMode::Mirror);
        assert_eq!(WrapMode::from_code(Some(10497)), WrapMode::Repeat);
        assert_eq!(WrapMode::from_code(None), WrapMode::Repeat);
    }

    #[test]
    fn test_uri_texture_keyed_by_path() {
        let json = r#"{
            "materials":[{"name":"hull","pbrMetallicRoughness":{
                "baseColorFactor":[1,0,0,1],"metallicFactor":0.2,"roughnessFactor":0.7,
                "baseColorTexture":{"index":0}}}],
            "textures":[{"source":0,"sampler":0}],
            "images":[{"uri":"textures/hull.png"}],
            "samplers":[{"wrapS":33071}]
        }"#;
        let slots = slots(json, None).unwrap();
        let slot = &slots[0];
        assert_eq!(slot.name, "hull");
        assert_eq!(slot.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(slot.metallic, 0.2);
        let tex = slot.base_color_texture.as_ref().unwrap();
        assert_eq!(tex.key.as_str(), "textures/hull.png");
        assert_eq!(tex.wrap, WrapMode::Clamp);
        assert_eq!(slot.textures().count(), 1);
    }

    #[test]
    fn test_embedded_texture_keyed_by_content() {
        let json = r#"{
            "buffers":[{"byteLength":8}],
            "bufferViews":[{"buffer":0,"byteLength":4},{"buffer":0,"byteOffset":4,"byteLength":4}],
            "materials":[{"pbrMetallicRoughness":{"baseColorTexture":{"index":0}},
                          "normalTexture":{"index":1}}],
            "textures":[{"source":0},{"source":1}],
            "images":[{"bufferView":0,"mimeType":"image/png"},{"bufferView":1,"mimeType":"image/png"}]
        }"#;
        let slots = slots(json, Some(&[1, 2, 3, 4, 1, 2, 3, 4])).unwrap();
        let base = slots[0].base_color_texture.as_ref().unwrap();
        let normal = slots[0].normal_texture.as_ref().unwrap();
        assert!(base.key.is_embedded());
        // Identical bytes share one cache key.
        assert_eq!(base.key, normal.key);
        assert!(matches!(&base.source, ImageSource::Embedded { bytes, .. } if bytes.len() == 4));
    }

    #[test]
    fn test_bad_texture_index_fails() {
        let json = r#"{"materials":[{"normalTexture":{"index":3}}]}"#;
        assert!(matches!(
            slots(json, None),
            Err(DecodeError::BadIndex { table: "textures", .. })
        ));
    }

    #[test]
    fn test_material_without_pbr_uses_format_defaults() {
        let slots = slots(r#"{"materials":[{}]}"#, None).unwrap();
        assert_eq!(slots[0].name, "material_0");
        assert_eq!(slots[0].base_color, [1.0; 4]);
        assert_eq!(slots[0].roughness, 1.0);
    }
}
