//! Typed accessor decoding over the binary chunk.
//!
//! Attribute streams always decode to `f32`. Index streams keep the narrowest
//! integer width their component type names.

use crate::container::Container;
use crate::document::{AccessorDef, Document};
use crate::error::DecodeError;

/// Largest zero-filled accessor, in bytes, accepted without a buffer view.
pub const MAX_UNBACKED_BYTES: usize = 64 << 20;

/// Component type of one accessor element, keyed by its numeric code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            5120 => Some(Self::I8),
            5121 => Some(Self::U8),
            5122 => Some(Self::I16),
            5123 => Some(Self::U16),
            5125 => Some(Self::U32),
            5126 => Some(Self::F32),
            _ => None,
        }
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }

    /// Read one little-endian component at the start of `b`.
    ///
    /// With `normalized`, unsigned values map to [0, 1] and signed values to
    /// [-1, 1]. Floats pass through either way.
    fn read(self, b: &[u8], normalized: bool) -> f32 {
        match self {
            Self::I8 => {
                let v = b[0] as i8 as f32;
                if normalized { (v / 127.0).max(-1.0) } else { v }
            }
            Self::U8 => {
                let v = b[0] as f32;
                if normalized { v / 255.0 } else { v }
            }
            Self::I16 => {
                let v = i16::from_le_bytes([b[0], b[1]]) as f32;
                if normalized { (v / 32767.0).max(-1.0) } else { v }
            }
            Self::U16 => {
                let v = u16::from_le_bytes([b[0], b[1]]) as f32;
                if normalized { v / 65535.0 } else { v }
            }
            Self::U32 => {
                let raw = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if normalized {
                    (raw as f64 / u32::MAX as f64) as f32
                } else {
                    raw as f32
                }
            }
            Self::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }
}

/// Element shape of an accessor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCALAR" => Some(Self::Scalar),
            "VEC2" => Some(Self::Vec2),
            "VEC3" => Some(Self::Vec3),
            "VEC4" => Some(Self::Vec4),
            "MAT2" => Some(Self::Mat2),
            "MAT3" => Some(Self::Mat3),
            "MAT4" => Some(Self::Mat4),
            _ => None,
        }
    }

    /// Number of components per element.
    pub fn arity(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }
}

/// Decoded index stream in its source width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexArray {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexArray {
    /// `0..count` in the narrowest width that holds `count - 1`.
    pub fn sequential(count: usize) -> Self {
        if count <= u16::MAX as usize + 1 {
            Self::U16((0..count).map(|i| i as u16).collect())
        } else {
            Self::U32((0..count).map(|i| i as u32).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate indices widened to `u32`.
    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            Self::U8(v) => Box::new(v.iter().map(|&i| i as u32)),
            Self::U16(v) => Box::new(v.iter().map(|&i| i as u32)),
            Self::U32(v) => Box::new(v.iter().copied()),
        }
    }

    pub fn max(&self) -> Option<u32> {
        self.iter().max()
    }

    /// GPU index buffers have no 8-bit format; widen those to 16 bits.
    pub fn widened(&self) -> IndexArray {
        match self {
            Self::U8(v) => Self::U16(v.iter().map(|&i| i as u16).collect()),
            other => other.clone(),
        }
    }
}

/// One accessor decoded to floats.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAccessor {
    pub component: ComponentType,
    pub element: ElementType,
    pub normalized: bool,
    pub count: usize,
    /// `count * element.arity()` values, element-major.
    pub values: Vec<f32>,
}

/// Decode every accessor of a container to float arrays, in table order.
pub fn decode_accessors(bytes: &[u8]) -> Result<Vec<DecodedAccessor>, DecodeError> {
    let container = Container::parse(bytes)?;
    let doc = Document::parse(container.json)?;
    let reader = AccessorReader::new(&doc, container.bin);
    (0..doc.accessors.len())
        .map(|i| reader.read_floats(i))
        .collect()
}

/// Bounds-checked access to accessor data for one parsed document.
pub(crate) struct AccessorReader<'a> {
    doc: &'a Document,
    bin: Option<&'a [u8]>,
}

/// Resolved layout of one accessor inside its buffer view.
struct Layout<'a> {
    component: ComponentType,
    element: ElementType,
    stride: usize,
    /// `count * arity` floats this accessor decodes to.
    values: usize,
    /// The view bytes from the accessor's own offset onwards, or `None` when
    /// the accessor has no buffer view.
    data: Option<&'a [u8]>,
}

impl<'a> AccessorReader<'a> {
    pub(crate) fn new(doc: &'a Document, bin: Option<&'a [u8]>) -> Self {
        Self { doc, bin }
    }

    fn accessor(&self, index: usize) -> Result<&'a AccessorDef, DecodeError> {
        self.doc.accessors.get(index).ok_or(DecodeError::BadIndex {
            table: "accessors",
            index,
            len: self.doc.accessors.len(),
        })
    }

    /// Byte range of a buffer view within the binary chunk.
    pub(crate) fn view_bytes(&self, view: usize) -> Result<&'a [u8], DecodeError> {
        let def = self.doc.buffer_views.get(view).ok_or(DecodeError::BadIndex {
            table: "bufferViews",
            index: view,
            len: self.doc.buffer_views.len(),
        })?;
        let buffer = self.doc.buffers.get(def.buffer).ok_or(DecodeError::BadIndex {
            table: "buffers",
            index: def.buffer,
            len: self.doc.buffers.len(),
        })?;
        if buffer.uri.is_some() || def.buffer != 0 {
            return Err(DecodeError::ExternalBuffer(def.buffer));
        }
        let bin = self.bin.ok_or(DecodeError::MissingBinary)?;
        let end = def.byte_offset.checked_add(def.byte_length);
        match end {
            Some(end) if end <= bin.len() => Ok(&bin[def.byte_offset..end]),
            _ => Err(DecodeError::BufferViewOutOfRange {
                view,
                offset: def.byte_offset,
                end: end.unwrap_or(usize::MAX),
                len: bin.len(),
            }),
        }
    }

    fn layout(&self, index: usize) -> Result<Layout<'a>, DecodeError> {
        let def = self.accessor(index)?;
        let component = ComponentType::from_code(def.component_type).ok_or(
            DecodeError::UnknownComponentType {
                accessor: index,
                code: def.component_type,
            },
        )?;
        let element = ElementType::from_name(&def.element_type).ok_or_else(|| {
            DecodeError::UnknownElementType {
                accessor: index,
                name: def.element_type.clone(),
            }
        })?;
        let element_size = element.arity() * component.size();
        let values = def
            .count
            .checked_mul(element.arity())
            .ok_or(DecodeError::AccessorOutOfRange {
                accessor: index,
                needed: usize::MAX,
                available: 0,
            })?;

        let Some(view) = def.buffer_view else {
            unbacked_size(index, def.count, element_size)?;
            return Ok(Layout {
                component,
                element,
                stride: element_size,
                values,
                data: None,
            });
        };

        let bytes = self.view_bytes(view)?;
        let stride = match self.doc.buffer_views[view].byte_stride {
            Some(stride) if stride < element_size => {
                return Err(DecodeError::InvalidStride {
                    accessor: index,
                    stride,
                    element_size,
                });
            }
            Some(stride) => stride,
            None => element_size,
        };
        let needed = span(def.byte_offset, stride, element_size, def.count);
        match needed {
            Some(needed) if needed <= bytes.len() => Ok(Layout {
                component,
                element,
                stride,
                values,
                data: Some(&bytes[def.byte_offset..]),
            }),
            _ => Err(DecodeError::AccessorOutOfRange {
                accessor: index,
                needed: needed.unwrap_or(usize::MAX),
                available: bytes.len(),
            }),
        }
    }

    /// Decode an accessor to floats, honouring stride and normalisation.
    pub(crate) fn read_floats(&self, index: usize) -> Result<DecodedAccessor, DecodeError> {
        let def = self.accessor(index)?;
        let layout = self.layout(index)?;
        let arity = layout.element.arity();
        let csize = layout.component.size();

        let values = match layout.data {
            None => vec![0.0; layout.values],
            Some(data) => {
                let mut values = Vec::with_capacity(layout.values);
                for i in 0..def.count {
                    let base = i * layout.stride;
                    for c in 0..arity {
                        let at = base + c * csize;
                        values.push(layout.component.read(&data[at..], def.normalized));
                    }
                }
                values
            }
        };

        Ok(DecodedAccessor {
            component: layout.component,
            element: layout.element,
            normalized: def.normalized,
            count: def.count,
            values,
        })
    }

    /// Decode an index accessor. Stride is ignored; indices are tightly packed.
    pub(crate) fn read_indices(&self, index: usize) -> Result<IndexArray, DecodeError> {
        let def = self.accessor(index)?;
        let component = ComponentType::from_code(def.component_type);
        let width = match component {
            Some(c @ (ComponentType::U8 | ComponentType::U16 | ComponentType::U32)) => c,
            _ => {
                log::warn!(
                    "accessor {index}: index component type {} unsupported, reading as u16",
                    def.component_type
                );
                ComponentType::U16
            }
        };

        let Some(view) = def.buffer_view else {
            unbacked_size(index, def.count, width.size())?;
            return Ok(match width {
                ComponentType::U8 => IndexArray::U8(vec![0; def.count]),
                ComponentType::U32 => IndexArray::U32(vec![0; def.count]),
                _ => IndexArray::U16(vec![0; def.count]),
            });
        };
        let bytes = self.view_bytes(view)?;
        let needed = def
            .count
            .checked_mul(width.size())
            .and_then(|n| n.checked_add(def.byte_offset));
        let data = match needed {
            Some(end) if end <= bytes.len() => &bytes[def.byte_offset..end],
            _ => {
                return Err(DecodeError::AccessorOutOfRange {
                    accessor: index,
                    needed: needed.unwrap_or(usize::MAX),
                    available: bytes.len(),
                });
            }
        };

        Ok(match width {
            ComponentType::U8 => IndexArray::U8(data.to_vec()),
            ComponentType::U32 => IndexArray::U32(
                data.chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            _ => IndexArray::U16(
                data.chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            ),
        })
    }
}

/// Check the size of an accessor with no buffer view, which decodes to zeros.
fn unbacked_size(accessor: usize, count: usize, element_size: usize) -> Result<(), DecodeError> {
    match count.checked_mul(element_size) {
        Some(size) if size <= MAX_UNBACKED_BYTES => Ok(()),
        size => Err(DecodeError::AccessorOutOfRange {
            accessor,
            needed: size.unwrap_or(usize::MAX),
            available: MAX_UNBACKED_BYTES,
        }),
    }
}

/// Bytes an accessor occupies from the view start: offset plus `count - 1`
/// strides plus one element. `None` on overflow.
fn span(offset: usize, stride: usize, element_size: usize, count: usize) -> Option<usize> {
    if count == 0 {
        return Some(offset);
    }
    stride
        .checked_mul(count - 1)?
        .checked_add(element_size)?
        .checked_add(offset)
}
