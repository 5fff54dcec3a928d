//! Decode and scene error types.

/// Errors produced while decoding a binary scene container.
///
/// Any malformed byte range fails the whole decode; nothing is truncated silently.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Buffer shorter than the fixed 12-byte header.
    #[error("container truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// The header magic is not `glTF`.
    #[error("bad container magic {0:#010x}")]
    BadMagic(u32),

    /// Container version other than 2.
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u32),

    /// Header length disagrees with the byte buffer.
    #[error("header declares {declared} bytes but buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A chunk header or body runs past the end of the container.
    #[error("chunk at offset {offset} with length {length} exceeds container of {total} bytes")]
    ChunkOutOfRange {
        offset: usize,
        length: usize,
        total: usize,
    },

    /// The first chunk must be the JSON description.
    #[error("missing JSON chunk")]
    MissingJson,

    /// The description references binary data but no BIN chunk is present.
    #[error("missing binary chunk")]
    MissingBinary,

    /// JSON description failed to parse.
    #[error("invalid scene description: {0}")]
    Json(#[from] serde_json::Error),

    /// Only the embedded binary chunk is supported as a buffer source.
    #[error("buffer {0} references external data, which is not supported")]
    ExternalBuffer(usize),

    /// An index into one of the description tables is out of range.
    #[error("{table} index {index} out of range ({len} entries)")]
    BadIndex {
        table: &'static str,
        index: usize,
        len: usize,
    },

    /// A buffer view's byte range lies outside the binary chunk.
    #[error("buffer view {view} range {offset}..{end} outside binary chunk of {len} bytes")]
    BufferViewOutOfRange {
        view: usize,
        offset: usize,
        end: usize,
        len: usize,
    },

    /// An accessor reads past the end of its buffer view, or declares more
    /// zero-filled elements than the decoder accepts.
    #[error("accessor {accessor} needs {needed} bytes but only {available} are available")]
    AccessorOutOfRange {
        accessor: usize,
        needed: usize,
        available: usize,
    },

    /// Explicit stride smaller than one element.
    #[error("accessor {accessor} stride {stride} is smaller than element size {element_size}")]
    InvalidStride {
        accessor: usize,
        stride: usize,
        element_size: usize,
    },

    /// Component type code not defined by the format.
    #[error("accessor {accessor} has unknown component type {code}")]
    UnknownComponentType { accessor: usize, code: u32 },

    /// Element type string not defined by the format.
    #[error("accessor {accessor} has unknown element type '{name}'")]
    UnknownElementType { accessor: usize, name: String },

    /// A primitive is missing its POSITION attribute.
    #[error("mesh {mesh} primitive {primitive} has no POSITION attribute")]
    MissingPosition { mesh: usize, primitive: usize },

    /// Attribute stream has the wrong arity for its semantic.
    #[error("mesh {mesh} attribute {semantic} has arity {arity}, expected {expected}")]
    AttributeArity {
        mesh: usize,
        semantic: &'static str,
        arity: usize,
        expected: usize,
    },

    /// Index references a vertex that does not exist.
    #[error("mesh {mesh} index {index} exceeds vertex count {vertex_count}")]
    IndexOutOfBounds {
        mesh: usize,
        index: u32,
        vertex_count: usize,
    },
}

/// Errors from runtime scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// No node carries the requested name.
    #[error("no node named '{0}'")]
    UnknownNode(String),

    /// Material slot index out of range.
    #[error("material slot {index} out of range ({len} slots)")]
    UnknownMaterial { index: usize, len: usize },

    /// A variant model contains no drawable geometry.
    #[error("variant for '{0}' contains no geometry")]
    EmptyVariant(String),
}
