//! Chunked binary container framing: 12-byte header, a JSON chunk, and an
//! optional binary chunk. All multi-byte fields are little-endian.

use crate::error::DecodeError;

/// `glTF` in little-endian byte order.
pub const GLB_MAGIC: u32 = 0x4654_6C67;
/// The only supported container version.
pub const GLB_VERSION: u32 = 2;
/// Chunk type of the structured description.
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
/// Chunk type of the raw binary payload.
pub const CHUNK_BIN: u32 = 0x004E_4942;

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// Borrowed view of a validated container's two chunks.
#[derive(Debug, Clone, Copy)]
pub struct Container<'a> {
    pub version: u32,
    pub json: &'a [u8],
    pub bin: Option<&'a [u8]>,
}

impl<'a> Container<'a> {
    /// Validate framing and split the buffer into its chunks.
    ///
    /// Unknown chunk types after the binary chunk are skipped, as the format allows.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }

        let magic = read_u32(bytes, 0);
        if magic != GLB_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = read_u32(bytes, 4);
        if version != GLB_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let declared = read_u32(bytes, 8) as usize;
        if declared > bytes.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        // Anything past the declared length is ignored.
        let bytes = &bytes[..declared];

        let mut json = None;
        let mut bin = None;
        let mut offset = HEADER_LEN;
        while offset < bytes.len() {
            let (kind, body, next) = read_chunk(bytes, offset)?;
            match kind {
                CHUNK_JSON if json.is_none() && offset == HEADER_LEN => json = Some(body),
                CHUNK_BIN if bin.is_none() && json.is_some() => bin = Some(body),
                other => log::debug!("skipping container chunk {other:#010x} at {offset}"),
            }
            offset = next;
        }

        Ok(Self {
            version,
            json: json.ok_or(DecodeError::MissingJson)?,
            bin,
        })
    }
}

fn read_chunk(bytes: &[u8], offset: usize) -> Result<(u32, &[u8], usize), DecodeError> {
    let header_end = offset + CHUNK_HEADER_LEN;
    if header_end > bytes.len() {
        return Err(DecodeError::ChunkOutOfRange {
            offset,
            length: CHUNK_HEADER_LEN,
            total: bytes.len(),
        });
    }
    let length = read_u32(bytes, offset) as usize;
    let kind = read_u32(bytes, offset + 4);
    let end = header_end
        .checked_add(length)
        .filter(|&end| end <= bytes.len())
        .ok_or(DecodeError::ChunkOutOfRange {
            offset,
            length,
            total: bytes.len(),
        })?;
    // Chunks are 4-byte aligned; tolerate a missing trailing pad on the last one.
    let next = (end + 3) & !3;
    Ok((kind, &bytes[header_end..end], next.min(bytes.len()).max(end)))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a container from a JSON string and optional binary payload.
    pub(crate) fn build_container(json: &str, bin: Option<&[u8]>) -> Vec<u8> {
        let mut json_bytes = json.as_bytes().to_vec();
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }
        let mut out = Vec::new();
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&GLB_VERSION.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&json_bytes);
        if let Some(bin) = bin {
            let mut bin = bin.to_vec();
            while bin.len() % 4 != 0 {
                bin.push(0);
            }
            out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
            out.extend_from_slice(&bin);
        }
        let total = out.len() as u32;
        out[8..12].copy_from_slice(&total.to_le_bytes());
        out
    }

    #[test]
    fn test_parse_json_and_bin() {
        let bytes = build_container("{}", Some(&[1, 2, 3, 4]));
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(c.version, 2);
        assert_eq!(c.json.trim_ascii(), b"{}");
        assert_eq!(c.bin.unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_json_only() {
        let bytes = build_container("{}", None);
        let c = Container::parse(&bytes).unwrap();
        assert!(c.bin.is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = build_container("{}", None);
        bytes[0] = b'X';
        assert!(matches!(
            Container::parse(&bytes),
            Err(DecodeError::BadMagic(_))
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = build_container("{}", None);
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&bytes),
            Err(DecodeError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_short_header_is_truncated() {
        assert!(matches!(
            Container::parse(&[0x67, 0x6C]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let mut bytes = build_container("{}", Some(&[0; 8]));
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            Container::parse(&bytes),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_chunk_length_beyond_container() {
        let mut bytes = build_container("{}", Some(&[0; 8]));
        // Inflate the BIN chunk length without growing the buffer.
        let bin_header = 12 + 8 + 4;
        bytes[bin_header..bin_header + 4].copy_from_slice(&64u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&bytes),
            Err(DecodeError::ChunkOutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_json_chunk() {
        let mut out = Vec::new();
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&GLB_VERSION.to_le_bytes());
        out.extend_from_slice(&20u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        assert!(matches!(
            Container::parse(&out),
            Err(DecodeError::MissingJson)
        ));
    }
}
