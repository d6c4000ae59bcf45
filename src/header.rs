//! Size-prefixed header record at the start of every shelved region
//!
//! ```text
//! offset  size  field
//! 0       4     size prefix (little endian, always HEADER_SIZE)
//! 4       8     magic
//! 12      4     version
//! 16      4     type tag
//! ```

use std::fmt;

use crate::error::{Result, ShelfError};

/// Magic number for validation ("PMMSHELF")
pub const SHELF_MAGIC: u64 = 0x504D_4D53_4845_4C46;

/// Current format revision
pub const FORMAT_VERSION: u32 = 1;

/// Declared size of the header body, excluding the size prefix
pub const HEADER_SIZE: u32 = 16;

/// Size of the size prefix
pub const SIZE_PREFIX_LEN: usize = 4;

/// Total encoded length: prefix plus body
pub const ENCODED_LEN: usize = SIZE_PREFIX_LEN + HEADER_SIZE as usize;

/// Logical type stored in a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TypeTag {
    /// 64-bit float scalar
    FloatNumber = 1,
    /// 64-bit signed integer scalar
    IntegerNumber = 2,
    /// N-dimensional array
    NdArray = 3,
    /// Tensor view over an array region
    Tensor = 4,
    /// Persistent list of inline numbers and item references
    List = 5,
}

impl TypeTag {
    /// Every known tag, in the order `Shelf::get` probes them
    pub const PROBE_ORDER: [TypeTag; 5] = [
        TypeTag::FloatNumber,
        TypeTag::IntegerNumber,
        TypeTag::Tensor,
        TypeTag::NdArray,
        TypeTag::List,
    ];

    /// Decode a raw tag value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(TypeTag::FloatNumber),
            2 => Some(TypeTag::IntegerNumber),
            3 => Some(TypeTag::NdArray),
            4 => Some(TypeTag::Tensor),
            5 => Some(TypeTag::List),
            _ => None,
        }
    }

    /// Human-readable name of the tag
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::FloatNumber => "float-number",
            TypeTag::IntegerNumber => "integer-number",
            TypeTag::NdArray => "ndarray",
            TypeTag::Tensor => "tensor",
            TypeTag::List => "list",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u64,
    pub version: u32,
    pub type_tag: TypeTag,
}

impl Header {
    /// Header for the current format with the given tag
    pub fn new(type_tag: TypeTag) -> Self {
        Self {
            magic: SHELF_MAGIC,
            version: FORMAT_VERSION,
            type_tag,
        }
    }

    /// Encode a header for `type_tag`
    pub fn encode(type_tag: TypeTag) -> [u8; ENCODED_LEN] {
        Self::new(type_tag).to_bytes()
    }

    /// Serialize this header
    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        out[0..4].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        out[4..12].copy_from_slice(&self.magic.to_le_bytes());
        out[12..16].copy_from_slice(&self.version.to_le_bytes());
        out[16..20].copy_from_slice(&(self.type_tag as u32).to_le_bytes());
        out
    }

    /// Decode the header at the start of `buffer`.
    ///
    /// The size prefix is checked first and the magic before any other
    /// field. Every failure is a [`ShelfError::Format`].
    pub fn decode(buffer: &[u8]) -> Result<Header> {
        if buffer.len() < SIZE_PREFIX_LEN {
            return Err(ShelfError::format("buffer shorter than size prefix"));
        }

        let declared = read_u32(buffer, 0);
        if declared != HEADER_SIZE {
            return Err(ShelfError::format(format!(
                "header size {} does not match expected {}",
                declared, HEADER_SIZE
            )));
        }
        if buffer.len() < ENCODED_LEN {
            return Err(ShelfError::format("buffer truncated inside header"));
        }

        let magic = read_u64(buffer, 4);
        if magic != SHELF_MAGIC {
            return Err(ShelfError::format(format!("bad magic {:#018x}", magic)));
        }

        let version = read_u32(buffer, 12);
        if version != FORMAT_VERSION {
            return Err(ShelfError::format(format!(
                "unsupported format version {}",
                version
            )));
        }

        let raw_tag = read_u32(buffer, 16);
        let type_tag = TypeTag::from_raw(raw_tag)
            .ok_or_else(|| ShelfError::format(format!("unknown type tag {}", raw_tag)))?;

        Ok(Header {
            magic,
            version,
            type_tag,
        })
    }

    /// Probe a buffer: `Some(tag)` when it carries a valid header
    pub fn probe(buffer: &[u8]) -> Option<TypeTag> {
        Self::decode(buffer).ok().map(|h| h.type_tag)
    }

    /// Whether `buffer` is a valid shelved object of type `expected`
    pub fn is_instance_of(buffer: &[u8], expected: TypeTag) -> bool {
        Self::probe(buffer) == Some(expected)
    }
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buffer[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(buffer: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buffer[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Header followed by `payload`, the full image of a region
pub fn frame(type_tag: TypeTag, payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(ENCODED_LEN + payload.len());
    image.extend_from_slice(&Header::encode(type_tag));
    image.extend_from_slice(payload);
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_tag() {
        for tag in TypeTag::PROBE_ORDER {
            let bytes = Header::encode(tag);
            let header = Header::decode(&bytes).unwrap();
            assert_eq!(header.type_tag, tag);
            assert_eq!(header.magic, SHELF_MAGIC);
            assert_eq!(header.version, FORMAT_VERSION);
        }
    }

    #[test]
    fn test_size_prefix_mismatch() {
        let mut bytes = Header::encode(TypeTag::FloatNumber);
        bytes[0] = 28;
        assert!(Header::decode(&bytes).unwrap_err().is_format());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Header::encode(TypeTag::NdArray);
        bytes[5] ^= 0xff;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_unknown_tag_and_version() {
        let mut bytes = Header::encode(TypeTag::List);
        bytes[16] = 99;
        assert!(Header::decode(&bytes).is_err());

        let mut bytes = Header::encode(TypeTag::List);
        bytes[12] = 7;
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn test_short_and_foreign_buffers() {
        assert!(Header::probe(&[]).is_none());
        assert!(Header::probe(&[16, 0, 0, 0, 1]).is_none());
        assert!(Header::probe(b"just some unrelated bytes here").is_none());
    }

    #[test]
    fn test_frame_prefixes_payload() {
        let image = frame(TypeTag::FloatNumber, b"abc");
        assert_eq!(image.len(), ENCODED_LEN + 3);
        assert!(Header::is_instance_of(&image, TypeTag::FloatNumber));
        assert!(!Header::is_instance_of(&image, TypeTag::Tensor));
        assert_eq!(&image[ENCODED_LEN..], b"abc");
    }
}
