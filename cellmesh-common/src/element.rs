//! The closed set of element kinds attribute values may take, and a
//! tagged-variant container for holding them without virtual dispatch.

/// Element kinds a cell attribute or edge attribute may be stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Enum8,
}

impl ElementKind {
    /// On-disk element width in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 | ElementKind::Enum8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
        }
    }
}

/// A single typed scalar. The value-array equivalent is `Vec<ElementValue>`
/// for heterogeneous callers, or one of the dedicated typed vectors inside
/// `AttrColumn` (see `cellmesh-model::attr`) for the hot path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Enum8(u8),
}

impl ElementValue {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementValue::U8(_) => ElementKind::U8,
            ElementValue::I8(_) => ElementKind::I8,
            ElementValue::U16(_) => ElementKind::U16,
            ElementValue::I16(_) => ElementKind::I16,
            ElementValue::U32(_) => ElementKind::U32,
            ElementValue::I32(_) => ElementKind::I32,
            ElementValue::F32(_) => ElementKind::F32,
            ElementValue::Enum8(_) => ElementKind::Enum8,
        }
    }

    /// Pack this value as little-endian bytes, as written to the value
    /// dataset on disk.
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            ElementValue::U8(v) => vec![v],
            ElementValue::I8(v) => vec![v as u8],
            ElementValue::U16(v) => v.to_le_bytes().to_vec(),
            ElementValue::I16(v) => v.to_le_bytes().to_vec(),
            ElementValue::U32(v) => v.to_le_bytes().to_vec(),
            ElementValue::I32(v) => v.to_le_bytes().to_vec(),
            ElementValue::F32(v) => v.to_le_bytes().to_vec(),
            ElementValue::Enum8(v) => vec![v],
        }
    }

    pub fn from_le_bytes(kind: ElementKind, bytes: &[u8]) -> Self {
        match kind {
            ElementKind::U8 => ElementValue::U8(bytes[0]),
            ElementKind::I8 => ElementValue::I8(bytes[0] as i8),
            ElementKind::U16 => ElementValue::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            ElementKind::I16 => ElementValue::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            ElementKind::U32 => {
                ElementValue::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ElementKind::I32 => {
                ElementValue::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ElementKind::F32 => {
                ElementValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ElementKind::Enum8 => ElementValue::Enum8(bytes[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_width_matches_kind() {
        assert_eq!(ElementKind::U8.byte_width(), 1);
        assert_eq!(ElementKind::U16.byte_width(), 2);
        assert_eq!(ElementKind::F32.byte_width(), 4);
    }

    #[test]
    fn round_trip_le_bytes() {
        for v in [
            ElementValue::U8(7),
            ElementValue::I8(-3),
            ElementValue::U16(5000),
            ElementValue::I16(-1234),
            ElementValue::U32(123_456),
            ElementValue::I32(-1),
            ElementValue::F32(3.25),
            ElementValue::Enum8(2),
        ] {
            let bytes = v.to_le_bytes();
            let back = ElementValue::from_le_bytes(v.kind(), &bytes);
            assert_eq!(back, v);
        }
    }
}
