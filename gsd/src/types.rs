use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Maximum length of a chunk name or application/schema string, including the NUL terminator.
pub const GSD_NAME_SIZE: usize = 64;

/// Sentinel id returned by [`crate::namelist::NameTable::find`] when a name is not found.
pub const GSD_NAME_NOT_FOUND: u16 = 0xFFFF;

/// Element type of a data chunk.
///
/// Values match the wire format used by the reference implementation so files remain portable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum GsdType {
    UInt8 = 1,
    UInt16 = 2,
    UInt32 = 3,
    UInt64 = 4,
    Int8 = 5,
    Int16 = 6,
    Int32 = 7,
    Int64 = 8,
    Float32 = 9,
    Float64 = 10,
}

/// Returns the size in bytes of one element of `type_id`, or 0 if `type_id` is unknown.
pub fn sizeof_type(type_id: u8) -> usize {
    match GsdType::try_from(type_id) {
        Ok(GsdType::UInt8) | Ok(GsdType::Int8) => 1,
        Ok(GsdType::UInt16) | Ok(GsdType::Int16) => 2,
        Ok(GsdType::UInt32) | Ok(GsdType::Int32) | Ok(GsdType::Float32) => 4,
        Ok(GsdType::UInt64) | Ok(GsdType::Int64) | Ok(GsdType::Float64) => 8,
        Err(_) => 0,
    }
}

/// How a gsd file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the whole index is mapped/loaded but never mutated.
    ReadOnly,
    /// Read-write; the whole index is loaded into memory. Needed to support `find_chunk`
    /// alongside writes.
    ReadWrite,
    /// Append-only; optimized for writers that never need to look a chunk back up. Disallows
    /// `find_chunk`.
    Append,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::ReadWrite | OpenMode::Append)
    }

    pub fn is_readable(self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }
}

/// Packs a `(major, minor)` pair into the 32-bit version field stored in the header.
pub fn make_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | (minor as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizeof_type_matches_wire_spec() {
        assert_eq!(sizeof_type(GsdType::UInt8.into()), 1);
        assert_eq!(sizeof_type(GsdType::Float64.into()), 8);
        assert_eq!(sizeof_type(0), 0);
        assert_eq!(sizeof_type(11), 0);
    }

    #[test]
    fn make_version_packs_major_minor() {
        assert_eq!(make_version(1, 0), 0x0001_0000);
        assert_eq!(make_version(1, 4), 0x0001_0004);
    }
}
