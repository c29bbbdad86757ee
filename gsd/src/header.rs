use std::os::unix::io::RawFd;

use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::error::{GsdError, Result};
use crate::types::{make_version, GSD_NAME_SIZE};

/// Magic number marking a file as a gsd container.
pub const GSD_MAGIC_ID: u64 = 0x65DF_65DF_65DF_65DF;

/// Header layout, exactly as stored in the first 256 bytes of the file.
pub const HEADER_SIZE: usize = 256;

pub const INITIAL_INDEX_ENTRIES: u64 = 128;
pub const INITIAL_NAMELIST_ENTRIES: u64 = 65535;
pub const INDEX_GROWTH_FACTOR: u64 = 8;

/// The on-disk gsd file header (256 bytes, little-endian).
///
/// `FromBytes`/`AsBytes`/`Unaligned` give us a safe, zero-copy cast between this struct and its
/// 256-byte on-disk representation without hand-rolling pointer arithmetic the way the teacher
/// crate's `serialize_row`/`deserialize_row` helpers do.
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Header {
    pub magic: zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>,
    pub index_location: zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>,
    pub index_allocated_entries: zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>,
    pub namelist_location: zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>,
    pub namelist_allocated_entries: zerocopy::byteorder::U64<zerocopy::byteorder::LittleEndian>,
    pub schema_version: zerocopy::byteorder::U32<zerocopy::byteorder::LittleEndian>,
    pub gsd_version: zerocopy::byteorder::U32<zerocopy::byteorder::LittleEndian>,
    pub application: [u8; 64],
    pub schema: [u8; 64],
    pub reserved: [u8; 80],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

impl Header {
    pub fn new(application: &str, schema: &str, schema_version: u32) -> Self {
        Header {
            magic: GSD_MAGIC_ID.into(),
            index_location: (HEADER_SIZE as u64).into(),
            index_allocated_entries: INITIAL_INDEX_ENTRIES.into(),
            namelist_location: (HEADER_SIZE as u64 + INITIAL_INDEX_ENTRIES * 32).into(),
            namelist_allocated_entries: INITIAL_NAMELIST_ENTRIES.into(),
            schema_version: schema_version.into(),
            gsd_version: make_version(1, 4).into(),
            application: pack_name(application),
            schema: pack_name(schema),
            reserved: [0u8; 80],
        }
    }

    pub fn application_str(&self) -> String {
        unpack_name(&self.application)
    }

    pub fn schema_str(&self) -> String {
        unpack_name(&self.schema)
    }

    fn validate_version(&self) -> Result<()> {
        let version = self.gsd_version.get();
        // 0.3 is a grandfathered legacy value that remains readable.
        if version == make_version(0, 3) {
            return Ok(());
        }
        if version < make_version(1, 0) || version >= make_version(2, 0) {
            return Err(GsdError::InvalidGsdFileVersion { version });
        }
        Ok(())
    }
}

/// Truncates `s` to 63 bytes and NUL-pads the remainder of a 64-byte slot.
pub fn pack_name(s: &str) -> [u8; GSD_NAME_SIZE] {
    let mut out = [0u8; GSD_NAME_SIZE];
    let bytes = s.as_bytes();
    let n = bytes.len().min(GSD_NAME_SIZE - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

pub fn unpack_name(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Serializes `header` to offset 0 of `fd` and fsyncs.
pub fn write_header(fd: RawFd, header: &Header) -> Result<()> {
    gsd_io::pwrite_all(fd, header.as_bytes(), 0)?;
    gsd_io::fsync(fd)?;
    Ok(())
}

/// Reads and validates the header at offset 0 of `fd`.
pub fn read_header(fd: RawFd) -> Result<Header> {
    let mut buf = [0u8; HEADER_SIZE];
    let n = gsd_io::pread_all(fd, &mut buf, 0)?;
    if n != HEADER_SIZE {
        return Err(GsdError::NotAGsdFile);
    }

    let header = Header::read_from(&buf[..]).ok_or(GsdError::NotAGsdFile)?;
    if header.magic.get() != GSD_MAGIC_ID {
        return Err(GsdError::NotAGsdFile);
    }
    header.validate_version()?;
    Ok(header)
}
