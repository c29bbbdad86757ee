use std::os::unix::io::RawFd;

use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::error::{GsdError, Result};
use crate::types::sizeof_type;

pub const INDEX_ENTRY_SIZE: usize = 32;

/// A single 32-byte index entry locating one chunk by `(frame, id, location, N, M, type)`.
#[derive(Debug, Clone, Copy, FromBytes, AsBytes, Unaligned, PartialEq, Eq)]
#[repr(C)]
pub struct IndexEntry {
    pub frame: U64<LittleEndian>,
    pub n: U64<LittleEndian>,
    pub location: zerocopy::byteorder::I64<LittleEndian>,
    pub m: U32<LittleEndian>,
    pub id: U16<LittleEndian>,
    pub type_id: u8,
    pub flags: u8,
}

const _: () = assert!(std::mem::size_of::<IndexEntry>() == INDEX_ENTRY_SIZE);

impl IndexEntry {
    pub fn new(frame: u64, id: u16, type_id: u8, n: u64, m: u32, location: i64) -> Self {
        IndexEntry {
            frame: frame.into(),
            n: n.into(),
            location: location.into(),
            m: m.into(),
            id: id.into(),
            type_id,
            flags: 0,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.location.get() == 0
    }

    pub fn payload_len(&self) -> u64 {
        self.n.get() * self.m.get() as u64 * sizeof_type(self.type_id) as u64
    }
}

/// Checks the well-formedness of a single entry against §4.5 of the format: known type, payload
/// inside the file, frame within the allocated index range, and a valid name id.
pub fn validate_entry(entry: &IndexEntry, file_size: u64, index_allocated_entries: u64, namelist_num_entries: u64) -> bool {
    let elem_size = sizeof_type(entry.type_id);
    if elem_size == 0 {
        return false;
    }
    let end = match entry
        .location
        .get()
        .checked_add((entry.n.get() * entry.m.get() as u64 * elem_size as u64) as i64)
    {
        Some(end) => end,
        None => return false,
    };
    if end < 0 || end as u64 > file_size {
        return false;
    }
    if entry.frame.get() >= index_allocated_entries {
        return false;
    }
    if entry.id.get() as u64 >= namelist_num_entries {
        return false;
    }
    if entry.flags != 0 {
        return false;
    }
    true
}

/// Backing storage for the committed, on-disk portion of the index.
enum Backing {
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

/// A read-only view of the on-disk index, used by `find_chunk` and by `open` to determine how
/// many frames the file already holds.
///
/// Backed by an mmap when the `mmap` feature is enabled (the default), otherwise by a heap copy
/// read in full — the interface presented to callers (`entries()`) is identical either way, per
/// §9's instruction to make this a build-time, not runtime, choice.
pub struct MappedIndex {
    backing: Backing,
    len: usize,
}

impl MappedIndex {
    /// Maps (or loads) `allocated` entries starting at `location`, binary-searches for the first
    /// unused slot to determine the written length, and validates every probed entry along the
    /// way.
    pub fn open(
        fd: RawFd,
        location: u64,
        allocated: u64,
        file_size: u64,
        namelist_num_entries: u64,
    ) -> Result<Self> {
        let byte_len = allocated as usize * INDEX_ENTRY_SIZE;

        let backing = Self::map(fd, location, byte_len)?;
        let entries = entries_of(&backing);

        let len = Self::bisect_written_len(entries, file_size, allocated, namelist_num_entries)?;

        Ok(MappedIndex { backing, len })
    }

    #[cfg(feature = "mmap")]
    fn map(fd: RawFd, location: u64, byte_len: usize) -> Result<Backing> {
        if byte_len == 0 {
            return Ok(Backing::Owned(Vec::new()));
        }
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(location)
                .len(byte_len)
                .map(&unsafe_file_ref(fd))
        }
        .map_err(GsdError::Io)?;
        Ok(Backing::Mapped(mmap))
    }

    #[cfg(not(feature = "mmap"))]
    fn map(fd: RawFd, location: u64, byte_len: usize) -> Result<Backing> {
        let mut buf = vec![0u8; byte_len];
        gsd_io::pread_all(fd, &mut buf, location)?;
        Ok(Backing::Owned(buf))
    }

    /// Binary search for the first slot with `location == 0`, validating every entry touched
    /// along the way and rejecting any violation of frame-monotonicity.
    fn bisect_written_len(
        entries: &[IndexEntry],
        file_size: u64,
        index_allocated_entries: u64,
        namelist_num_entries: u64,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let check = |idx: usize| -> Result<()> {
            let e = &entries[idx];
            if e.is_unused() {
                return Ok(());
            }
            if !validate_entry(e, file_size, index_allocated_entries, namelist_num_entries) {
                return Err(GsdError::FileCorrupt(format!(
                    "index entry {} fails validation",
                    idx
                )));
            }
            if idx > 0 && !entries[idx - 1].is_unused() && entries[idx - 1].frame.get() > e.frame.get() {
                return Err(GsdError::FileCorrupt(
                    "index is not frame-monotone".to_string(),
                ));
            }
            Ok(())
        };

        let mut lo = 0usize;
        let mut hi = entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            check(mid)?;
            if entries[mid].is_unused() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        // `lo` is now the first unused slot (or entries.len() if none). Validate it too, since
        // the bisection above may not have probed it directly.
        if lo < entries.len() {
            check(lo)?;
        }

        Ok(lo)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &entries_of(&self.backing)[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(feature = "mmap")]
fn unsafe_file_ref(fd: RawFd) -> std::mem::ManuallyDrop<std::fs::File> {
    use std::os::unix::io::FromRawFd;
    std::mem::ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) })
}

fn entries_of(backing: &Backing) -> &[IndexEntry] {
    let bytes: &[u8] = match backing {
        #[cfg(feature = "mmap")]
        Backing::Mapped(m) => &m[..],
        Backing::Owned(v) => &v[..],
    };
    IndexEntry::slice_from(bytes).unwrap_or(&[])
}

/// The writable, in-memory staging buffer for the current, uncommitted frame (and, without the
/// `mmap` feature, the on-disk index copy too).
#[derive(Default)]
pub struct OwnedIndex {
    entries: Vec<IndexEntry>,
}

impl OwnedIndex {
    pub fn with_capacity(cap: usize) -> Self {
        OwnedIndex {
            entries: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn owned_index_push_and_clear() {
        let mut idx = OwnedIndex::with_capacity(4);
        assert!(idx.is_empty());
        idx.push(IndexEntry::new(0, 0, 1, 1, 1, 256));
        assert_eq!(idx.len(), 1);
        idx.clear();
        assert!(idx.is_empty());
    }

    #[test]
    fn validate_entry_rejects_out_of_bounds_payload() {
        let entry = IndexEntry::new(0, 0, 1, 1_000_000, 1, 256);
        assert!(!validate_entry(&entry, 1024, 128, 1));
    }

    #[test]
    fn validate_entry_rejects_unknown_type() {
        let entry = IndexEntry::new(0, 0, 99, 1, 1, 256);
        assert!(!validate_entry(&entry, 4096, 128, 1));
    }

    #[test]
    fn mapped_index_bisects_first_unused_slot() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();

        let mut buf = vec![0u8; 8 * INDEX_ENTRY_SIZE];
        let e0 = IndexEntry::new(0, 0, 1, 1, 1, 512);
        let e1 = IndexEntry::new(1, 1, 1, 1, 1, 520);
        buf[0..32].copy_from_slice(e0.as_bytes());
        buf[32..64].copy_from_slice(e1.as_bytes());
        gsd_io::pwrite_all(fd, &buf, 0).unwrap();

        let mapped = MappedIndex::open(fd, 0, 8, 4096, 2).unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped.entries()[0].frame.get(), 0);
        assert_eq!(mapped.entries()[1].frame.get(), 1);
    }
}
