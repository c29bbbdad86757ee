use std::os::unix::io::RawFd;

use crate::error::{GsdError, Result};
use crate::types::GSD_NAME_SIZE;

/// Truncates `name` to the 63 bytes that fit in a namelist slot (NUL terminator excluded).
///
/// Operates on raw bytes, not `char`s, so it never panics on a name whose multi-byte UTF-8
/// character straddles the cut point — chunk names are case-sensitive byte strings, not
/// necessarily valid UTF-8 (any non-zero byte is permissible).
fn truncate_name(name: &[u8]) -> &[u8] {
    if name.len() > GSD_NAME_SIZE - 1 {
        &name[..GSD_NAME_SIZE - 1]
    } else {
        name
    }
}

/// The append-only on-disk/in-memory name table.
///
/// Disk layout is a contiguous run of fixed 64-byte slots; `written` is the high-water mark of
/// slots that have actually been committed (written to disk and fsynced). Names appended since
/// the last commit live only in `entries`'s tail and are invisible to [`NameTable::find`] until
/// [`NameTable::flush`] runs, matching the reference implementation's documented behavior.
pub struct NameTable {
    location: u64,
    allocated: u64,
    /// `(name, id)` pairs, sorted by name for the entries in `[0, written)`. Entries appended
    /// since the last flush are unsorted and sit at the tail.
    entries: Vec<(Vec<u8>, u16)>,
    written: usize,
}

impl NameTable {
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Loads the namelist block from disk: every byte is read, committed names are decoded and
    /// counted by scanning for the first empty slot, and the sorted lookup array is built.
    pub fn load(fd: RawFd, location: u64, allocated: u64) -> Result<Self> {
        let mut entries = Vec::new();
        let mut written = 0usize;

        for i in 0..allocated {
            let mut slot = [0u8; GSD_NAME_SIZE];
            gsd_io::pread_all(fd, &mut slot, location + i * GSD_NAME_SIZE as u64)?;

            if slot[0] == 0 {
                // First unused slot: the rest of the block is unwritten by construction.
                break;
            }

            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            entries.push((slot[..end].to_vec(), i as u16));
            written += 1;
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(NameTable {
            location,
            allocated,
            entries,
            written,
        })
    }

    /// Binary search over committed entries only, using a total byte-wise comparison.
    pub fn find(&self, name: &[u8]) -> Option<u16> {
        if self.written == 0 {
            return None;
        }
        let name = truncate_name(name);
        self.entries[..self.written]
            .binary_search_by(|(n, _)| n.as_slice().cmp(name))
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    /// Appends `name` to the next unused slot and returns its new id, without persisting it or
    /// re-sorting.
    pub fn append(&mut self, name: &[u8]) -> Result<u16> {
        if self.entries.len() as u64 >= self.allocated {
            return Err(GsdError::NamelistFull);
        }
        if name.is_empty() {
            return Err(GsdError::InvalidArgument(
                "chunk name must not be empty".into(),
            ));
        }

        let id = self.entries.len() as u16;
        self.entries.push((truncate_name(name).to_vec(), id));
        Ok(id)
    }

    /// Resolves `name` to its id, appending a new namelist slot only if `name` has never been
    /// seen before in this file — including names appended earlier in the current, still
    /// uncommitted frame. A name already staged in the uncommitted tail (appended by an earlier
    /// `write_chunk` in the same frame, before `flush` made it visible to `find`) is matched by a
    /// linear scan of that tail rather than being re-appended under a second id, which would let
    /// `find_chunk`'s binary search land on whichever duplicate-named entry it happens to probe.
    pub fn find_or_append(&mut self, name: &[u8]) -> Result<u16> {
        let name = truncate_name(name);
        if let Some(id) = self.find(name) {
            return Ok(id);
        }
        if let Some(&(_, id)) = self.entries[self.written..].iter().find(|(n, _)| n.as_slice() == name) {
            return Ok(id);
        }
        self.append(name)
    }

    /// True if there are appended-but-uncommitted names waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        self.entries.len() > self.written
    }

    /// Writes any pending (appended-since-last-flush) names to their on-disk slots, fsyncs, and
    /// resorts the in-memory lookup array so `find` can see them.
    pub fn flush(&mut self, fd: RawFd) -> Result<()> {
        if !self.has_pending() {
            return Ok(());
        }

        for idx in self.written..self.entries.len() {
            let (name, id) = &self.entries[idx];
            let mut slot = [0u8; GSD_NAME_SIZE];
            slot[..name.len()].copy_from_slice(name);
            gsd_io::pwrite_all(fd, &slot, self.location + (*id as u64) * GSD_NAME_SIZE as u64)?;
        }
        gsd_io::fsync(fd)?;

        self.written = self.entries.len();
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(())
    }

    /// Returns the next committed name in sort order after `prev` (or the first, if `prev` is
    /// `None`) whose bytes start with `prefix`.
    pub fn find_matching(&self, prefix: &[u8], prev: Option<&[u8]>) -> Option<Vec<u8>> {
        let committed = &self.entries[..self.written];
        let start = match prev {
            None => 0,
            Some(prev_name) => match committed.binary_search_by(|(n, _)| n.as_slice().cmp(prev_name)) {
                Ok(idx) => idx + 1,
                Err(_) => return None,
            },
        };

        committed[start..]
            .iter()
            .find(|(n, _)| n.starts_with(prefix))
            .map(|(n, _)| n.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn make_empty_namelist(fd: RawFd, location: u64, allocated: u64) {
        let zeros = gsd_io::zero_buffer((allocated * GSD_NAME_SIZE as u64) as usize);
        gsd_io::pwrite_all(fd, &zeros, location).unwrap();
    }

    #[test]
    fn append_then_flush_makes_name_findable() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        make_empty_namelist(fd, 0, 8);

        let mut table = NameTable::load(fd, 0, 8).unwrap();
        assert_eq!(table.find(b"velocity"), None);

        let id = table.append(b"velocity").unwrap();
        assert_eq!(table.find(b"velocity"), None, "uncommitted names aren't found yet");

        table.flush(fd).unwrap();
        assert_eq!(table.find(b"velocity"), Some(id));
    }

    #[test]
    fn namelist_full_is_reported() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        make_empty_namelist(fd, 0, 2);

        let mut table = NameTable::load(fd, 0, 2).unwrap();
        table.append(b"a").unwrap();
        table.append(b"b").unwrap();
        match table.append(b"c") {
            Err(GsdError::NamelistFull) => {}
            other => panic!("expected NamelistFull, got {:?}", other),
        }
    }

    #[test]
    fn find_matching_walks_prefix_in_sorted_order() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        make_empty_namelist(fd, 0, 8);

        let mut table = NameTable::load(fd, 0, 8).unwrap();
        for name in [&b"particles/position"[..], &b"particles/velocity"[..], &b"log/step"[..]] {
            table.append(name).unwrap();
        }
        table.flush(fd).unwrap();

        let first = table.find_matching(b"particles/", None).unwrap();
        let second = table.find_matching(b"particles/", Some(&first)).unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(b"particles/"));
        assert!(second.starts_with(b"particles/"));
        assert!(table.find_matching(b"particles/", Some(&second)).is_none());
    }

    #[test]
    fn find_or_append_reuses_id_for_repeated_uncommitted_name() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        make_empty_namelist(fd, 0, 8);

        let mut table = NameTable::load(fd, 0, 8).unwrap();

        // Three same-frame writes of a brand-new name must all resolve to one id, not three
        // separate namelist slots.
        let first = table.find_or_append(b"step").unwrap();
        let second = table.find_or_append(b"step").unwrap();
        let third = table.find_or_append(b"step").unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(table.num_entries(), 1, "repeated uncommitted writes must not grow the namelist");

        table.flush(fd).unwrap();
        assert_eq!(table.find(b"step"), Some(first));
    }

    #[test]
    fn append_truncates_a_name_straddling_a_multi_byte_char_without_panicking() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        make_empty_namelist(fd, 0, 2);

        let mut table = NameTable::load(fd, 0, 2).unwrap();
        // 62 ASCII bytes followed by a 3-byte UTF-8 character: byte 63 lands inside that
        // character, which `String::truncate` would panic on.
        let mut name = vec![b'a'; 62];
        name.extend_from_slice("€".as_bytes());
        assert!(table.append(&name).is_ok());
    }
}
