use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};

use crate::error::{GsdError, Result};
use crate::header::{read_header, write_header, Header, HEADER_SIZE, INDEX_GROWTH_FACTOR, INITIAL_INDEX_ENTRIES, INITIAL_NAMELIST_ENTRIES};
use crate::index::{IndexEntry, MappedIndex, OwnedIndex, INDEX_ENTRY_SIZE};
use crate::namelist::NameTable;
use crate::types::{sizeof_type, OpenMode, GSD_NAME_SIZE};

const INITIAL_FRAME_BUFFER_ENTRIES: usize = 16;

/// An open gsd file.
///
/// Single-threaded, exclusive owner of the underlying file descriptor; the caller is responsible
/// for serializing calls the way the reference implementation's single-threaded `gsd_handle`
/// does.
pub struct GsdFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
    header: Header,
    file_size: u64,
    index: MappedIndex,
    frame_buffer: OwnedIndex,
    names: NameTable,
    cur_frame: u64,
}

impl GsdFile {
    /// Creates a new, empty gsd file at `path`, overwriting any existing file.
    ///
    /// The created file is not opened; call [`GsdFile::open`] to use it.
    pub fn create(path: impl AsRef<Path>, application: &str, schema: &str, schema_version: u32) -> Result<()> {
        let path = path.as_ref();
        info!("creating gsd file {:?}", path);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let fd = file.as_raw_fd();

        let header = Header::new(application, schema, schema_version);
        write_header(fd, &header)?;

        let index_bytes = gsd_io::zero_buffer((INITIAL_INDEX_ENTRIES as usize) * INDEX_ENTRY_SIZE);
        gsd_io::pwrite_all(fd, &index_bytes, HEADER_SIZE as u64)?;

        let namelist_location = HEADER_SIZE as u64 + INITIAL_INDEX_ENTRIES * INDEX_ENTRY_SIZE as u64;
        let namelist_bytes = gsd_io::zero_buffer((INITIAL_NAMELIST_ENTRIES as usize) * GSD_NAME_SIZE);
        gsd_io::pwrite_all(fd, &namelist_bytes, namelist_location)?;

        gsd_io::fsync(fd)?;
        Ok(())
    }

    /// Opens an existing gsd file in the given mode.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening gsd file {:?} in {:?} mode", path, mode);

        let file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .open(path)?;
        Self::from_file(file, path.to_path_buf(), mode)
    }

    /// Creates `path` (overwriting anything already there) and immediately opens it.
    ///
    /// `mode` must be `ReadWrite` or `Append`; `exclusive` requests `O_EXCL` semantics so the
    /// call fails instead of silently overwriting a concurrently created file.
    pub fn create_and_open(
        path: impl AsRef<Path>,
        application: &str,
        schema: &str,
        schema_version: u32,
        mode: OpenMode,
        exclusive: bool,
    ) -> Result<Self> {
        if !mode.is_writable() {
            return Err(GsdError::InvalidArgument(
                "create_and_open requires ReadWrite or Append mode".into(),
            ));
        }
        let path = path.as_ref();

        let mut options = OpenOptions::new();
        options.create(true).write(true).read(true).truncate(true);
        if exclusive {
            options.create_new(true);
        }
        let file = options.open(path)?;
        let fd = file.as_raw_fd();

        let header = Header::new(application, schema, schema_version);
        write_header(fd, &header)?;

        let index_bytes = gsd_io::zero_buffer((INITIAL_INDEX_ENTRIES as usize) * INDEX_ENTRY_SIZE);
        gsd_io::pwrite_all(fd, &index_bytes, HEADER_SIZE as u64)?;

        let namelist_location = HEADER_SIZE as u64 + INITIAL_INDEX_ENTRIES * INDEX_ENTRY_SIZE as u64;
        let namelist_bytes = gsd_io::zero_buffer((INITIAL_NAMELIST_ENTRIES as usize) * GSD_NAME_SIZE);
        gsd_io::pwrite_all(fd, &namelist_bytes, namelist_location)?;
        gsd_io::fsync(fd)?;

        Self::from_file(file, path.to_path_buf(), mode)
    }

    fn from_file(file: File, path: PathBuf, mode: OpenMode) -> Result<Self> {
        let fd = file.as_raw_fd();
        let header = read_header(fd)?;

        let file_size = file.metadata()?.len();
        let index_location = header.index_location.get();
        let index_allocated = header.index_allocated_entries.get();
        let namelist_location = header.namelist_location.get();
        let namelist_allocated = header.namelist_allocated_entries.get();

        if index_location + index_allocated * INDEX_ENTRY_SIZE as u64 > file_size {
            return Err(GsdError::FileCorrupt(
                "index block extends past end of file".into(),
            ));
        }
        if namelist_location + namelist_allocated * GSD_NAME_SIZE as u64 > file_size {
            return Err(GsdError::FileCorrupt(
                "namelist block extends past end of file".into(),
            ));
        }

        let names = NameTable::load(fd, namelist_location, namelist_allocated)?;
        let index = MappedIndex::open(
            fd,
            index_location,
            index_allocated,
            file_size,
            names.num_entries() as u64,
        )?;

        let cur_frame = match index.entries().last() {
            Some(last) => last.frame.get() + 1,
            None => 0,
        };

        let frame_buffer = if mode.is_writable() {
            OwnedIndex::with_capacity(INITIAL_FRAME_BUFFER_ENTRIES)
        } else {
            OwnedIndex::with_capacity(0)
        };

        Ok(GsdFile {
            file,
            path,
            mode,
            header,
            file_size,
            index,
            frame_buffer,
            names,
            cur_frame,
        })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn require_writable(&self) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(GsdError::FileMustBeWritable);
        }
        Ok(())
    }

    fn require_readable(&self) -> Result<()> {
        if !self.mode.is_readable() {
            return Err(GsdError::FileMustBeReadable);
        }
        Ok(())
    }

    /// Number of frames committed to the file.
    pub fn n_frames(&self) -> u64 {
        self.cur_frame
    }

    /// Writes a chunk to the current, not-yet-committed frame.
    ///
    /// The chunk becomes visible to `find_chunk` only after the next [`GsdFile::end_frame`].
    pub fn write_chunk(&mut self, name: &[u8], type_id: u8, n: u64, m: u32, flags: u8, data: &[u8]) -> Result<()> {
        self.require_writable()?;

        if n == 0 || m == 0 || flags != 0 || data.is_empty() || sizeof_type(type_id) == 0 {
            return Err(GsdError::InvalidArgument(
                "write_chunk requires N > 0, M > 0, flags == 0, a known type, and non-empty data".into(),
            ));
        }
        let expected_len = n * m as u64 * sizeof_type(type_id) as u64;
        if data.len() as u64 != expected_len {
            return Err(GsdError::InvalidArgument(format!(
                "data length {} does not match N*M*sizeof(type) = {}",
                data.len(),
                expected_len
            )));
        }

        // `find_or_append` also matches names appended earlier in this same uncommitted frame,
        // so repeated writes of a brand-new name reuse one id instead of growing a new namelist
        // slot (and a separate, stale-order-prone entry) per call.
        let id = self.names.find_or_append(name)?;

        let location = self.file_size as i64;
        trace!(
            "write_chunk frame={} name={} id={} type={} N={} M={} location={}",
            self.cur_frame, String::from_utf8_lossy(name), id, type_id, n, m, location
        );

        if let Err(e) = gsd_io::pwrite_all(self.fd(), data, location as u64) {
            self.reload_file_size();
            return Err(e.into());
        }
        self.file_size += data.len() as u64;

        self.frame_buffer
            .push(IndexEntry::new(self.cur_frame, id, type_id, n, m, location));

        Ok(())
    }

    /// Reloads `file_size` from the filesystem after a write-path I/O error, so a failed write or
    /// growth attempt never leaves the cached size ahead of what is actually on disk.
    fn reload_file_size(&mut self) {
        if let Ok(meta) = self.file.metadata() {
            self.file_size = meta.len();
        }
    }

    /// Commits all chunks written since the last `end_frame` and advances the frame counter.
    pub fn end_frame(&mut self) -> Result<()> {
        self.require_writable()?;

        self.cur_frame += 1;

        if self.names.has_pending() {
            self.names.flush(self.fd())?;
        }

        if !self.frame_buffer.is_empty() {
            self.ensure_index_capacity(self.frame_buffer.len())?;

            let written = self.index.len();
            let offset = self.header.index_location.get() + (written as u64) * INDEX_ENTRY_SIZE as u64;

            let mut bytes = Vec::with_capacity(self.frame_buffer.len() * INDEX_ENTRY_SIZE);
            for entry in self.frame_buffer.entries() {
                bytes.extend_from_slice(zerocopy::AsBytes::as_bytes(entry));
            }
            if let Err(e) = gsd_io::pwrite_all(self.fd(), &bytes, offset) {
                self.reload_file_size();
                return Err(e.into());
            }
            if let Err(e) = gsd_io::fsync(self.fd()) {
                self.reload_file_size();
                return Err(e.into());
            }

            self.remap_index()?;
            self.frame_buffer.clear();
        }

        Ok(())
    }

    /// Grows the on-disk index (§4.7) until it has room for `additional` more entries.
    fn ensure_index_capacity(&mut self, additional: usize) -> Result<()> {
        while self.index.len() + additional > self.header.index_allocated_entries.get() as usize {
            self.grow_index()?;
        }
        Ok(())
    }

    fn grow_index(&mut self) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(GsdError::FileMustBeWritable);
        }

        let old_allocated = self.header.index_allocated_entries.get();
        let new_allocated = old_allocated * INDEX_GROWTH_FACTOR;
        let old_size_bytes = old_allocated * INDEX_ENTRY_SIZE as u64;

        info!(
            "growing index from {} to {} entries",
            old_allocated, new_allocated
        );

        // Step 1/2: write the current on-disk index to the tail, point index_location there.
        let new_location = self.file_size;
        let mut old_index_bytes = vec![0u8; old_size_bytes as usize];
        if let Err(e) = gsd_io::pread_all(self.fd(), &mut old_index_bytes, self.header.index_location.get()) {
            self.reload_file_size();
            return Err(e.into());
        }
        if let Err(e) = gsd_io::pwrite_all(self.fd(), &old_index_bytes, new_location) {
            self.reload_file_size();
            return Err(e.into());
        }
        self.file_size = new_location + old_size_bytes;

        let new_slots_bytes = (new_allocated - old_allocated) * INDEX_ENTRY_SIZE as u64;
        let zeros = gsd_io::zero_buffer(new_slots_bytes as usize);
        if let Err(e) = gsd_io::pwrite_all(self.fd(), &zeros, self.file_size) {
            self.reload_file_size();
            return Err(e.into());
        }
        self.file_size += new_slots_bytes;

        // Step 3: fsync data, rewrite+fsync header.
        if let Err(e) = gsd_io::fsync(self.fd()) {
            self.reload_file_size();
            return Err(e.into());
        }

        self.header.index_location = new_location.into();
        self.header.index_allocated_entries = new_allocated.into();
        if let Err(e) = write_header(self.fd(), &self.header) {
            self.reload_file_size();
            return Err(e);
        }

        // Step 4: re-map.
        self.remap_index()?;

        Ok(())
    }

    fn remap_index(&mut self) -> Result<()> {
        self.index = MappedIndex::open(
            self.fd(),
            self.header.index_location.get(),
            self.header.index_allocated_entries.get(),
            self.file_size,
            self.names.num_entries() as u64,
        )?;
        Ok(())
    }

    /// Finds the most recently written chunk named `name` in `frame`.
    pub fn find_chunk(&self, frame: u64, name: &[u8]) -> Result<Option<IndexEntry>> {
        self.require_readable()?;
        if frame >= self.cur_frame {
            return Ok(None);
        }
        let id = match self.names.find(name) {
            Some(id) => id,
            None => return Ok(None),
        };

        let entries = self.index.entries();
        // Binary search for the rightmost entry with frame <= target.
        let mut lo = 0usize;
        let mut hi = entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if entries[mid].frame.get() <= frame {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Ok(None);
        }

        let mut cur = lo - 1;
        loop {
            let entry = &entries[cur];
            if entry.frame.get() != frame {
                break;
            }
            if entry.id.get() == id {
                return Ok(Some(*entry));
            }
            if cur == 0 {
                break;
            }
            cur -= 1;
        }

        Ok(None)
    }

    /// Reads the payload located by `entry` into `data`.
    pub fn read_chunk(&self, data: &mut [u8], entry: &IndexEntry) -> Result<()> {
        self.require_readable()?;

        let elem_size = sizeof_type(entry.type_id);
        if elem_size == 0 {
            return Err(GsdError::FileCorrupt("chunk has unknown type".into()));
        }
        let expected_len = entry.n.get() * entry.m.get() as u64 * elem_size as u64;
        if data.len() as u64 != expected_len {
            return Err(GsdError::InvalidArgument(format!(
                "buffer length {} does not match chunk length {}",
                data.len(),
                expected_len
            )));
        }
        if entry.location.get() < 0
            || entry.location.get() as u64 + expected_len > self.file_size
        {
            return Err(GsdError::FileCorrupt(
                "chunk location/size out of file bounds".into(),
            ));
        }

        gsd_io::pread_all(self.fd(), data, entry.location.get() as u64)?;
        Ok(())
    }

    /// Returns the next committed chunk name after `prev` (or the first, if `prev` is `None`)
    /// whose bytes start with `prefix`.
    pub fn find_matching_chunk_name(&self, prefix: &[u8], prev: Option<&[u8]>) -> Option<Vec<u8>> {
        self.names.find_matching(prefix, prev)
    }

    /// Truncates the file back to empty (no frames, no chunks), keeping the application, schema,
    /// and schema_version metadata.
    pub fn truncate(self) -> Result<Self> {
        self.require_writable()?;

        let application = self.header.application_str();
        let schema = self.header.schema_str();
        let schema_version = self.header.schema_version.get();
        let mode = self.mode;
        let path = self.path.clone();

        warn!("truncating gsd file, discarding all frames");

        let fd = self.fd();
        self.file.set_len(0)?;

        let header = Header::new(&application, &schema, schema_version);
        write_header(fd, &header)?;

        let index_bytes = gsd_io::zero_buffer((INITIAL_INDEX_ENTRIES as usize) * INDEX_ENTRY_SIZE);
        gsd_io::pwrite_all(fd, &index_bytes, HEADER_SIZE as u64)?;

        let namelist_location = HEADER_SIZE as u64 + INITIAL_INDEX_ENTRIES * INDEX_ENTRY_SIZE as u64;
        let namelist_bytes = gsd_io::zero_buffer((INITIAL_NAMELIST_ENTRIES as usize) * GSD_NAME_SIZE);
        gsd_io::pwrite_all(fd, &namelist_bytes, namelist_location)?;
        gsd_io::fsync(fd)?;

        drop(self);
        GsdFile::open(path, mode)
    }

    /// Closes the file, releasing the mapped index, frame buffer, and name table.
    ///
    /// Equivalent to dropping the handle; provided so callers can observe the result of any
    /// final flush.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}
