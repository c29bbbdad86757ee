//! gsd: an append-friendly binary container format for molecular dynamics and other simulation
//! trajectories.
//!
//! A gsd file stores a sequence of frames. Each frame is a set of named, typed, multi-dimensional
//! chunks of data. Frames are written once and never rewritten; chunks within the most recent
//! frame may be overwritten before [`GsdFile::end_frame`] commits them. The format is designed so
//! that an unclean shutdown loses at most the in-progress frame, and older frames remain
//! intact and readable.
//!
//! ```no_run
//! use gsd::{GsdFile, GsdType, OpenMode};
//!
//! GsdFile::create("trajectory.gsd", "my-app", "my-schema", gsd::make_version(1, 0)).unwrap();
//! let mut file = GsdFile::open("trajectory.gsd", OpenMode::ReadWrite).unwrap();
//!
//! let positions: [f32; 3] = [1.0, 2.0, 3.0];
//! let bytes = unsafe {
//!     std::slice::from_raw_parts(positions.as_ptr() as *const u8, std::mem::size_of_val(&positions))
//! };
//! file.write_chunk(b"particles/position", GsdType::Float32.into(), 1, 3, 0, bytes).unwrap();
//! file.end_frame().unwrap();
//! ```

mod engine;
mod error;
mod header;
mod index;
mod namelist;
mod types;

pub use engine::GsdFile;
pub use error::{GsdError, Result};
pub use header::{GSD_MAGIC_ID, HEADER_SIZE};
pub use index::IndexEntry;
pub use types::{make_version, sizeof_type, GsdType, OpenMode, GSD_NAME_NOT_FOUND, GSD_NAME_SIZE};
