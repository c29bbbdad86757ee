use thiserror::Error;

/// Every failure mode a public gsd operation can surface.
///
/// Mirrors the error codes of the reference C implementation (`GSD_ERROR_*`), but as a typed
/// enum so callers can match on the specific failure instead of inspecting an integer.
#[derive(Debug, Error)]
pub enum GsdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a gsd file")]
    NotAGsdFile,

    #[error("invalid gsd file version: {version:#010x}")]
    InvalidGsdFileVersion { version: u32 },

    #[error("file is corrupt: {0}")]
    FileCorrupt(String),

    #[error("memory allocation failed")]
    MemoryAllocationFailed,

    #[error("namelist is full")]
    NamelistFull,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file must be writable for this operation")]
    FileMustBeWritable,

    #[error("file must be readable for this operation")]
    FileMustBeReadable,
}

pub type Result<T> = std::result::Result<T, GsdError>;
