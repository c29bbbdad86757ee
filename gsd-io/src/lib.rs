//! Positional I/O primitives for the gsd storage engine.
//!
//! Mirrors the retry-and-cap shape the reference C implementation uses around `pread`/`pwrite`:
//! a single large transfer is split into calls no larger than `i32::MAX / 2` bytes, and short
//! transfers are retried until the whole buffer has moved or EOF is hit.

use std::io;
use std::os::unix::io::RawFd;

/// Largest single `pread`/`pwrite` call we will ever issue.
///
/// Some platforms reject reads/writes larger than `INT_MAX`; halving it leaves headroom and
/// matches the cap the GSD reference implementation uses on Windows and macOS. We apply it
/// unconditionally rather than gating it behind a platform `cfg`.
const MAX_SINGLE_TRANSFER: usize = i32::MAX as usize / 2;

/// Reads exactly `buf.len()` bytes from `fd` starting at `offset`, retrying short reads.
///
/// Returns the number of bytes actually read, which is less than `buf.len()` only if EOF was
/// reached before the buffer was filled.
pub fn pread_all(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total_read = 0usize;

    while total_read < buf.len() {
        let to_read = (buf.len() - total_read).min(MAX_SINGLE_TRANSFER);
        let dst = &mut buf[total_read..total_read + to_read];

        let rc = unsafe {
            libc::pread(
                fd,
                dst.as_mut_ptr() as *mut libc::c_void,
                to_read,
                (offset + total_read as u64) as libc::off_t,
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            // EOF: return the partial count, not an error.
            break;
        }

        total_read += rc as usize;
    }

    Ok(total_read)
}

/// Writes all of `buf` to `fd` starting at `offset`, retrying short writes.
pub fn pwrite_all(fd: RawFd, buf: &[u8], offset: u64) -> io::Result<()> {
    let mut total_written = 0usize;

    while total_written < buf.len() {
        let to_write = (buf.len() - total_written).min(MAX_SINGLE_TRANSFER);
        let src = &buf[total_written..total_written + to_write];

        let rc = unsafe {
            libc::pwrite(
                fd,
                src.as_ptr() as *const libc::c_void,
                to_write,
                (offset + total_written as u64) as libc::off_t,
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "pwrite returned 0 before the buffer was fully written",
            ));
        }

        total_written += rc as usize;
    }

    Ok(())
}

/// Returns a zero-filled buffer of `len` bytes.
///
/// Used to seed the initial index/namelist blocks and to extend the file during index growth.
pub fn zero_buffer(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

/// fsyncs the given descriptor, surfacing the OS error on failure.
pub fn fsync(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { libc::fsync(fd) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
