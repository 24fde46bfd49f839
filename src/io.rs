//! File abstractions the streams are built over, with built-in backends.
//!
//! A [`Stream`](crate::Stream) talks to storage exclusively through the
//! [`FileSystem`] and [`File`] traits: the file system resolves names to
//! handles, and a handle supports positional reads, appending writes and an
//! explicit close. The producer owns one writable handle, and every reader
//! opens its own readable handle onto the same name, which is what allows
//! them to progress independently.

use std::io;

#[cfg(feature = "io-filesystem")]
mod fs;
mod mem;

#[cfg(feature = "io-filesystem")]
#[cfg_attr(docsrs, doc(cfg(feature = "io-filesystem")))]
pub use fs::{OsFile, OsFs};
pub use mem::{MemFile, MemFs, SingletonFs};

/// An open handle onto a named byte container.
///
/// One handle may be driven from several threads at once - a shared reader
/// issues concurrent positional reads - so reads take `&self`. Writes and
/// close are exclusive. After [`File::close`], reads and writes must fail,
/// while [`File::name`] keeps working.
pub trait File: Send + Sync {
    /// Returns the name this handle was created or opened with.
    fn name(&self) -> &str;

    /// Reads into `buf` starting at `offset`, returning the number of bytes
    /// read. `Ok(0)` means there is nothing at or after `offset` right now,
    /// which for a growing file is not necessarily the final end.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered, or if the handle
    /// has been closed.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Appends `buf` to the end of the container, returning the number of
    /// bytes written.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered, or if the handle
    /// has been closed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Closes the handle. Subsequent reads and writes fail.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered while releasing
    /// the handle.
    fn close(&mut self) -> io::Result<()>;
}

/// A named collection of byte containers.
///
/// Implementations must allow a name that was created once to be opened any
/// number of times, each open returning an independent handle that observes
/// writes made through the created one.
pub trait FileSystem: Send + Sync {
    /// The type of handles this file system hands out.
    type File: File;

    /// Creates or truncates the container under `name` and returns the
    /// writable handle for it.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn create(&self, name: &str) -> io::Result<Self::File>;

    /// Opens the container under `name` for reading.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered, including when
    /// `name` does not exist.
    fn open(&self, name: &str) -> io::Result<Self::File>;

    /// Deletes the container under `name`.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn remove(&self, name: &str) -> io::Result<()>;
}

/// The error every backend returns for operations on a closed handle.
#[inline(always)]
pub(crate) fn closed_handle() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "file already closed")
}
