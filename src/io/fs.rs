//! IO backed by regular files in a generic filesystem.
//!
//! Names are plain paths. The producer handle is created with truncation,
//! reader handles are opened read-only, and positional reads go through the
//! platform `p*`-style calls, so no handle keeps a shared cursor for reads.
//! All IO is synchronous.

#[cfg(not(any(unix, windows)))]
compile_error!("file io requires positional reads, available on unix and windows");

use std::{fs, io, io::Write};

use crate::io::{closed_handle, File, FileSystem};

/// A [`FileSystem`] over the operating system files, where names are paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFs;

impl FileSystem for OsFs {
    type File = OsFile;

    fn create(&self, name: &str) -> io::Result<OsFile> {
        let file = fs::File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(name)?;
        Ok(OsFile {
            name: name.to_owned(),
            inner: Some(file),
        })
    }

    fn open(&self, name: &str) -> io::Result<OsFile> {
        let file = fs::File::options().read(true).open(name)?;
        Ok(OsFile {
            name: name.to_owned(),
            inner: Some(file),
        })
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(name)
    }
}

/// An operating system file implementing [`File`].
///
/// The open file is dropped on close, after which reads and writes fail
/// while the name remains available.
#[derive(Debug)]
pub struct OsFile {
    name: String,
    inner: Option<fs::File>,
}

impl OsFile {
    /// Returns the underlying open file, or an error if the handle has been
    /// closed.
    #[inline(always)]
    fn inner(&self) -> io::Result<&fs::File> {
        self.inner.as_ref().ok_or_else(closed_handle)
    }
}

impl File for OsFile {
    #[inline(always)]
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.inner()?.read_at(buf, offset)
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            self.inner()?.seek_read(buf, offset)
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.inner()?;
        file.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the handle releases it. Errors the OS reports on close
        // are not observable through the std file API, and durability is on
        // the caller anyway.
        self.inner.take();
        Ok(())
    }
}
