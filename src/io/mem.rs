//! IO over in-memory buffers. Can be used to create memory-only streams.

// Offsets are checked against the buffer length before indexing, the casts
// below never truncate.
#![allow(clippy::cast_possible_truncation)]

use std::{
    collections::HashMap,
    io,
    sync::{atomic, Arc, RwLock},
};

use crate::{
    error::StreamError,
    io::{closed_handle, File, FileSystem},
};

/// The byte container a [`MemFile`] handle points at. Shared between the
/// writer handle and all reader handles opened under the same name.
#[derive(Debug)]
struct Buffer {
    name: String,
    bytes: RwLock<Vec<u8>>,
}

impl Buffer {
    fn new(name: &str) -> Arc<Buffer> {
        Arc::new(Buffer {
            name: name.to_owned(),
            bytes: RwLock::new(Vec::new()),
        })
    }
}

/// A handle onto an in-memory buffer, implementing [`File`].
///
/// Handles onto the same name share the buffer, but each handle has its own
/// closed flag, so closing a reader does not affect the writer or the other
/// readers.
#[derive(Debug)]
pub struct MemFile {
    buffer: Arc<Buffer>,
    closed: atomic::AtomicBool,
}

impl MemFile {
    fn new(buffer: Arc<Buffer>) -> MemFile {
        MemFile {
            buffer,
            closed: atomic::AtomicBool::new(false),
        }
    }

    /// Whether this handle has been closed. Relaxed is enough, the flag
    /// only gates the error path and the data sits behind its own lock.
    #[inline(always)]
    fn is_closed(&self) -> bool {
        self.closed.load(atomic::Ordering::Relaxed)
    }
}

impl File for MemFile {
    #[inline(always)]
    fn name(&self) -> &str {
        &self.buffer.name
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_handle());
        }
        let bytes = self.buffer.bytes.read().expect("should not poison");
        if offset >= bytes.len() as u64 {
            return Ok(0);
        }
        let available = &bytes[offset as usize..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_handle());
        }
        let mut bytes = self.buffer.bytes.write().expect("should not poison");
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, atomic::Ordering::Relaxed);
        Ok(())
    }
}

/// An in-memory [`FileSystem`] keyed by name.
///
/// Creating a name truncates any previous content under it. Opened handles
/// keep their buffer alive even after [`MemFs::remove`], mirroring how an
/// open descriptor outlives an unlinked file.
#[derive(Debug, Default)]
pub struct MemFs {
    files: RwLock<HashMap<String, Arc<Buffer>>>,
}

impl MemFs {
    /// Creates a new empty in-memory file system.
    #[must_use]
    pub fn new() -> MemFs {
        MemFs::default()
    }
}

impl FileSystem for MemFs {
    type File = MemFile;

    fn create(&self, name: &str) -> io::Result<MemFile> {
        let buffer = Buffer::new(name);
        let mut files = self.files.write().expect("should not poison");
        files.insert(name.to_owned(), Arc::clone(&buffer));
        Ok(MemFile::new(buffer))
    }

    fn open(&self, name: &str) -> io::Result<MemFile> {
        let files = self.files.read().expect("should not poison");
        files.get(name).map_or_else(
            || {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no such in-memory file",
                ))
            },
            |buffer| Ok(MemFile::new(Arc::clone(buffer))),
        )
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        let mut files = self.files.write().expect("should not poison");
        files.remove(name);
        Ok(())
    }
}

/// The file system behind [`Stream::in_memory`](crate::Stream::in_memory):
/// a single anonymous buffer with no namespace around it.
///
/// Opening always hands out a reader onto the one buffer. Creating and
/// removing fail with [`StreamError::Unsupported`], as there is nothing to
/// resolve a name against.
#[derive(Debug)]
pub struct SingletonFs {
    buffer: Arc<Buffer>,
}

impl SingletonFs {
    /// Creates the file system along with the writer handle onto its single
    /// anonymous buffer.
    pub(crate) fn new() -> (SingletonFs, MemFile) {
        let buffer = Buffer::new("");
        let file = MemFile::new(Arc::clone(&buffer));
        (SingletonFs { buffer }, file)
    }
}

impl FileSystem for SingletonFs {
    type File = MemFile;

    fn create(&self, _name: &str) -> io::Result<MemFile> {
        Err(StreamError::Unsupported.into())
    }

    fn open(&self, _name: &str) -> io::Result<MemFile> {
        Ok(MemFile::new(Arc::clone(&self.buffer)))
    }

    fn remove(&self, _name: &str) -> io::Result<()> {
        Err(StreamError::Unsupported.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfs_create_open_remove() {
        let fs = MemFs::new();

        let case = "open of a missing name fails";
        let err = fs.open("missing").expect_err(case);
        assert_eq!(err.kind(), io::ErrorKind::NotFound, "{case}");

        let case = "reads observe writes through another handle";
        let mut writer = fs.create("data").expect(case);
        assert_eq!(writer.write(b"hello").expect(case), 5, "{case}");
        let reader = fs.open("data").expect(case);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read_at(&mut buf, 0).expect(case), 5, "{case}");
        assert_eq!(&buf[..5], b"hello", "{case}");

        let case = "read past the end is empty";
        assert_eq!(reader.read_at(&mut buf, 5).expect(case), 0, "{case}");
        assert_eq!(reader.read_at(&mut buf, 100).expect(case), 0, "{case}");

        let case = "create truncates";
        fs.create("data").expect(case);
        let reader = fs.open("data").expect(case);
        assert_eq!(reader.read_at(&mut buf, 0).expect(case), 0, "{case}");

        let case = "open handles survive remove";
        fs.remove("data").expect(case);
        assert_eq!(reader.read_at(&mut buf, 0).expect(case), 0, "{case}");
        let err = fs.open("data").expect_err(case);
        assert_eq!(err.kind(), io::ErrorKind::NotFound, "{case}");
    }

    #[test]
    fn memfile_close() {
        let fs = MemFs::new();
        let mut writer = fs.create("data").expect("create");
        let mut reader = fs.open("data").expect("open");

        let case = "closed handle fails reads and writes";
        reader.close().expect(case);
        let mut buf = [0u8; 4];
        reader.read_at(&mut buf, 0).expect_err(case);
        writer.close().expect(case);
        writer.write(b"data").expect_err(case);

        let case = "close does not spread to other handles";
        let other = fs.open("data").expect(case);
        assert_eq!(other.read_at(&mut buf, 0).expect(case), 0, "{case}");
    }

    #[test]
    fn singleton_unsupported() {
        let (fs, _file) = SingletonFs::new();

        let case = "create is unsupported";
        let err = fs.create("anything").expect_err(case);
        assert_eq!(
            StreamError::from_io(&err),
            Some(StreamError::Unsupported),
            "{case}"
        );

        let case = "remove is unsupported";
        let err = fs.remove("anything").expect_err(case);
        assert_eq!(
            StreamError::from_io(&err),
            Some(StreamError::Unsupported),
            "{case}"
        );

        let case = "open returns a reader onto the same buffer";
        fs.open("anything").expect(case);
    }
}
