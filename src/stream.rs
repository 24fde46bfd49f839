//! The producer side of a stream.

use std::{io, sync::Mutex};

use crate::{
    error::StreamError,
    io::{File, FileSystem, SingletonFs},
    reader::Reader,
    sync::{Broadcaster, OnceStatus},
};

#[cfg(feature = "io-filesystem")]
use crate::io::OsFs;

/// A byte stream one producer appends to while many readers consume it.
///
/// The stream owns the writable handle onto a named file in some
/// [`FileSystem`] and hands out any number of [`Reader`]s, each with an
/// independent view of the data from offset 0. Writes never wait on
/// readers; readers at the end of the written data wait for the producer.
///
/// Once done, the producer calls [`Stream::close`], after which readers
/// drain whatever was written and reach the end of the stream. A
/// [`Stream::cancel`] instead tears everything down: pending and future
/// reads fail with [`StreamError::Canceled`]. [`Stream::remove`] waits for
/// the producer and all readers to be done and then deletes the file.
///
/// All methods take `&self` and are safe to call from several threads, and
/// [`io::Write`] is implemented for both `Stream` and `&Stream`. The stream
/// closes itself when dropped; the backing file is kept unless
/// [`Stream::remove`] is called.
#[derive()] // manual: Debug
pub struct Stream<Fs: FileSystem> {
    name: String,
    fs: Fs,
    /// The producer handle. The mutex serializes writes, which keeps them
    /// non-overlapping without ever blocking on readers.
    file: Mutex<Fs::File>,
    broadcaster: Broadcaster<Fs::File>,
    closed: OnceStatus,
}

#[cfg(feature = "io-filesystem")]
impl Stream<OsFs> {
    /// Creates a stream backed by a regular file at the path `name`,
    /// truncating whatever was there.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be created.
    pub fn create(name: &str) -> io::Result<Stream<OsFs>> {
        Stream::with_fs(name, OsFs)
    }
}

impl Stream<SingletonFs> {
    /// Creates a stream over a single anonymous in-memory buffer, with no
    /// file system underneath. The name is empty and [`Stream::remove`]
    /// fails with [`StreamError::Unsupported`], as there is nothing to
    /// delete the buffer from.
    #[must_use]
    pub fn in_memory() -> Stream<SingletonFs> {
        let (fs, file) = SingletonFs::new();
        Stream {
            name: String::new(),
            fs,
            file: Mutex::new(file),
            broadcaster: Broadcaster::new(),
            closed: OnceStatus::new(),
        }
    }
}

impl<Fs: FileSystem> Stream<Fs> {
    /// Creates a stream named `name` in the file system `fs`.
    ///
    /// # Errors
    ///
    /// An error is returned if the file cannot be created.
    pub fn with_fs(name: &str, fs: Fs) -> io::Result<Stream<Fs>> {
        let file = fs.create(name)?;
        Ok(Stream {
            name: name.to_owned(),
            fs,
            file: Mutex::new(file),
            broadcaster: Broadcaster::new(),
            closed: OnceStatus::new(),
        })
    }

    /// Returns the name of the underlying file.
    #[inline(always)]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of bytes written so far and whether that size is
    /// final, i.e. whether the stream has been closed.
    #[must_use]
    pub fn size(&self) -> (u64, bool) {
        self.broadcaster.size()
    }

    /// Appends `buf` to the stream and wakes readers waiting for it,
    /// returning the number of bytes written.
    ///
    /// Concurrent calls are serialized against each other and against
    /// [`Stream::close`], and never wait on readers.
    ///
    /// # Errors
    ///
    /// The underlying file's error, verbatim. Writing to a closed or
    /// canceled stream fails, as its file handle has been closed.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("should not poison");
        let n = file.write(buf)?;
        drop(file);
        self.broadcaster.wrote(n);
        Ok(n)
    }

    /// Closes the stream: the size becomes final and readers see the end of
    /// the stream once they have drained it. Existing and new readers keep
    /// working on the written data.
    ///
    /// Closing is one-shot: the first result is captured and replayed by
    /// later calls. Dropping the stream closes it implicitly.
    ///
    /// # Errors
    ///
    /// An error is returned if closing the underlying file fails. The
    /// stream still transitions, readers are not left blocked.
    pub fn close(&self) -> io::Result<()> {
        self.closed.call(|| {
            log::debug!("stream {:?}: closing", self.name);
            let result = self.file.lock().expect("should not poison").close();
            self.broadcaster.close();
            result
        })
    }

    /// Cancels the stream: every blocked and future read fails with
    /// [`StreamError::Canceled`], all readers are closed, and no new reader
    /// can be created. Cancel wins over a previous close.
    ///
    /// Non-blocking, and safe to call any number of times, in either order
    /// relative to [`Stream::close`].
    ///
    /// # Errors
    ///
    /// An error is returned if closing the underlying file fails.
    pub fn cancel(&self) -> io::Result<()> {
        log::debug!("stream {:?}: canceling", self.name);
        self.broadcaster.cancel();
        self.close()
    }

    /// Refuses new readers with `err` and blocks until the producer and all
    /// readers have closed their handles.
    ///
    /// This is the drain half of [`Stream::remove`], exposed for callers
    /// that need to quiesce the stream without deleting the file. The
    /// refusal is permanent and keeps the first error it was given.
    pub fn shutdown_with_err(&self, err: StreamError) {
        log::debug!("stream {:?}: shutting down: {err}", self.name);
        self.broadcaster.prevent_new_handles(err);
        self.broadcaster.wait_for_zero_handles();
    }

    /// Removes the stream: refuses new readers with
    /// [`StreamError::Removing`], blocks until the stream and all its
    /// readers have been closed, and then deletes the underlying file by
    /// name.
    ///
    /// On a canceled stream this is a no-op. Note that the stream must be
    /// closed - by this or another thread - for the call to return.
    ///
    /// # Errors
    ///
    /// An error is returned if the file system fails to delete the file,
    /// including [`StreamError::Unsupported`] for an in-memory stream.
    pub fn remove(&self) -> io::Result<()> {
        if self.broadcaster.is_canceled() {
            return Ok(());
        }
        self.shutdown_with_err(StreamError::Removing);
        log::debug!("stream {:?}: removing", self.name);
        self.fs.remove(&self.name)
    }

    /// Creates a new independent reader of this stream, which sees the
    /// complete data from offset 0 and can read while the stream is being
    /// written to.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Canceled`] after a cancel,
    /// [`StreamError::Removing`] after a remove has begun, or the error of
    /// opening the underlying file.
    pub fn new_reader(&self) -> io::Result<Reader<'_, Fs>> {
        let handle = self.broadcaster.new_reader(|| self.fs.open(&self.name))?;
        log::trace!("stream {:?}: reader {} opened", self.name, handle.id());
        Ok(Reader::new(self, handle))
    }

    #[inline(always)]
    pub(crate) fn broadcaster(&self) -> &Broadcaster<Fs::File> {
        &self.broadcaster
    }
}

impl<Fs: FileSystem> io::Write for Stream<Fs> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf)
    }

    #[inline(always)]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<Fs: FileSystem> io::Write for &Stream<Fs> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(*self, buf)
    }

    #[inline(always)]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<Fs: FileSystem> core::fmt::Debug for Stream<Fs> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (size, closed) = self.size();
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("size", &size)
            .field("closed", &closed)
            .finish_non_exhaustive()
    }
}

impl<Fs: FileSystem> Drop for Stream<Fs> {
    fn drop(&mut self) {
        if !self.closed.done() {
            if let Err(err) = self.close() {
                log::debug!("stream {:?}: close on drop failed: {err}", self.name);
            }
        }
    }
}
