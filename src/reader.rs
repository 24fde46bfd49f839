//! The consumer side of a stream.

// Byte counts fit into the 64-bit offsets, the casts below never truncate.
#![allow(clippy::cast_possible_truncation)]

use std::{
    io,
    sync::{Arc, Mutex},
};

use crate::{
    error::StreamError,
    io::FileSystem,
    stream::Stream,
    sync::{ReaderHandle, WaitOutcome},
};

/// A concurrent-safe reader of a [`Stream`].
///
/// Each reader owns its own handle onto the underlying file and its own
/// position, so any number of them can consume the same stream
/// independently, each seeing the complete data from offset 0. Reads past
/// the bytes written so far block until the producer catches up, closes, or
/// the stream is canceled.
///
/// [`io::Read`] and [`io::Seek`] are implemented for `&Reader` as well, the
/// same way they are for [`std::fs::File`]: share a reference between
/// threads, and a blocked read can be released by calling
/// [`Reader::close`] from elsewhere - the read fails with
/// [`StreamError::ReaderClosed`]. That is also the escape hatch for callers
/// wanting read timeouts, which the stream itself does not provide.
///
/// Streaming reads and seeks are serialized against each other; positional
/// [`Reader::read_at`] calls are independent and can run concurrently.
///
/// A reader closes itself when dropped, so an abandoned one can never keep
/// [`Stream::remove`] waiting.
#[derive()] // manual: Debug
pub struct Reader<'a, Fs: FileSystem> {
    stream: &'a Stream<Fs>,
    handle: Arc<ReaderHandle<Fs::File>>,
    /// The offset for streaming reads. The mutex doubles as the latch that
    /// serializes `read` against `seek`.
    pos: Mutex<u64>,
}

impl<'a, Fs: FileSystem> Reader<'a, Fs> {
    pub(crate) fn new(stream: &'a Stream<Fs>, handle: Arc<ReaderHandle<Fs::File>>) -> Reader<'a, Fs> {
        Reader {
            stream,
            handle,
            pos: Mutex::new(0),
        }
    }

    /// Returns the name of the underlying file.
    #[must_use]
    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Returns the current size of the entire stream - not the bytes left
    /// to read - and whether that size is final. Once the producer has
    /// closed, the flag is `true` and the size no longer changes.
    #[must_use]
    pub fn size(&self) -> (u64, bool) {
        self.stream.size()
    }

    /// Reads up to `buf.len()` bytes starting at `offset` in the stream.
    ///
    /// The call blocks until the whole requested span has been written,
    /// so a short count is only returned when a terminal condition cuts the
    /// span: at the end of a closed stream the available prefix is returned,
    /// and `Ok(0)` thereafter. Reading concurrently with the same reader is
    /// fine, positional reads share nothing but the file handle.
    ///
    /// # Errors
    ///
    /// With nothing read, returns [`StreamError::Canceled`] if the stream
    /// has been canceled, [`StreamError::ReaderClosed`] if this reader was
    /// closed while blocked, or the underlying file's error. If data was
    /// read already, the data is returned and the terminal condition
    /// resurfaces on the next call.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.read_span(buf, offset, true)
    }

    /// Closes this reader, releasing its file handle and waking a read
    /// blocked on this reader from another thread.
    ///
    /// Closing is one-shot: the first result is captured and replayed by
    /// later calls. Dropping the reader closes it implicitly.
    ///
    /// # Errors
    ///
    /// An error is returned if closing the underlying file fails.
    pub fn close(&self) -> io::Result<()> {
        self.handle.close(self.stream.broadcaster())
    }

    /// The shared read loop. With `fill` set it keeps going until `buf` is
    /// full, which is the positional contract; without it the first
    /// non-empty chunk is returned, which is the streaming contract.
    fn read_span(&self, buf: &mut [u8], offset: u64, fill: bool) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let broadcaster = self.stream.broadcaster();
        let mut n = 0usize;
        loop {
            let read = broadcaster
                .use_handle(|| self.handle.read_at(&mut buf[n..], offset + n as u64));
            let m = match read {
                Ok(m) => m,
                Err(err) => {
                    if StreamError::from_io(&err) == Some(StreamError::Canceled) {
                        self.close_quietly();
                    }
                    return if n > 0 { Ok(n) } else { Err(err) };
                }
            };
            n += m;

            if n == buf.len() || (!fill && n > 0) {
                return Ok(n);
            }
            if m > 0 {
                // Progress, but the span is not full yet. Read on.
                continue;
            }

            match broadcaster.wait(self.handle.id(), offset + n as u64) {
                WaitOutcome::Ready => {}
                WaitOutcome::EndOfStream => return Ok(n),
                WaitOutcome::Canceled => {
                    self.close_quietly();
                    return if n > 0 {
                        Ok(n)
                    } else {
                        Err(StreamError::Canceled.into())
                    };
                }
                WaitOutcome::ReaderClosed => {
                    return if n > 0 {
                        Ok(n)
                    } else {
                        Err(StreamError::ReaderClosed.into())
                    };
                }
            }
        }
    }

    /// Streaming read at the saved offset.
    fn read_stream(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pos = self.pos.lock().expect("should not poison");
        let n = self.read_span(buf, *pos, false)?;
        *pos += n as u64;
        Ok(n)
    }

    /// Moves the streaming offset. Seeking from the end has to know the
    /// final size, so it blocks until the producer closes.
    fn seek_stream(&self, target: io::SeekFrom) -> io::Result<u64> {
        let mut pos = self.pos.lock().expect("should not poison");
        let next = match target {
            io::SeekFrom::Start(offset) => offset,
            io::SeekFrom::Current(delta) => Self::shift(*pos, delta)?,
            io::SeekFrom::End(delta) => {
                match self.stream.broadcaster().wait(self.handle.id(), u64::MAX) {
                    WaitOutcome::EndOfStream => {}
                    WaitOutcome::Canceled => {
                        self.close_quietly();
                        return Err(StreamError::Canceled.into());
                    }
                    WaitOutcome::ReaderClosed => return Err(StreamError::ReaderClosed.into()),
                    WaitOutcome::Ready => unreachable!("no writable offset past u64::MAX"),
                }
                let (size, _) = self.stream.size();
                Self::shift(size, delta)?
            }
        };
        *pos = next;
        Ok(next)
    }

    #[inline(always)]
    fn shift(base: u64, delta: i64) -> io::Result<u64> {
        base.checked_add_signed(delta)
            .ok_or_else(|| StreamError::InvalidOffset.into())
    }

    /// A reader observing a cancel closes itself, so handles cannot leak
    /// when the caller ignores the error. The close result is replayed to
    /// an explicit `close` later, nothing is lost by dropping it here.
    fn close_quietly(&self) {
        if let Err(err) = self.close() {
            log::debug!("reader self-close failed: {err}");
        }
    }
}

impl<Fs: FileSystem> io::Read for Reader<'_, Fs> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf)
    }
}

impl<Fs: FileSystem> io::Read for &Reader<'_, Fs> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf)
    }
}

impl<Fs: FileSystem> io::Seek for Reader<'_, Fs> {
    #[inline(always)]
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.seek_stream(pos)
    }
}

impl<Fs: FileSystem> io::Seek for &Reader<'_, Fs> {
    #[inline(always)]
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.seek_stream(pos)
    }
}

impl<Fs: FileSystem> core::fmt::Debug for Reader<'_, Fs> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.handle.id())
            .field("stream", &self.stream.name())
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

impl<Fs: FileSystem> Drop for Reader<'_, Fs> {
    fn drop(&mut self) {
        if !self.handle.is_closed() {
            self.close_quietly();
        }
    }
}
