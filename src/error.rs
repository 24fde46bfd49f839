//! The stable error surface of a stream.

use std::io;

use thiserror::Error;

/// An error specific to a [`Stream`](crate::Stream) or one of its readers.
///
/// Values of this type travel inside [`io::Error`] with the kind set to
/// [`io::ErrorKind::Other`], so the usual `io::Result` plumbing applies.
/// Use [`StreamError::from_io`] to tell the kinds apart, e.g. to distinguish
/// a canceled stream from a reader that was closed from another thread.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Error)]
pub enum StreamError {
    /// The stream has been canceled. Returned by pending and future reads,
    /// and by any attempt to create a new reader.
    #[error("stream: stream has been canceled")]
    Canceled,
    /// A new reader was requested after a remove has been initiated.
    #[error("stream: cannot open a new reader while removing")]
    Removing,
    /// The reader has been closed and can serve no further reads.
    #[error("stream: reader has been closed")]
    ReaderClosed,
    /// A seek resolved to a negative or overflowing offset.
    #[error("stream: invalid seek to a negative or overflowing offset")]
    InvalidOffset,
    /// The operation is not supported by the backing file system. Returned
    /// when removing an anonymous in-memory stream, which has no file system
    /// to delete it from.
    #[error("stream: operation is not supported by this file system")]
    Unsupported,
}

impl StreamError {
    /// Extracts a `StreamError` from an [`io::Error`], if the error carries
    /// one. IO errors coming from the storage backend return [`None`].
    #[must_use]
    pub fn from_io(err: &io::Error) -> Option<StreamError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
            .copied()
    }
}

impl From<StreamError> for io::Error {
    #[inline(always)]
    fn from(value: StreamError) -> io::Error {
        io::Error::new(io::ErrorKind::Other, value)
    }
}
