//! A concurrent single-writer, multi-reader byte stream over named files.
//!
//! One producer appends bytes to a named file through a [`Stream`], while any
//! number of independent [`Reader`]s consume those bytes concurrently. Each
//! reader keeps its own position and sees the complete stream from offset 0,
//! no matter whether it was created before, during, or after writing. A read
//! past the current end blocks until more data arrives or the producer is
//! done, which makes the stream behave like a broadcast pipe with replay.
//!
//! The storage is pluggable: a stream is built over a [`io::FileSystem`],
//! which hands out one writable handle for the producer and an independent
//! readable handle per reader. Two backends are included - regular files via
//! [`io::OsFs`] and an in-memory one via [`io::MemFs`]. A stream can also
//! live entirely in an anonymous buffer, see [`Stream::in_memory`].
//!
//! Lifecycle is explicit: [`Stream::close`] ends the stream gracefully and
//! readers drain to the end, [`Stream::cancel`] tears it down and fails all
//! pending and future reads, and [`Stream::remove`] waits for every handle
//! to be released before deleting the backing file. The error kinds these
//! paths produce are distinguishable via [`StreamError`].
//!
//! # Features
//!
//! This library aims to be minimal, hence functionality which is not part of
//! the core implementation sits behind [Cargo features][features] for
//! conditional compilation. The following features are available:
//! -   `io-filesystem` (default) - includes the storage backend over regular
//!     files in a generic filesystem.
//!
//! [features]: https://doc.rust-lang.org/cargo/reference/features.html
//!
//! # Examples
//!
//! ```
//! use std::io::{self, Read};
//!
//! use tailstream::Stream;
//!
//! fn main() -> io::Result<()> {
//!     let stream = Stream::in_memory();
//!     stream.write(b"hello")?;
//!     stream.close()?;
//!
//!     let mut reader = stream.new_reader()?;
//!     let mut data = String::new();
//!     reader.read_to_string(&mut data)?;
//!     assert_eq!(data, "hello");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
pub mod io;
mod reader;
mod stream;
mod sync;

pub use error::StreamError;
pub use reader::Reader;
pub use stream::Stream;
