#![cfg(feature = "io-filesystem")]

use std::{
    fs,
    io::{self, Read},
    thread,
    time::Duration,
};

use tailstream::{io::OsFs, Stream, StreamError};
use tempfile::TempDir;

#[test]
fn disk_stream_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("round_trip.txt");
    let name = path.to_str().expect("utf-8 path");

    let stream = Stream::create(name).expect("create");
    assert_eq!(stream.name(), name);

    let reader = stream.new_reader().expect("new reader");
    thread::scope(|s| {
        s.spawn(|| {
            let case = "reader drains everything the producer writes";
            let mut by_ref = &reader;
            let mut data = Vec::new();
            by_ref.read_to_end(&mut data).expect(case);
            assert_eq!(data, b"hello world".repeat(100), "{case}");
        });
        for _ in 0..100 {
            stream.write(b"hello world").expect("write");
        }
        stream.close().expect("close");
    });

    let case = "the bytes are on disk";
    assert_eq!(fs::read(&path).expect(case), b"hello world".repeat(100), "{case}");

    let case = "size is final";
    assert_eq!(stream.size(), (1100, true), "{case}");
}

#[test]
fn disk_stream_late_reader() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("late.txt");
    let name = path.to_str().expect("utf-8 path");

    let stream = Stream::with_fs(name, OsFs).expect("create");
    stream.write(b"Hello").expect("write");
    stream.close().expect("close");

    let case = "a reader opened after close reads from disk";
    let reader = stream.new_reader().expect(case);
    let mut by_ref = &reader;
    let mut data = String::new();
    by_ref.read_to_string(&mut data).expect(case);
    assert_eq!(data, "Hello", "{case}");
}

#[test]
fn disk_positional_read_waits_for_data() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("wait.txt");
    let name = path.to_str().expect("utf-8 path");

    let stream = Stream::create(name).expect("create");
    let reader = stream.new_reader().expect("new reader");
    stream.write(b"hello").expect("write");

    thread::scope(|s| {
        s.spawn(|| {
            let case = "read at blocks until the requested span is on disk";
            let mut buf = [0u8; 11];
            assert_eq!(reader.read_at(&mut buf, 0).expect(case), 11, "{case}");
            assert_eq!(&buf, b"hello world", "{case}");
        });
        thread::sleep(Duration::from_millis(100));
        stream.write(b" world").expect("write");
        stream.close().expect("close");
    });
}

#[test]
fn disk_stream_remove_deletes_the_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("remove.txt");
    let name = path.to_str().expect("utf-8 path");

    let stream = Stream::create(name).expect("create");
    stream.write(b"Hello").expect("write");
    stream.close().expect("close");

    stream.remove().expect("remove");
    assert!(!path.exists(), "remove deletes the file");

    let case = "a second remove reports the missing file";
    let err = stream.remove().expect_err(case);
    assert_eq!(err.kind(), io::ErrorKind::NotFound, "{case}");
}

#[test]
fn disk_stream_cancel_keeps_the_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("cancel.txt");
    let name = path.to_str().expect("utf-8 path");

    let stream = Stream::create(name).expect("create");
    stream.write(b"Hello").expect("write");
    let reader = stream.new_reader().expect("new reader");
    stream.cancel().expect("cancel");

    let case = "reads fail after cancel";
    let mut buf = [0u8; 1];
    let err = reader.read_at(&mut buf, 0).expect_err(case);
    assert_eq!(
        StreamError::from_io(&err),
        Some(StreamError::Canceled),
        "{case}"
    );

    let case = "cancel does not delete the file";
    assert!(path.exists(), "{case}");
}

#[test]
fn disk_stream_create_errors_propagate() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("no-such-dir").join("file.txt");

    let case = "creating under a missing directory fails";
    Stream::create(path.to_str().expect("utf-8 path")).expect_err(case);
}
