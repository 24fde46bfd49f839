//! Coordination between one producer and many readers of a stream.
//!
//! The [`Broadcaster`] owns the authoritative state of a stream: its
//! lifecycle, the number of bytes published so far, the set of live readers
//! and the count of outstanding file handles. A single mutex protects all of
//! it, with two condition variables on top - one waking readers blocked at
//! the end of the data, one waking a shutdown blocked on handles draining.
//!
//! The locking discipline is strict: no user-visible IO ever runs under the
//! mutex (see [`Broadcaster::use_handle`]), readers drained by a cancel are
//! closed after the lock is released, and condition variables are notified
//! only after the guard is dropped, so woken threads do not immediately
//! block on the mutex again.

use core::cell::UnsafeCell;

use std::{
    collections::HashMap,
    io,
    sync::{atomic, Arc, Condvar, Mutex, MutexGuard, Once, RwLock},
};

use crate::{error::StreamError, io::File};

/// Where the stream is in its life.
///
/// Transitions are one-way: `Open` to `Closed` on a graceful close, and
/// anything to `Canceled`. Nothing leaves `Canceled`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    /// The producer is active and the stream may still grow.
    Open,
    /// The producer is done, the size is final.
    Closed,
    /// The stream was torn down, all reads fail.
    Canceled,
}

/// The outcome of a [`Broadcaster::wait`], telling a reader that woke up at
/// the end of the data what to do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WaitOutcome {
    /// The stream has grown or the wake was spurious, retry the read.
    Ready,
    /// The producer has closed and the offset is at or past the final size.
    EndOfStream,
    /// The stream has been canceled.
    Canceled,
    /// The waiting reader itself has been closed.
    ReaderClosed,
}

/// The state under the [`Broadcaster`] mutex.
#[derive(Debug)]
struct Shared<F> {
    lifecycle: Lifecycle,
    /// Bytes published so far. Monotone, grows only in `wrote`.
    size: u64,
    /// Live readers by id. A reader is in the map from the moment it is
    /// created until it is dropped or drained by a cancel.
    readers: HashMap<u64, Arc<ReaderHandle<F>>>,
    /// One-shot error latch. Once set, every new reader request fails with
    /// this error, and it never unsets.
    new_handle_err: Option<StreamError>,
    /// Outstanding file handles: one for the producer until the stream
    /// closes, plus one per live reader.
    handles: usize,
}

impl<F> Shared<F> {
    /// Moves the lifecycle forward, returning whether it changed. `Canceled`
    /// is terminal and wins over everything.
    fn transition(&mut self, target: Lifecycle) -> bool {
        if self.lifecycle == Lifecycle::Canceled || self.lifecycle == target {
            return false;
        }
        self.lifecycle = target;
        true
    }
}

/// The synchronization engine of a stream.
#[derive(Debug)]
pub(crate) struct Broadcaster<F> {
    shared: Mutex<Shared<F>>,
    /// Wakes readers sleeping in `wait`: on published bytes, on lifecycle
    /// transitions, and on a reader being dropped.
    progress: Condvar,
    /// Wakes `wait_for_zero_handles` when the handle count reaches zero.
    drained: Condvar,
    next_reader_id: atomic::AtomicU64,
}

impl<F: File> Broadcaster<F> {
    /// Creates a broadcaster for a fresh stream, accounting for the
    /// producer's own handle.
    pub fn new() -> Broadcaster<F> {
        Broadcaster {
            shared: Mutex::new(Shared {
                lifecycle: Lifecycle::Open,
                size: 0,
                readers: HashMap::new(),
                new_handle_err: None,
                handles: 1,
            }),
            progress: Condvar::new(),
            drained: Condvar::new(),
            next_reader_id: atomic::AtomicU64::new(1),
        }
    }

    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, Shared<F>> {
        self.shared.lock().expect("should not poison")
    }

    /// Blocks the reader `id` positioned at `offset` until the stream grows
    /// past that offset or reaches a terminal condition, and says which.
    ///
    /// The caller must loop on [`WaitOutcome::Ready`]: a wake only means the
    /// state moved, not that the retried read will succeed.
    pub fn wait(&self, id: u64, offset: u64) -> WaitOutcome {
        let mut shared = self.lock();
        while shared.lifecycle == Lifecycle::Open
            && offset >= shared.size
            && shared.readers.contains_key(&id)
        {
            shared = self.progress.wait(shared).expect("should not poison");
        }

        if shared.lifecycle == Lifecycle::Canceled {
            return WaitOutcome::Canceled;
        }
        if shared.lifecycle == Lifecycle::Closed && offset >= shared.size {
            return WaitOutcome::EndOfStream;
        }
        if !shared.readers.contains_key(&id) {
            return WaitOutcome::ReaderClosed;
        }
        WaitOutcome::Ready
    }

    /// Publishes `n` more bytes and wakes all blocked readers.
    pub fn wrote(&self, n: usize) {
        if n == 0 {
            return;
        }
        {
            let mut shared = self.lock();
            shared.size += n as u64;
        }
        self.progress.notify_all();
    }

    /// Ends the stream gracefully and releases the producer's handle. Must
    /// be called exactly once, which the stream's close latch guarantees.
    pub fn close(&self) {
        let (transitioned, drained) = {
            let mut shared = self.lock();
            let transitioned = shared.transition(Lifecycle::Closed);
            shared.handles -= 1;
            (transitioned, shared.handles == 0)
        };
        if transitioned {
            self.progress.notify_all();
        }
        if drained {
            self.drained.notify_all();
        }
    }

    /// Tears the stream down: flips the lifecycle to `Canceled`, latches the
    /// new-handle error, and closes every live reader. Readers are drained
    /// under the lock but closed outside of it, and their per-drop wake-up
    /// is suppressed in favor of the single notification here.
    pub fn cancel(&self) {
        let drained: Vec<_> = {
            let mut shared = self.lock();
            shared.transition(Lifecycle::Canceled);
            if shared.new_handle_err.is_none() {
                shared.new_handle_err = Some(StreamError::Canceled);
            }
            shared.readers.drain().map(|(_, handle)| handle).collect()
        };
        self.progress.notify_all();

        for handle in drained {
            if let Err(err) = handle.close(self) {
                log::debug!("reader {}: close on cancel failed: {err}", handle.id);
            }
        }
    }

    /// Latches `err` as the answer to every future reader request. Existing
    /// handles keep working, the lifecycle does not change.
    pub fn prevent_new_handles(&self, err: StreamError) {
        let mut shared = self.lock();
        if shared.new_handle_err.is_none() {
            shared.new_handle_err = Some(err);
        }
    }

    /// Blocks until the producer and every reader have released their
    /// handles.
    pub fn wait_for_zero_handles(&self) {
        let mut shared = self.lock();
        while shared.handles > 0 {
            shared = self.drained.wait(shared).expect("should not poison");
        }
    }

    /// Runs `read` against the underlying file, unless the stream has been
    /// canceled. The read itself runs outside the lock - it may block on
    /// disk and must not starve the producer or the other readers.
    pub fn use_handle<T>(&self, read: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        {
            let shared = self.lock();
            if shared.lifecycle == Lifecycle::Canceled {
                return Err(StreamError::Canceled.into());
            }
        }
        read()
    }

    /// Returns the published size and whether it is final.
    ///
    /// The flag reports a graceful close only. A canceled stream is not
    /// "closed": its readers fail rather than drain.
    pub fn size(&self) -> (u64, bool) {
        let shared = self.lock();
        (shared.size, shared.lifecycle == Lifecycle::Closed)
    }

    /// Whether the stream has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.lock().lifecycle == Lifecycle::Canceled
    }

    /// Admits a new reader: checks the new-handle latch, accounts for the
    /// handle, opens the underlying file via `open`, and only then exposes
    /// the reader to lifecycle events by inserting it into the live set.
    ///
    /// # Errors
    ///
    /// Returns the latched error if new handles are no longer allowed, or
    /// the error of `open`, in which case the handle count is rolled back.
    pub fn new_reader(&self, open: impl FnOnce() -> io::Result<F>) -> io::Result<Arc<ReaderHandle<F>>> {
        {
            let mut shared = self.lock();
            if let Some(err) = shared.new_handle_err {
                return Err(err.into());
            }
            shared.handles += 1;
        }

        let file = match open() {
            Ok(file) => file,
            Err(err) => {
                self.drop_handle();
                return Err(err);
            }
        };

        let handle = Arc::new(ReaderHandle {
            id: self.next_reader_id.fetch_add(1, atomic::Ordering::Relaxed),
            file: RwLock::new(file),
            closed: OnceStatus::new(),
        });
        let mut shared = self.lock();
        shared.readers.insert(handle.id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Removes the reader `id` from the live set and releases its handle.
    ///
    /// Wakes the remaining waiters so that a wait blocked on `id` itself
    /// notices the removal - unless the stream is canceled, where the single
    /// broadcast of [`Broadcaster::cancel`] already covers every reader and
    /// a per-drop wake would pile up with one wake per drained reader.
    fn drop_reader(&self, id: u64) {
        let (canceled, drained) = {
            let mut shared = self.lock();
            shared.readers.remove(&id);
            shared.handles -= 1;
            (
                shared.lifecycle == Lifecycle::Canceled,
                shared.handles == 0,
            )
        };
        if drained {
            self.drained.notify_all();
        }
        if !canceled {
            self.progress.notify_all();
        }
    }

    /// Releases a handle that never made it into the live set.
    fn drop_handle(&self) {
        let drained = {
            let mut shared = self.lock();
            shared.handles -= 1;
            shared.handles == 0
        };
        if drained {
            self.drained.notify_all();
        }
    }
}

/// The closable core of a reader: its file handle, identity, and close
/// latch. Shared between the reader object the caller holds and the live
/// set, so that a cancel can close readers the caller never touches.
#[derive(Debug)]
pub(crate) struct ReaderHandle<F> {
    id: u64,
    /// The read-write latch around the file: positional reads share it,
    /// close takes it exclusively and thereby waits out in-flight reads.
    file: RwLock<F>,
    closed: OnceStatus,
}

impl<F: File> ReaderHandle<F> {
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the close latch has fired.
    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed.done()
    }

    /// Reads from the file at `offset` under the shared side of the latch.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered, or if the file
    /// handle has been closed.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file
            .read()
            .expect("should not poison")
            .read_at(buf, offset)
    }

    /// Returns the name of the underlying file.
    pub fn name(&self) -> String {
        self.file.read().expect("should not poison").name().to_owned()
    }

    /// Closes the file handle and leaves the live set, exactly once. Later
    /// calls replay the first result.
    ///
    /// # Errors
    ///
    /// An error is returned if closing the underlying file fails.
    pub fn close(&self, broadcaster: &Broadcaster<F>) -> io::Result<()> {
        self.closed.call(|| {
            let result = self.file.write().expect("should not poison").close();
            broadcaster.drop_reader(self.id);
            result
        })
    }
}

/// A one-shot latch capturing the result of its first call.
///
/// Later calls do not run their closure and instead replay the captured
/// status. Concurrent callers block until the first call completes, so a
/// replayed result is never ahead of the real one.
#[derive(Debug)]
pub(crate) struct OnceStatus {
    once: Once,
    status: UnsafeCell<Option<io::Error>>,
}

// SAFETY: The status slot is written only inside `Once::call_once` and read
// only after the once has completed, which establishes the necessary
// happens-before edge.
unsafe impl Sync for OnceStatus {}

impl OnceStatus {
    pub fn new() -> OnceStatus {
        OnceStatus {
            once: Once::new(),
            status: UnsafeCell::new(None),
        }
    }

    /// Whether the first call has completed.
    #[inline(always)]
    pub fn done(&self) -> bool {
        self.once.is_completed()
    }

    /// Runs `f` if this is the first call, capturing its result. Replays
    /// the captured result otherwise.
    ///
    /// # Errors
    ///
    /// The error of the first call, replayed with the same kind and message
    /// on every later call.
    pub fn call(&self, f: impl FnOnce() -> io::Result<()>) -> io::Result<()> {
        self.once.call_once(|| {
            if let Err(err) = f() {
                // SAFETY: Exclusive access is guaranteed by the once.
                unsafe { *self.status.get() = Some(err) };
            }
        });
        // SAFETY: The once has completed and the slot is never written again.
        match unsafe { &*self.status.get() } {
            None => Ok(()),
            Some(err) => Err(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    /// A file stub for driving the broadcaster directly.
    #[derive(Debug, Default)]
    struct NullFile;

    impl File for NullFile {
        fn name(&self) -> &str {
            "null"
        }
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reader(b: &Broadcaster<NullFile>) -> Arc<ReaderHandle<NullFile>> {
        b.new_reader(|| Ok(NullFile)).expect("new reader")
    }

    #[test]
    fn wait_wakes_on_wrote() {
        let b = Broadcaster::new();
        let handle = reader(&b);

        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(b.wait(handle.id(), 0), WaitOutcome::Ready);
                assert_eq!(b.wait(handle.id(), 5), WaitOutcome::Ready);
            });
            thread::sleep(Duration::from_millis(50));
            b.wrote(5);
            thread::sleep(Duration::from_millis(50));
            b.wrote(1);
        });
        assert_eq!(b.size(), (6, false));
    }

    #[test]
    fn wait_classifies_close_and_cancel() {
        let b = Broadcaster::new();
        let handle = reader(&b);
        b.wrote(3);

        let case = "close at the end of data";
        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(b.wait(handle.id(), 3), WaitOutcome::EndOfStream, "{case}");
            });
            thread::sleep(Duration::from_millis(50));
            b.close();
        });
        assert_eq!(b.size(), (3, true), "{case}");

        let case = "close with data left to read is ready";
        assert_eq!(b.wait(handle.id(), 0), WaitOutcome::Ready, "{case}");

        let case = "cancel wins over close";
        b.cancel();
        assert_eq!(b.wait(handle.id(), 0), WaitOutcome::Canceled, "{case}");
        assert_eq!(b.size(), (3, false), "{case}");
    }

    #[test]
    fn wait_notices_own_drop() {
        let b = Broadcaster::new();
        let handle = reader(&b);

        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(b.wait(handle.id(), 0), WaitOutcome::ReaderClosed);
            });
            thread::sleep(Duration::from_millis(50));
            handle.close(&b).expect("close");
        });
    }

    #[test]
    fn cancel_drains_and_releases_handles() {
        let b = Broadcaster::new();
        let handles: Vec<_> = (0..10).map(|_| reader(&b)).collect();

        b.cancel();
        for handle in &handles {
            assert!(handle.is_closed(), "drained readers are closed");
        }

        let case = "new readers fail after cancel";
        let err = b.new_reader(|| Ok(NullFile)).expect_err(case);
        assert_eq!(StreamError::from_io(&err), Some(StreamError::Canceled), "{case}");

        // All handles drain once the producer closes. Deadlocks here if a
        // drained reader failed to release its handle.
        b.close();
        b.wait_for_zero_handles();
    }

    #[test]
    fn new_handle_latch_keeps_first_error() {
        let b = Broadcaster::<NullFile>::new();
        b.prevent_new_handles(StreamError::Removing);
        b.cancel();

        let case = "the first latched error sticks";
        let err = b.new_reader(|| Ok(NullFile)).expect_err(case);
        assert_eq!(StreamError::from_io(&err), Some(StreamError::Removing), "{case}");
    }

    #[test]
    fn new_reader_rolls_back_on_open_failure() {
        let b = Broadcaster::<NullFile>::new();
        let err = b
            .new_reader(|| Err(io::Error::new(io::ErrorKind::NotFound, "nope")))
            .expect_err("open failure propagates");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        // Only the producer handle remains, so a close must drain.
        b.close();
        b.wait_for_zero_handles();
    }

    #[test]
    fn use_handle_short_circuits_when_canceled() {
        let b = Broadcaster::<NullFile>::new();
        assert_eq!(b.use_handle(|| Ok(7)).expect("open stream reads"), 7);

        b.cancel();
        let err = b.use_handle(|| Ok(7)).expect_err("canceled stream reads");
        assert_eq!(StreamError::from_io(&err), Some(StreamError::Canceled));
    }

    #[test]
    fn once_status_replays_first_result() {
        let status = OnceStatus::new();
        assert!(!status.done());

        let case = "first call runs and fails";
        let err = status
            .call(|| Err(io::Error::new(io::ErrorKind::AlreadyExists, "first")))
            .expect_err(case);
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists, "{case}");

        let case = "later calls replay without running";
        let err = status
            .call(|| panic!("should not run"))
            .expect_err(case);
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists, "{case}");
        assert_eq!(err.to_string(), "first", "{case}");
        assert!(status.done(), "{case}");
    }
}
