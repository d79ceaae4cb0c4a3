//! Bounded byte queue
//!
//! A fixed-capacity ring buffer used to hand bytes between exactly one
//! producer thread and one consumer thread. Writers block while the queue is
//! full, which is the only backpressure point between the pty and the
//! emulator. Closing the queue wakes every blocked caller.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Default capacity for both session queues
pub const DEFAULT_CAPACITY: usize = 4096;

/// Returned by every queue operation once the queue has been closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("byte queue is closed")]
pub struct QueueClosed;

/// Ring storage guarded by the queue mutex
#[derive(Debug)]
struct Ring {
    buffer: Box<[u8]>,
    /// Index of the oldest stored byte
    head: usize,
    /// Number of stored bytes
    len: usize,
    open: bool,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Copy as much of `data` as fits, returning the number of bytes stored
    fn push(&mut self, data: &[u8]) -> usize {
        let capacity = self.capacity();
        let count = data.len().min(self.free());
        let tail = (self.head + self.len) % capacity;

        let first = count.min(capacity - tail);
        self.buffer[tail..tail + first].copy_from_slice(&data[..first]);
        let second = count - first;
        if second > 0 {
            self.buffer[..second].copy_from_slice(&data[first..count]);
        }

        self.len += count;
        count
    }

    /// Move up to `out.len()` bytes into `out`, returning the number moved
    fn pop(&mut self, out: &mut [u8]) -> usize {
        let capacity = self.capacity();
        let count = out.len().min(self.len);

        let first = count.min(capacity - self.head);
        out[..first].copy_from_slice(&self.buffer[self.head..self.head + first]);
        let second = count - first;
        if second > 0 {
            out[first..count].copy_from_slice(&self.buffer[..second]);
        }

        self.head = (self.head + count) % capacity;
        self.len -= count;
        count
    }
}

/// A bounded single-producer single-consumer byte queue
#[derive(Debug)]
pub struct ByteQueue {
    ring: Mutex<Ring>,
    /// Signalled whenever bytes are added, removed, or the queue closes
    changed: Condvar,
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ByteQueue {
    /// Create an open queue holding at most `capacity` bytes
    ///
    /// A capacity of zero is bumped to one so the queue can make progress.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                buffer: vec![0u8; capacity.max(1)].into_boxed_slice(),
                head: 0,
                len: 0,
                open: true,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // Ring state stays consistent across a panic in another holder
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Maximum number of bytes the queue can hold
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of bytes currently queued
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Whether no bytes are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        !self.lock().open
    }

    /// Write bytes into the queue
    ///
    /// With `allow_partial`, the call returns as soon as at least one byte has
    /// been stored. Without it, the call keeps waiting for room until all of
    /// `data` has been stored, even when `data` is larger than the capacity.
    /// Either way the call blocks while the queue is full.
    pub fn write(&self, data: &[u8], allow_partial: bool) -> Result<usize, QueueClosed> {
        let mut ring = self.lock();
        let mut written = 0;

        while written < data.len() {
            while ring.open && ring.free() == 0 {
                ring = self.changed.wait(ring).unwrap_or_else(|e| e.into_inner());
            }
            if !ring.open {
                return Err(QueueClosed);
            }

            written += ring.push(&data[written..]);
            self.changed.notify_all();

            if allow_partial {
                break;
            }
        }

        Ok(written)
    }

    /// Read bytes from the queue into `out`
    ///
    /// When the queue is empty, a blocking read waits for data or close while
    /// a non-blocking read returns `Ok(0)`.
    pub fn read(&self, out: &mut [u8], block: bool) -> Result<usize, QueueClosed> {
        let mut ring = self.lock();

        while ring.open && ring.len == 0 {
            if !block {
                return Ok(0);
            }
            ring = self.changed.wait(ring).unwrap_or_else(|e| e.into_inner());
        }
        if !ring.open {
            return Err(QueueClosed);
        }

        let n = ring.pop(out);
        if n > 0 {
            self.changed.notify_all();
        }
        Ok(n)
    }

    /// Close the queue, waking all blocked callers
    ///
    /// Buffered bytes are discarded. Closing twice is harmless.
    pub fn close(&self) {
        let mut ring = self.lock();
        if ring.open {
            ring.open = false;
            ring.len = 0;
        }
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;

    #[test]
    fn test_write_then_read() {
        let queue = ByteQueue::new(16);
        assert_eq!(queue.write(b"hello", false), Ok(5));
        assert_eq!(queue.len(), 5);

        let mut buf = [0u8; 16];
        assert_eq!(queue.read(&mut buf, false), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_blocking_read_on_empty() {
        let queue = ByteQueue::new(8);
        let mut buf = [0u8; 8];
        assert_eq!(queue.read(&mut buf, false), Ok(0));
    }

    #[test]
    fn test_wraparound() {
        let queue = ByteQueue::new(8);
        let mut buf = [0u8; 8];

        queue.write(b"abcdef", false).unwrap();
        assert_eq!(queue.read(&mut buf[..4], false), Ok(4));
        assert_eq!(&buf[..4], b"abcd");

        // Tail wraps past the end of the buffer
        assert_eq!(queue.write(b"ghijkl", false), Ok(6));
        assert_eq!(queue.len(), 8);

        assert_eq!(queue.read(&mut buf, false), Ok(8));
        assert_eq!(&buf, b"efghijkl");
    }

    #[test]
    fn test_partial_write_stops_when_full() {
        let queue = ByteQueue::new(4);
        assert_eq!(queue.write(b"abcdef", true), Ok(4));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_read_smaller_buffer() {
        let queue = ByteQueue::new(8);
        queue.write(b"abcdef", false).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(queue.read(&mut buf, false), Ok(2));
        assert_eq!(&buf, b"ab");
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = ByteQueue::new(8);
        queue.close();
        queue.close();
        assert!(queue.is_closed());

        let mut buf = [0u8; 8];
        assert_eq!(queue.read(&mut buf, true), Err(QueueClosed));
        assert_eq!(queue.read(&mut buf, false), Err(QueueClosed));
        assert_eq!(queue.write(b"x", true), Err(QueueClosed));
    }

    #[test]
    fn test_close_discards_buffered_bytes() {
        let queue = ByteQueue::new(8);
        queue.write(b"abc", false).unwrap();
        queue.close();

        let mut buf = [0u8; 8];
        assert_eq!(queue.read(&mut buf, false), Err(QueueClosed));
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let queue = Arc::new(ByteQueue::new(8));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                queue.read(&mut buf, true)
            })
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(reader.join().unwrap(), Err(QueueClosed));
    }

    #[test]
    fn test_close_wakes_blocked_writer() {
        let queue = Arc::new(ByteQueue::new(4));
        queue.write(b"full", false).unwrap();

        let writer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.write(b"more", false))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(writer.join().unwrap(), Err(QueueClosed));
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let queue = Arc::new(ByteQueue::new(8));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                let n = queue.read(&mut buf, true).unwrap();
                buf[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.write(b"ping", false).unwrap();

        assert_eq!(reader.join().unwrap(), b"ping");
    }

    #[test]
    fn test_full_write_larger_than_capacity() {
        let queue = Arc::new(ByteQueue::new(4));
        let payload: Vec<u8> = (0..64u8).collect();

        let writer = {
            let queue = Arc::clone(&queue);
            let payload = payload.clone();
            thread::spawn(move || queue.write(&payload, false))
        };

        let mut received = Vec::new();
        let mut buf = [0u8; 3];
        while received.len() < payload.len() {
            let n = queue.read(&mut buf, true).unwrap();
            received.extend_from_slice(&buf[..n]);
        }

        assert_eq!(writer.join().unwrap(), Ok(64));
        assert_eq!(received, payload);
    }

    proptest! {
        #[test]
        fn prop_interleaved_preserves_order(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..32),
            reads in prop::collection::vec(1usize..24, 0..32),
        ) {
            let queue = ByteQueue::new(16);
            let mut written = Vec::new();
            let mut read = Vec::new();
            let mut buf = [0u8; 32];

            for (i, chunk) in chunks.iter().enumerate() {
                // Never exceed capacity so no call blocks
                let room = queue.capacity() - queue.len();
                let take = chunk.len().min(room);
                let n = queue.write(&chunk[..take], true).unwrap();
                written.extend_from_slice(&chunk[..n]);

                if let Some(&want) = reads.get(i) {
                    let n = queue.read(&mut buf[..want], false).unwrap();
                    read.extend_from_slice(&buf[..n]);
                }
            }

            loop {
                let n = queue.read(&mut buf, false).unwrap();
                if n == 0 {
                    break;
                }
                read.extend_from_slice(&buf[..n]);
            }

            prop_assert_eq!(read, written);
        }
    }
}
