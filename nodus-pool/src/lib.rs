#![allow(dead_code)]

// The pool is one of the external collaborators named in §1: a slab-like
// allocator of receive-memory, opaque to everything above it. The queue and
// the handle graph only ever carry a [`Slice`] — an offset/length pair — never
// the bytes themselves; only `slice_release` and `recv`'s final copy-out touch
// a `Pool` directly.

use nodus_base::{Kind, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// An opaque range inside a pool. A queue entry points to one of these; the
/// bytes are only resolved by the device layer on `recv`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Slice {
    pub offset: usize,
    pub len: usize,
}

/// The narrow interface the core needs from the memory-backed receive pool.
/// Real implementations live outside this crate (mmap'd kernel buffers, etc.);
/// `MemPool` below is a reference implementation for tests and the
/// demonstration binary.
pub trait Pool: Send + Sync + std::fmt::Debug {
    fn capacity(&self) -> usize;
    fn used(&self) -> usize;
    fn alloc(&self, payload: &[u8]) -> Result<Slice>;
    fn read(&self, slice: Slice) -> Vec<u8>;
    fn release(&self, slice: Slice) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    buf: Vec<u8>,
    cursor: usize,
    live: BTreeMap<usize, usize>,
}

/// A fixed-capacity, in-process stand-in for the kernel-backed pool. Never
/// compacts freed space; sized generously by callers that churn through many
/// allocations (tests size it well past what a scenario will ever touch).
#[derive(Debug)]
pub struct MemPool {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemPool {
    pub fn new(capacity: usize) -> Self {
        MemPool {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Pool for MemPool {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.inner.lock().live.values().sum()
    }

    fn alloc(&self, payload: &[u8]) -> Result<Slice> {
        let mut inner = self.inner.lock();
        if inner.cursor + payload.len() > self.capacity {
            return Err(Kind::Oom.into());
        }
        let offset = inner.cursor;
        inner.buf.extend_from_slice(payload);
        inner.cursor += payload.len();
        inner.live.insert(offset, payload.len());
        Ok(Slice {
            offset,
            len: payload.len(),
        })
    }

    fn read(&self, slice: Slice) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.buf[slice.offset..slice.offset + slice.len].to_vec()
    }

    fn release(&self, slice: Slice) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.live.remove(&slice.offset) {
            Some(len) if len == slice.len => Ok(()),
            _ => Err(Kind::NoSuch.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_alloc_read_release_roundtrip() {
        let pool = MemPool::new(1024);
        let slice = pool.alloc(b"hello").unwrap();
        assert_eq!(pool.read(slice), b"hello");
        assert_eq!(pool.used(), 5);
        pool.release(slice).unwrap();
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_alloc_fails_past_capacity() {
        let pool = MemPool::new(4);
        assert!(pool.alloc(b"hello").is_err());
    }

    #[test]
    fn test_double_release_fails() {
        let pool = MemPool::new(64);
        let slice = pool.alloc(b"x").unwrap();
        pool.release(slice).unwrap();
        assert!(pool.release(slice).is_err());
    }
}
