//! Per-track byte buffer pool
//!
//! Buffers are bucketed by power-of-two capacity (2 B .. 128 KiB). Frames hand
//! their pooled blocks back on reset; a block still referenced by a reader is
//! simply left to the allocator.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Number of size classes (2^1 ..= 2^17)
pub const SIZE_CLASSES: usize = 17;

/// Largest pooled capacity
pub const MAX_POOLED: usize = 1 << SIZE_CLASSES;

/// Blocks kept per bucket before extra ones are released
const BUCKET_DEPTH: usize = 64;

/// Bucketed pool of reusable `BytesMut` blocks
#[derive(Debug)]
pub struct BytesPool {
    buckets: [Mutex<Vec<BytesMut>>; SIZE_CLASSES],
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl BytesPool {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Mutex::new(Vec::new())),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Bucket index whose capacity can hold `size` bytes
    fn class_for(size: usize) -> Option<usize> {
        if size > MAX_POOLED {
            return None;
        }
        let cap = size.max(2).next_power_of_two();
        Some(cap.trailing_zeros() as usize - 1)
    }

    /// Get an empty buffer with capacity for at least `size` bytes
    ///
    /// Oversized requests bypass the pool.
    pub fn get(&self, size: usize) -> BytesMut {
        let Some(class) = Self::class_for(size) else {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            return BytesMut::with_capacity(size);
        };

        if let Some(mut buf) = self.buckets[class].lock().pop() {
            buf.clear();
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(1 << (class + 1))
    }

    /// Return a buffer to its bucket
    pub fn put(&self, mut buf: BytesMut) {
        let cap = buf.capacity();
        if !(2..=MAX_POOLED).contains(&cap) {
            return;
        }
        // floor class: every block in bucket N holds at least 2^(N+1) bytes
        let class = cap.ilog2() as usize - 1;
        buf.clear();
        let mut bucket = self.buckets[class].lock();
        if bucket.len() < BUCKET_DEPTH {
            bucket.push(buf);
        }
    }

    /// Try to reclaim a frozen block; succeeds only when nobody else holds it
    pub fn recycle(&self, bytes: Bytes) {
        if let Ok(buf) = bytes.try_into_mut() {
            self.put(buf);
        }
    }

    /// Copy `data` into a pooled block
    pub fn copy_from(&self, data: &[u8]) -> Bytes {
        let mut buf = self.get(data.len());
        buf.extend_from_slice(data);
        buf.freeze()
    }

    /// Number of fresh allocations served
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of requests served from a bucket
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}

impl Default for BytesPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_classes() {
        assert_eq!(BytesPool::class_for(0), Some(0));
        assert_eq!(BytesPool::class_for(2), Some(0));
        assert_eq!(BytesPool::class_for(3), Some(1));
        assert_eq!(BytesPool::class_for(1024), Some(9));
        assert_eq!(BytesPool::class_for(MAX_POOLED), Some(16));
        assert_eq!(BytesPool::class_for(MAX_POOLED + 1), None);
    }

    #[test]
    fn test_get_put_reuses_block() {
        let pool = BytesPool::new();
        let mut buf = pool.get(100);
        assert!(buf.capacity() >= 128);
        buf.extend_from_slice(&[1, 2, 3]);
        pool.put(buf);

        let again = pool.get(120);
        assert!(again.is_empty());
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_recycle_shared_block_is_skipped() {
        let pool = BytesPool::new();
        let frozen = pool.copy_from(&[9u8; 10]);
        let held = frozen.clone();
        pool.recycle(frozen);
        assert_eq!(held.len(), 10);

        let _ = pool.get(10);
        assert_eq!(pool.reused(), 0);
    }

    #[test]
    fn test_recycle_unique_block() {
        let pool = BytesPool::new();
        let frozen = pool.copy_from(&[7u8; 10]);
        pool.recycle(frozen);
        let _ = pool.get(16);
        assert_eq!(pool.reused(), 1);
    }

    #[test]
    fn test_oversized_bypasses_pool() {
        let pool = BytesPool::new();
        let buf = pool.get(MAX_POOLED * 2);
        assert!(buf.capacity() >= MAX_POOLED * 2);
        pool.put(buf);
        let _ = pool.get(MAX_POOLED * 2);
        assert_eq!(pool.reused(), 0);
    }
}
