//! The single writer of a ring

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use super::pool::SlotPool;
use super::slot::{RingValue, Slot};
use super::{RingHandle, RingShared};
use crate::config::RingConfig;

/// Owns the ring topology and the slot being written
///
/// Dropping the writer closes the ring: links are broken and every waiting
/// reader wakes up to [`Error::TrackClosed`](crate::Error::TrackClosed).
#[derive(Debug)]
pub struct RingWriter<T: RingValue> {
    shared: Arc<RingShared<T>>,
    /// Slot currently being written
    head: Arc<Slot<T>>,
    size: usize,
    min_size: usize,
    max_size: usize,
    /// Slots that must not be overwritten (latest IDR, history start)
    protected: Vec<Arc<Slot<T>>>,
}

impl<T: RingValue> RingWriter<T> {
    pub fn new(size: usize, config: &RingConfig) -> Self {
        let size = size.max(2);
        let shared = Arc::new(RingShared {
            latest: RwLock::new(None),
            readers: AtomicUsize::new(0),
            size: AtomicUsize::new(size),
            discards: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            pool: SlotPool::new(config.pool_size),
        });

        let head = Slot::new();
        let mut tail = head.clone();
        for _ in 1..size {
            let slot = Slot::new();
            tail.set_next(Some(slot.clone()));
            tail = slot;
        }
        tail.set_next(Some(head.clone()));
        head.try_start_write(0);

        Self {
            shared,
            head,
            size,
            min_size: config.min_size.min(size),
            max_size: config.max_size.max(size),
            protected: Vec::new(),
        }
    }

    /// Read-side handle for creating readers
    pub fn handle(&self) -> RingHandle<T> {
        RingHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Mutable access to the frame being written
    pub fn value(&self) -> RwLockWriteGuard<'_, T> {
        self.head.write()
    }

    /// Sequence the frame being written will carry
    pub fn sequence(&self) -> u32 {
        self.head.sequence()
    }

    /// The slot being written
    pub fn current(&self) -> &Arc<Slot<T>> {
        &self.head
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Clear the frame in progress without publishing it
    pub fn discard_current(&self) {
        self.head.write().reset();
    }

    /// Publish the current slot and move to the next one
    ///
    /// Returns the slot just published. A next slot held by a reader is cut
    /// out and replaced; a protected next slot makes the ring grow instead.
    pub fn step(&mut self) -> Arc<Slot<T>> {
        let published = Arc::clone(&self.head);
        let sequence = published.sequence().wrapping_add(1);
        published.finish_write();
        *self.shared.latest.write() = Some(Arc::clone(&published));

        loop {
            let next = self.successor();

            if self.is_protected(&next) {
                if self.size < self.max_size {
                    self.grow(self.size.min(self.max_size - self.size));
                    continue;
                }
                tracing::warn!(
                    size = self.size,
                    sequence = next.sequence(),
                    "ring at max size, overwriting retained frame"
                );
                self.protected.retain(|p| !Arc::ptr_eq(p, &next));
            }

            if next.try_start_write(sequence) {
                self.head = next;
                return published;
            }

            // a reader still holds it: cut it out
            let fresh = self.shared.pool.get();
            fresh.set_next(next.next());
            self.head.set_next(Some(Arc::clone(&fresh)));
            next.discard(fresh);
            let discards = self.shared.discards.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                sequence = next.sequence(),
                readers = next.readers(),
                discards,
                "slow reader, slot discarded"
            );
            if self.size < self.max_size {
                self.grow(self.size.min(self.max_size - self.size));
            }
        }
    }

    /// Next slot after the head, repairing a broken link if needed
    fn successor(&mut self) -> Arc<Slot<T>> {
        if let Some(next) = self.head.next() {
            return next;
        }
        tracing::error!("ring link missing, relinking head");
        let fresh = self.shared.pool.get();
        fresh.set_next(Some(Arc::clone(&self.head)));
        self.head.set_next(Some(Arc::clone(&fresh)));
        self.size = 2;
        self.shared.size.store(2, Ordering::Release);
        fresh
    }

    /// Insert `count` fresh slots right after the head
    pub fn grow(&mut self, count: usize) {
        for _ in 0..count {
            let slot = self.shared.pool.get();
            slot.set_next(self.head.next());
            self.head.set_next(Some(slot));
        }
        self.size += count;
        self.shared.size.store(self.size, Ordering::Release);
        tracing::debug!(size = self.size, added = count, "ring grown");
    }

    /// Remove idle slots after the head until `target` remain
    ///
    /// Stops at the first slot that is protected, held, or referenced from
    /// outside the ring. Returns the number of slots removed.
    pub fn shrink(&mut self, target: usize) -> usize {
        let target = target.max(self.min_size);
        let mut removed = 0;
        while self.size > target {
            let Some(candidate) = self.head.next() else {
                break;
            };
            // the ring link plus our clone
            if self.is_protected(&candidate)
                || candidate.readers() > 0
                || Arc::strong_count(&candidate) > 2
            {
                break;
            }
            self.head.set_next(candidate.take_next());
            self.shared.pool.put(candidate);
            self.size -= 1;
            removed += 1;
        }
        if removed > 0 {
            self.shared.size.store(self.size, Ordering::Release);
            tracing::debug!(size = self.size, removed, "ring shrunk");
        }
        removed
    }

    /// Replace the set of slots the writer must not overwrite
    pub fn protect<I>(&mut self, slots: I)
    where
        I: IntoIterator<Item = Arc<Slot<T>>>,
    {
        self.protected = slots.into_iter().collect();
    }

    pub fn is_protected(&self, slot: &Arc<Slot<T>>) -> bool {
        self.protected.iter().any(|p| Arc::ptr_eq(p, slot))
    }

    /// Oldest published slot still linked into the ring
    pub fn oldest(&self) -> Option<Arc<Slot<T>>> {
        let mut cursor = self.head.next();
        for _ in 0..self.size {
            let slot = cursor?;
            if Arc::ptr_eq(&slot, &self.head) {
                return None;
            }
            if !slot.is_writing() {
                return Some(slot);
            }
            cursor = slot.next();
        }
        None
    }
}

impl<T: RingValue> Drop for RingWriter<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut slot = Arc::clone(&self.head);
        loop {
            slot.ready.notify_waiters();
            match slot.take_next() {
                Some(next) if !Arc::ptr_eq(&next, &self.head) => slot = next,
                _ => break,
            }
        }
    }
}
