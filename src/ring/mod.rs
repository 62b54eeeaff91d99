//! Single-writer, multi-reader frame ring
//!
//! A circular linked list of [`Slot`]s. The [`RingWriter`] fills the head
//! slot and steps forward; any number of [`RingReader`] cursors chase it.
//!
//! ```text
//!            latest (ready)      head (writing)
//!                 │                  │
//!   ┌──► [s3] ──► [s4] ───────────► [s5] ──► [s0] ──► [s1] ──► [s2] ──┐
//!   └─────────────────────────────────────────────────────────────────┘
//!                                     oldest retained ─┘
//! ```
//!
//! A reader never blocks the writer. When the writer reaches a slot a reader
//! still holds, that slot is cut out of the ring (the reader keeps it until it
//! moves on), a fresh slot takes its place, and the ring grows.

mod pool;
mod reader;
mod slot;
mod writer;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

pub use reader::RingReader;
pub use slot::{RingValue, Slot};
pub use writer::RingWriter;

use pool::SlotPool;

/// State shared by the writer and all readers of one ring
#[derive(Debug)]
struct RingShared<T> {
    /// Most recently published slot
    latest: RwLock<Option<Arc<Slot<T>>>>,
    readers: AtomicUsize,
    size: AtomicUsize,
    discards: AtomicU64,
    closed: AtomicBool,
    pool: SlotPool<T>,
}

/// Read-side handle to a ring; cheap to clone
#[derive(Debug)]
pub struct RingHandle<T> {
    shared: Arc<RingShared<T>>,
}

impl<T> Clone for RingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: RingValue> RingHandle<T> {
    /// Open a detached cursor; it counts as a reader until dropped
    pub fn reader(&self) -> RingReader<T> {
        RingReader::new(self.clone())
    }

    /// Most recently published slot
    pub fn latest(&self) -> Option<Arc<Slot<T>>> {
        self.shared.latest.read().clone()
    }

    /// Sequence of the most recently published slot
    pub fn latest_sequence(&self) -> Option<u32> {
        self.shared.latest.read().as_ref().map(|s| s.sequence())
    }

    /// Attached cursors
    pub fn readers(&self) -> usize {
        self.shared.readers.load(Ordering::Acquire)
    }

    /// Slots currently linked into the ring
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    /// Slots cut out because a reader held them
    pub fn discards(&self) -> u64 {
        self.shared.discards.load(Ordering::Relaxed)
    }

    /// The writer has gone away
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Walk published slots from `start` up to and including the latest
    pub fn walk_from(&self, start: Arc<Slot<T>>) -> impl Iterator<Item = Arc<Slot<T>>> {
        let latest = self.latest();
        let limit = self.size() + 1;
        let mut cursor = Some(start);
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            let slot = cursor.take()?;
            if slot.is_writing() {
                return None;
            }
            done = latest.as_ref().map_or(true, |l| Arc::ptr_eq(l, &slot));
            cursor = slot.next();
            Some(slot)
        })
        .take(limit)
    }

    fn leave(&self, slot: Arc<Slot<T>>) {
        if slot.leave() {
            self.shared.pool.put(slot);
        }
    }
}
