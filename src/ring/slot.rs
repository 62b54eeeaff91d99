//! Ring slot and its control word
//!
//! ```text
//!  31        30          29..0
//! +---------+-----------+--------------+
//! | writing | discarded | reader count |
//! +---------+-----------+--------------+
//! ```
//!
//! The writer may only start writing a slot whose reader count is zero; a
//! reader may only hold a slot whose `writing` bit is clear. Both sides go
//! through the same atomic word, so neither can observe the other half-way.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;

pub(crate) const WRITING: u32 = 1 << 31;
pub(crate) const DISCARDED: u32 = 1 << 30;
pub(crate) const READERS: u32 = DISCARDED - 1;

/// Values stored in ring slots
///
/// Slots are reused in place; `reset` runs before every rewrite.
pub trait RingValue: Default + Send + Sync + 'static {
    fn reset(&mut self);
}

/// Outcome of a reader trying to take hold of a slot
pub(crate) enum Enter<T: RingValue> {
    /// The reader now holds the slot
    Held,
    /// Not readable yet; wait on the slot's notify and retry
    Pending,
    /// The slot was cut out of the ring before it was written; retry here
    Replaced(Arc<Slot<T>>),
}

/// One node of the ring
pub struct Slot<T> {
    state: AtomicU32,
    sequence: AtomicU32,
    value: RwLock<T>,
    pub(crate) ready: Notify,
    next: Mutex<Option<Arc<Slot<T>>>>,
    /// Slot that took this one's place when it was discarded
    replaced_by: Mutex<Option<Arc<Slot<T>>>>,
}

/// `a` is at or after `b` in wrapping 32-bit sequence space
pub(crate) fn seq_reached(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

impl<T: RingValue> Slot<T> {
    /// A fresh slot starts out `writing` so no reader mistakes it for data
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU32::new(WRITING),
            sequence: AtomicU32::new(0),
            value: RwLock::new(T::default()),
            ready: Notify::new(),
            next: Mutex::new(None),
            replaced_by: Mutex::new(None),
        })
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Readers currently holding this slot
    pub fn readers(&self) -> u32 {
        self.state.load(Ordering::Acquire) & READERS
    }

    pub fn is_writing(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITING != 0
    }

    pub fn is_discarded(&self) -> bool {
        self.state.load(Ordering::Acquire) & DISCARDED != 0
    }

    /// Read access; only meaningful while held or ready
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.value.write()
    }

    pub(crate) fn next(&self) -> Option<Arc<Slot<T>>> {
        self.next.lock().clone()
    }

    pub(crate) fn set_next(&self, next: Option<Arc<Slot<T>>>) {
        *self.next.lock() = next;
    }

    pub(crate) fn take_next(&self) -> Option<Arc<Slot<T>>> {
        self.next.lock().take()
    }

    /// Writer side: claim the slot if no reader holds it
    pub(crate) fn try_start_write(&self, sequence: u32) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & (READERS | DISCARDED) != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                WRITING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.sequence.store(sequence, Ordering::Release);
        self.value.write().reset();
        true
    }

    /// Writer side: publish the slot and wake waiting readers
    pub(crate) fn finish_write(&self) {
        self.state.fetch_and(!WRITING, Ordering::Release);
        self.ready.notify_waiters();
    }

    /// Writer side: sever a held slot, pointing waiters at its replacement
    pub(crate) fn discard(&self, replacement: Arc<Slot<T>>) {
        *self.replaced_by.lock() = Some(replacement);
        self.state.fetch_or(DISCARDED, Ordering::AcqRel);
        self.ready.notify_waiters();
    }

    /// Reader side: try to hold the slot
    ///
    /// With `expected`, the slot must carry at least that sequence; older
    /// content means the writer has not reached it yet.
    pub(crate) fn try_enter(&self, expected: Option<u32>) -> Enter<T> {
        let readable = |state: u32, seq: u32| state & WRITING == 0 && reached(expected, seq);

        let state = self.state.load(Ordering::Acquire);
        if readable(state, self.sequence()) {
            let prev = self.state.fetch_add(1, Ordering::AcqRel);
            if readable(prev, self.sequence()) {
                return Enter::Held;
            }
            self.state.fetch_sub(1, Ordering::AcqRel);
        }

        let state = self.state.load(Ordering::Acquire);
        if state & DISCARDED != 0 && !reached(expected, self.sequence()) {
            if let Some(replacement) = self.replaced_by.lock().clone() {
                return Enter::Replaced(replacement);
            }
        }
        Enter::Pending
    }

    /// Reader side: let go; returns true when this was the last holder of a
    /// discarded slot
    pub(crate) fn leave(&self) -> bool {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        prev & DISCARDED != 0 && prev & READERS == 1
    }

    /// Prepare a reclaimed slot for reuse
    pub(crate) fn recycle(&self) {
        self.set_next(None);
        *self.replaced_by.lock() = None;
        self.value.write().reset();
        self.state.store(WRITING, Ordering::Release);
    }
}

fn reached(expected: Option<u32>, seq: u32) -> bool {
    expected.map_or(true, |expected| seq_reached(seq, expected))
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("Slot")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("writing", &(state & WRITING != 0))
            .field("discarded", &(state & DISCARDED != 0))
            .field("readers", &(state & READERS))
            .finish()
    }
}
