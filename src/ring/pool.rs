//! Reclaimed ring slots

use std::sync::Arc;

use parking_lot::Mutex;

use super::slot::{RingValue, Slot};

/// Bounded free list of slots cut out of a ring
#[derive(Debug)]
pub(crate) struct SlotPool<T> {
    slots: Mutex<Vec<Arc<Slot<T>>>>,
    capacity: usize,
}

impl<T: RingValue> SlotPool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// A reusable slot, or a fresh one when the pool is empty
    pub(crate) fn get(&self) -> Arc<Slot<T>> {
        self.slots.lock().pop().unwrap_or_else(Slot::new)
    }

    /// Keep `slot` for reuse if nothing else references it
    pub(crate) fn put(&self, slot: Arc<Slot<T>>) {
        if Arc::strong_count(&slot) != 1 {
            return;
        }
        let mut slots = self.slots.lock();
        if slots.len() < self.capacity {
            slot.recycle();
            slots.push(slot);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Unit;

    impl RingValue for Unit {
        fn reset(&mut self) {}
    }

    #[test]
    fn test_shared_slot_not_pooled() {
        let pool = SlotPool::<Unit>::new(4);
        let slot = Slot::new();
        let other = slot.clone();
        pool.put(slot);
        assert_eq!(pool.len(), 0);
        pool.put(other);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = SlotPool::<Unit>::new(2);
        for _ in 0..5 {
            pool.put(Slot::new());
        }
        assert_eq!(pool.len(), 2);
        let slot = pool.get();
        assert!(slot.is_writing());
        assert_eq!(pool.len(), 1);
    }
}
