//! Reader cursor over a ring

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLockReadGuard;

use super::slot::{Enter, RingValue, Slot};
use super::RingHandle;
use crate::error::{Error, Result};

/// A cursor holding at most one slot
///
/// The held slot can never be overwritten; the writer routes around it.
/// Counts toward the ring's reader total from creation until drop.
#[derive(Debug)]
pub struct RingReader<T: RingValue> {
    ring: RingHandle<T>,
    current: Option<Arc<Slot<T>>>,
}

impl<T: RingValue> RingReader<T> {
    pub(super) fn new(ring: RingHandle<T>) -> Self {
        ring.shared.readers.fetch_add(1, Ordering::AcqRel);
        Self {
            ring,
            current: None,
        }
    }

    pub fn ring(&self) -> &RingHandle<T> {
        &self.ring
    }

    /// Sequence of the held slot
    pub fn sequence(&self) -> Option<u32> {
        self.current.as_ref().map(|s| s.sequence())
    }

    pub fn slot(&self) -> Option<&Arc<Slot<T>>> {
        self.current.as_ref()
    }

    /// Contents of the held slot
    pub fn value(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.current.as_ref().map(|s| s.read())
    }

    pub fn is_attached(&self) -> bool {
        self.current.is_some()
    }

    /// Move the cursor to `slot`, waiting while it is being written
    pub async fn attach(&mut self, slot: Arc<Slot<T>>) -> Result<()> {
        let held = Self::hold(&self.ring, slot, None).await?;
        self.replace(held);
        Ok(())
    }

    /// Advance to the slot after the held one, waiting for the writer
    ///
    /// If the writer lapped this reader the next slot carries a later
    /// sequence; the gap is visible through [`sequence`](Self::sequence).
    pub async fn read_next(&mut self) -> Result<()> {
        let (next, expected) = {
            let held = self.current.as_ref().ok_or(Error::ReaderDetached)?;
            let next = held.next().ok_or(Error::TrackClosed)?;
            (next, held.sequence().wrapping_add(1))
        };
        let held = Self::hold(&self.ring, next, Some(expected)).await?;
        self.replace(held);
        Ok(())
    }

    /// Let go of the held slot
    pub fn release(&mut self) {
        if let Some(slot) = self.current.take() {
            self.ring.leave(slot);
        }
    }

    fn replace(&mut self, slot: Arc<Slot<T>>) {
        if let Some(old) = self.current.replace(slot) {
            self.ring.leave(old);
        }
    }

    async fn hold(
        ring: &RingHandle<T>,
        mut target: Arc<Slot<T>>,
        expected: Option<u32>,
    ) -> Result<Arc<Slot<T>>> {
        loop {
            let slot = Arc::clone(&target);
            let notified = slot.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match target.try_enter(expected) {
                Enter::Held => return Ok(target),
                Enter::Replaced(replacement) => {
                    target = replacement;
                    continue;
                }
                Enter::Pending => {}
            }

            if ring.is_closed() {
                return Err(Error::TrackClosed);
            }
            notified.await;
        }
    }
}

impl<T: RingValue> Drop for RingReader<T> {
    fn drop(&mut self) {
        self.release();
        self.ring.shared.readers.fetch_sub(1, Ordering::AcqRel);
    }
}
