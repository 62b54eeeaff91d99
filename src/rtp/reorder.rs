//! Sequence-number reorder buffer
//!
//! A direct-mapped window of [`REORDER_WINDOW`] packets following the last
//! delivered sequence number. Packets inside the window wait for the gap to
//! fill; a packet beyond the window forces the window forward, delivering
//! what was buffered and counting every missing sequence number as a drop.

use std::collections::VecDeque;

use super::packet::RtpPacket;

/// Window size in packets
pub const REORDER_WINDOW: usize = 50;

#[derive(Debug)]
pub struct ReorderBuffer {
    slots: Vec<Option<RtpPacket>>,
    last_seq: u16,
    started: bool,
    /// Packets released by a forced skip, waiting for `pop`
    released: VecDeque<RtpPacket>,
    drops: u64,
    late: u64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self {
            slots: vec![None; REORDER_WINDOW],
            last_seq: 0,
            started: false,
            released: VecDeque::new(),
            drops: 0,
            late: 0,
        }
    }

    fn slot(seq: u16) -> usize {
        seq as usize % REORDER_WINDOW
    }

    /// Offer a packet; returns it (or an earlier one) when it is next in order
    ///
    /// Call [`pop`](Self::pop) afterwards to drain packets that became
    /// contiguous.
    pub fn push(&mut self, packet: RtpPacket) -> Option<RtpPacket> {
        let seq = packet.sequence_number;
        if !self.started {
            self.started = true;
            self.last_seq = seq;
            return Some(packet);
        }

        let delta = seq.wrapping_sub(self.last_seq);
        if delta == 0 || delta >= 0x8000 {
            // duplicate or already skipped past
            self.late += 1;
            tracing::trace!(seq, last = self.last_seq, "late RTP packet dropped");
            return None;
        }

        if delta == 1 && self.released.is_empty() {
            self.last_seq = seq;
            return Some(packet);
        }

        if delta as usize > REORDER_WINDOW {
            self.skip_to(seq.wrapping_sub(REORDER_WINDOW as u16));
        }

        self.slots[Self::slot(seq)] = Some(packet);
        self.pop()
    }

    /// Advance `last_seq` to `target`, releasing buffered packets in order
    fn skip_to(&mut self, target: u16) {
        let mut dropped = 0u64;
        while self.last_seq != target {
            let next = self.last_seq.wrapping_add(1);
            match self.take(next) {
                Some(packet) => self.released.push_back(packet),
                None => dropped += 1,
            }
            self.last_seq = next;
        }
        if dropped > 0 {
            self.drops += dropped;
            tracing::debug!(dropped, last = self.last_seq, "RTP reorder window overflow");
        }
    }

    fn take(&mut self, seq: u16) -> Option<RtpPacket> {
        let slot = &mut self.slots[Self::slot(seq)];
        if slot.as_ref().is_some_and(|p| p.sequence_number == seq) {
            slot.take()
        } else {
            None
        }
    }

    /// Next in-order packet, if any
    pub fn pop(&mut self) -> Option<RtpPacket> {
        if let Some(packet) = self.released.pop_front() {
            return Some(packet);
        }
        let next = self.last_seq.wrapping_add(1);
        let packet = self.take(next)?;
        self.last_seq = next;
        Some(packet)
    }

    /// Sequence numbers given up on because the window overflowed
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Duplicate or late packets discarded
    pub fn late(&self) -> u64 {
        self.late
    }

    /// Forget all state; the next packet restarts the sequence
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.released.clear();
        self.started = false;
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
